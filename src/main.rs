//! agentflow 命令行入口
//!
//! - `agentflow ask --bot <id> <query>`：跑一轮对话并输出 JSON 响应；
//! - `agentflow graph`：输出阶段图的 Mermaid 描述。

use std::path::PathBuf;

use agentflow::agent::{build_service, ChatRequest};
use agentflow::bot::BotVersion;
use agentflow::config::{load_config, AppConfig};
use agentflow::flow::{FlowEvent, StageGraph};
use anyhow::Context;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agentflow", version, about = "Retrieval-augmented tool-calling chat agent")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long, global = true, env = "AGENTFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 处理一条用户消息
    Ask {
        #[arg(long)]
        bot: String,
        /// TEST 或 PROD
        #[arg(long = "bot-version", default_value = "TEST")]
        bot_version: BotVersion,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        profile: Option<String>,
        /// 不返回 trace
        #[arg(long)]
        no_trace: bool,
        /// 忽略会话历史
        #[arg(long)]
        no_history: bool,
        /// 实时打印阶段事件到 stderr
        #[arg(long)]
        events: bool,
        query: String,
    },
    /// 输出 Mermaid 阶段图
    Graph,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    agentflow::observability::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Graph => {
            print!("{}", StageGraph::mermaid());
        }
        Commands::Ask {
            bot,
            bot_version,
            session,
            user,
            profile,
            no_trace,
            no_history,
            events,
            query,
        } => {
            let cfg = load_config(cli.config).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "config load failed, using defaults");
                AppConfig::default()
            });
            let service = build_service(&cfg)
                .await
                .context("Failed to build chat service")?;

            let mut request = ChatRequest::new(bot, query).with_version(bot_version);
            if let Some(s) = session {
                request = request.with_session(s);
            }
            if let Some(u) = user {
                request = request.with_user(u);
            }
            if let Some(p) = profile {
                request = request.with_user_profile(p);
            }
            if no_trace {
                request = request.with_trace(false);
            }
            if no_history {
                request = request.without_history();
            }

            let response = if events {
                let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<FlowEvent>();
                let printer = tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if let Ok(line) = serde_json::to_string(&event) {
                            eprintln!("{}", line);
                        }
                    }
                });
                let response = service.handle(request, Some(&tx)).await;
                drop(tx);
                let _ = printer.await;
                response
            } else {
                service.handle(request, None).await
            };

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}
