//! 对话服务
//!
//! 供 CLI / HTTP 等前端调用的无界面入口：
//! build_service 按配置构建 LLM、工具注册表、检索、bot 与历史存储；
//! ChatService::handle 对单条请求加载 bot 与历史、构建初始状态、运行阶段图并落盘本轮问答。
//! handle 从不返回错误：任何失败都记录日志并以通用答案回复。

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::Instrument;

use crate::bot::{load_active_bot, BotConfigStore, BotVersion, InMemoryBotStore};
use crate::config::AppConfig;
use crate::core::{AgentError, ChatbotState};
use crate::flow::{EventSink, FlowContext, StageGraph};
use crate::llm::create_llm_from_config;
use crate::memory::{
    turns_to_messages, ChatHistoryStore, ChatTurn, InMemoryChatHistory, SqliteChatHistory,
};
use crate::retrieval::InMemoryRetriever;
use crate::tools::{register_builtin_tools, ToolRegistry};

/// 出错时返回给调用方的答案
pub const GENERIC_ERROR_ANSWER: &str = "An exception has occurred";

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub query: String,
    pub bot_id: String,
    pub version: BotVersion,
    /// 缺省时生成 `session_{timestamp}`
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub user_profile: Option<String>,
    /// 覆盖全局 enable_trace
    pub enable_trace: Option<bool>,
    pub use_history: bool,
}

impl ChatRequest {
    pub fn new(bot_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            bot_id: bot_id.into(),
            version: BotVersion::default(),
            session_id: None,
            user_id: None,
            user_profile: None,
            enable_trace: None,
            use_history: true,
        }
    }

    pub fn with_version(mut self, version: BotVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_user_profile(mut self, profile: impl Into<String>) -> Self {
        self.user_profile = Some(profile.into());
        self
    }

    pub fn with_trace(mut self, enable: bool) -> Self {
        self.enable_trace = Some(enable);
        self
    }

    pub fn without_history(mut self) -> Self {
        self.use_history = false;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<String>>,
    pub extra_response: Map<String, Value>,
    pub session_id: String,
    pub message_id: String,
}

/// 服务级参数（来自 [app] / [flow]）
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub max_history_turns: usize,
    pub agent_recursion_limit: usize,
    pub scene: String,
    pub retrieval_tools: Vec<String>,
    pub enable_trace: bool,
}

impl From<&AppConfig> for ServiceSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            max_history_turns: cfg.app.max_history_turns,
            agent_recursion_limit: cfg.flow.agent_recursion_limit,
            scene: cfg.flow.scene.clone(),
            retrieval_tools: cfg.flow.retrieval_tools.clone(),
            enable_trace: cfg.flow.enable_trace,
        }
    }
}

pub struct ChatService {
    graph: StageGraph,
    bots: Arc<dyn BotConfigStore>,
    history: Arc<dyn ChatHistoryStore>,
    settings: ServiceSettings,
}

impl ChatService {
    pub fn new(
        graph: StageGraph,
        bots: Arc<dyn BotConfigStore>,
        history: Arc<dyn ChatHistoryStore>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            graph,
            bots,
            history,
            settings,
        }
    }

    /// 处理一轮对话；失败时返回通用答案
    pub async fn handle(&self, request: ChatRequest, events: EventSink<'_>) -> ChatResponse {
        let session_id = session_id_for(&request);
        let message_id = uuid::Uuid::new_v4().to_string();
        match self
            .respond(&request, &session_id, &message_id, events)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    bot_id = %request.bot_id,
                    error = %e,
                    "chat turn failed"
                );
                ChatResponse {
                    answer: GENERIC_ERROR_ANSWER.to_string(),
                    intent_type: None,
                    trace: None,
                    extra_response: Map::new(),
                    session_id,
                    message_id,
                }
            }
        }
    }

    /// 同 handle，但把错误交给调用方
    pub async fn try_handle(
        &self,
        request: ChatRequest,
        events: EventSink<'_>,
    ) -> Result<ChatResponse, AgentError> {
        let session_id = session_id_for(&request);
        let message_id = uuid::Uuid::new_v4().to_string();
        self.respond(&request, &session_id, &message_id, events)
            .await
    }

    async fn respond(
        &self,
        request: &ChatRequest,
        session_id: &str,
        message_id: &str,
        events: EventSink<'_>,
    ) -> Result<ChatResponse, AgentError> {
        let span = tracing::info_span!("chat", session_id = %session_id, bot_id = %request.bot_id);
        async move {
            let bot = load_active_bot(self.bots.as_ref(), &request.bot_id, request.version).await?;

            let history = if request.use_history {
                let turns = self.history.load(session_id).await?;
                turns_to_messages(&turns, self.settings.max_history_turns)
            } else {
                Vec::new()
            };

            let enable_trace = request.enable_trace.unwrap_or(self.settings.enable_trace);
            let limit = bot
                .agent_recursion_limit
                .unwrap_or(self.settings.agent_recursion_limit);
            let loop_tools: BTreeSet<String> = self
                .graph
                .context()
                .registry
                .names_with_loop_mode(&self.settings.scene);

            let state = ChatbotState::new(bot, request.query.clone())
                .with_chat_history(history)
                .with_scene(self.settings.scene.clone())
                .with_user_profile(request.user_profile.clone())
                .with_ids(session_id, message_id)
                .with_trace(enable_trace)
                .with_recursion_limit(limit)
                .with_retrieval_tool_names(self.settings.retrieval_tools.iter().cloned())
                .with_valid_tool_calling_names(loop_tools);

            tracing::info!(query = %request.query, recursion_limit = limit, "chat turn started");
            let state = self.graph.run(state, events).await?;
            let answer = state
                .answer()
                .ok_or_else(|| AgentError::GraphError("missing answer".to_string()))?
                .to_string();
            let intent_type = state.intent_type.map(|t| t.as_str().to_string());

            let turn = ChatTurn {
                message_id: message_id.to_string(),
                user_id: request.user_id.clone(),
                query: request.query.clone(),
                answer: answer.clone(),
                intent_type: intent_type.clone(),
                created_at: Utc::now(),
            };
            if let Err(e) = self.history.append(session_id, turn).await {
                tracing::warn!(error = %e, "failed to persist chat turn");
            }

            tracing::info!(
                recursion_num = state.current_agent_recursion_num,
                intent_type = intent_type.as_deref().unwrap_or("-"),
                "chat turn finished"
            );
            Ok(ChatResponse {
                answer,
                intent_type,
                trace: enable_trace.then(|| state.trace_infos.clone()),
                extra_response: state.extra_response.clone(),
                session_id: session_id.to_string(),
                message_id: message_id.to_string(),
            })
        }
        .instrument(span)
        .await
    }
}

fn session_id_for(request: &ChatRequest) -> String {
    request
        .session_id
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("session_{}", Utc::now().timestamp_millis()))
}

/// 按配置构建服务：LLM、内置工具、内存检索（可选语料）、bot 存储、历史存储
pub async fn build_service(cfg: &AppConfig) -> Result<ChatService, AgentError> {
    let llm = create_llm_from_config(cfg);

    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, &cfg.flow.scene, &cfg.flow)?;
    let registry = Arc::new(registry);

    let retriever = InMemoryRetriever::new();
    if let Some(path) = &cfg.storage.corpus_file {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::ConfigError(format!("read {}: {}", path.display(), e)))?;
        let n = retriever.load_toml_str(&content).await?;
        tracing::info!(documents = n, path = %path.display(), "corpus loaded");
    }

    let bots: Arc<dyn BotConfigStore> = match &cfg.storage.bots_file {
        Some(path) => Arc::new(InMemoryBotStore::from_file(path)?),
        None => {
            tracing::warn!("no bots_file configured, bot store is empty");
            Arc::new(InMemoryBotStore::new())
        }
    };

    let history: Arc<dyn ChatHistoryStore> = match &cfg.storage.history_db {
        Some(path) => Arc::new(SqliteChatHistory::open(path)?),
        None => Arc::new(InMemoryChatHistory::new()),
    };

    let ctx = FlowContext::new(registry, Arc::new(retriever), llm, cfg.flow.tool_timeout_secs)
        .with_intention_threshold(cfg.flow.intention_threshold);
    Ok(ChatService::new(
        StageGraph::new(ctx),
        bots,
        history,
        ServiceSettings::from(cfg),
    ))
}
