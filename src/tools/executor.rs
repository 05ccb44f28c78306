//! 工具执行器
//!
//! 持有共享的 ToolRegistry 与全局超时，execute(call, scene, ctx) 在超时内调用工具后端，
//! 超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed）；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::memory::Message;
use crate::tools::{ToolCall, ToolContext, ToolOutput, ToolRegistry};

/// 一次工具执行的结果
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallResult {
    pub name: String,
    pub kwargs: Value,
    pub model_id: String,
    pub output: ToolOutput,
}

impl ToolCallResult {
    /// 作为 tool 角色消息回灌给规划阶段
    pub fn to_message(&self) -> Message {
        Message::tool(format!(
            "<tool_result name=\"{}\" code=\"{}\">\n{}\n</tool_result>",
            self.name, self.output.code, self.output.result
        ))
    }
}

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行一次已校验的调用；超时返回 ToolTimeout，后端返回 Err 则转为 ToolExecutionFailed
    pub async fn execute(
        &self,
        call: &ToolCall,
        scene: &str,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolCallResult, AgentError> {
        let tool = self.registry.lookup(&call.name, scene)?;
        let start = Instant::now();
        let result = timeout(self.timeout, tool.invoke(ctx, &call.kwargs)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "scene": scene,
            "mode": tool.mode().to_string(),
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview(&call.kwargs),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(output)) => Ok(ToolCallResult {
                name: call.name.clone(),
                kwargs: call.kwargs.clone(),
                model_id: call.model_id.clone(),
                output,
            }),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(format!("{}: {}", call.name, e))),
            Err(_) => Err(AgentError::ToolTimeout(call.name.clone())),
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
