//! 阶段图：阶段实现、路由谓词、plan/validate 子图与引擎

pub mod agent;
pub mod events;
pub mod graph;
pub mod prompts;
pub mod routes;
pub mod stages;

use std::sync::Arc;

use crate::core::{ChatbotState, RecoveryEngine};
use crate::llm::LlmClient;
use crate::retrieval::Retriever;
use crate::tools::{ToolContext, ToolExecutor, ToolRegistry};

pub use events::{EventSink, FlowEvent};
pub use graph::{Stage, StageGraph};
pub use routes::{AgentLoopRoute, AgentRoute, RetrieveRoute, Routed};

/// 阶段共享的只读协作者；跨请求复用
pub struct FlowContext {
    pub registry: Arc<ToolRegistry>,
    pub executor: ToolExecutor,
    pub retriever: Arc<dyn Retriever>,
    pub llm: Arc<dyn LlmClient>,
    pub recovery: RecoveryEngine,
    /// 检索结果来源不在 bot 意图检索器列表中时使用的阈值
    pub intention_threshold: f32,
}

impl FlowContext {
    pub fn new(
        registry: Arc<ToolRegistry>,
        retriever: Arc<dyn Retriever>,
        llm: Arc<dyn LlmClient>,
        tool_timeout_secs: u64,
    ) -> Self {
        Self {
            executor: ToolExecutor::new(registry.clone(), tool_timeout_secs),
            registry,
            retriever,
            llm,
            recovery: RecoveryEngine::new(),
            intention_threshold: 0.4,
        }
    }

    pub fn with_intention_threshold(mut self, threshold: f32) -> Self {
        self.intention_threshold = threshold;
        self
    }

    pub fn tool_context<'a>(&'a self, state: &'a ChatbotState) -> ToolContext<'a> {
        ToolContext {
            state,
            retriever: self.retriever.as_ref(),
            llm: self.llm.as_ref(),
        }
    }
}
