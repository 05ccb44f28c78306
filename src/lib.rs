//! agentflow - 检索增强、工具调用型对话 Agent 的阶段图编排引擎
//!
//! 模块划分：
//! - **agent**: 对话服务（加载 bot 与历史、运行阶段图、落盘）
//! - **bot**: bot 配置模型与存储
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、解析错误恢复、单轮对话状态
//! - **flow**: 阶段实现、路由谓词、plan/validate 子图与图引擎
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 对话消息与会话历史
//! - **retrieval**: 检索服务抽象与内存实现
//! - **tools**: 工具注册表、解析器、执行器与内置工具

pub mod agent;
pub mod bot;
pub mod config;
pub mod core;
pub mod flow;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod retrieval;
pub mod tools;

pub use agent::{build_service, ChatRequest, ChatResponse, ChatService};
pub use core::{AgentError, ChatbotState};
pub use flow::{FlowContext, StageGraph};
