//! 核心层：错误类型、解析错误恢复、单轮对话状态

pub mod error;
pub mod recovery;
pub mod state;

pub use error::{AgentError, ToolCallErrorKind};
pub use recovery::RecoveryEngine;
pub use state::{
    merge_nested, AgentOutput, ChatbotState, IntentType, IntentionExample, StateUpdate,
};
