//! 记忆层：对话消息与会话历史持久化

pub mod conversation;
pub mod history;

pub use conversation::{render_transcript, Message, Role};
pub use history::{
    turns_to_messages, ChatHistoryStore, ChatTurn, InMemoryChatHistory, SqliteChatHistory,
};
