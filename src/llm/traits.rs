//! LLM 客户端抽象
//!
//! 编排层只需要一个非流式 complete：工具调用模式与普通模式（RAG 生成、query 改写）的区别
//! 体现在 prompt 组装上，不在客户端接口上。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Empty response from model")]
    EmptyResponse,
}

/// 单次生成请求
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model_id: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(model_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model_id: model_id.into(),
            messages,
            temperature: 0.01,
            max_tokens: 4096,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

/// LLM 客户端：给定消息返回生成文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// 累计 token 统计：(prompt, completion, total)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
