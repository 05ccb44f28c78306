//! 检索层：检索服务抽象与内存实现
//!
//! qq 模式：把 query 与已存的问题（意图/FAQ few-shot）比对；qd 模式：与知识库段落比对。
//! 返回的 score 位于 [0, 1]；编排层只在意图检索上施加阈值。

pub mod memory;
pub mod tokenizer;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::AgentError;

pub use memory::InMemoryRetriever;

/// 检索模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrieveMode {
    /// query-question
    Qq,
    /// query-document
    Qd,
}

impl fmt::Display for RetrieveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrieveMode::Qq => write!(f, "qq"),
            RetrieveMode::Qd => write!(f, "qd"),
        }
    }
}

/// 对某个索引的检索引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieverRef {
    pub index: String,
    pub top_k: usize,
}

impl RetrieverRef {
    pub fn new(index: impl Into<String>, top_k: usize) -> Self {
        Self {
            index: index.into(),
            top_k,
        }
    }
}

/// 一条检索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDoc {
    pub content: String,
    pub score: f32,
    /// qq 模式下：intent 索引为意图名，faq 索引为可直接返回的答案
    #[serde(default)]
    pub answer: Option<String>,
    /// 来源索引名
    pub source: String,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

/// 检索服务
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        refs: &[RetrieverRef],
        mode: RetrieveMode,
    ) -> Result<Vec<RetrievedDoc>, AgentError>;
}
