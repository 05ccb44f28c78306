//! 内存检索实现：按索引存文档，Jaccard 词重叠打分（无真实向量，适合本地运行与测试）

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::core::AgentError;
use crate::retrieval::tokenizer::{jaccard_similarity, tokenize_to_set};
use crate::retrieval::{RetrieveMode, RetrievedDoc, Retriever, RetrieverRef};

struct IndexedDoc {
    content: String,
    answer: Option<String>,
    kwargs: Map<String, Value>,
    tokens: HashSet<String>,
}

#[derive(Default)]
pub struct InMemoryRetriever {
    indexes: RwLock<HashMap<String, Vec<IndexedDoc>>>,
}

impl InMemoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一条文档；answer 在意图索引中为意图名，在 FAQ 索引中为答案
    pub async fn add_document(
        &self,
        index: &str,
        content: &str,
        answer: Option<&str>,
        kwargs: Map<String, Value>,
    ) {
        let doc = IndexedDoc {
            content: content.to_string(),
            answer: answer.map(String::from),
            kwargs,
            tokens: tokenize_to_set(content),
        };
        self.indexes
            .write()
            .await
            .entry(index.to_string())
            .or_default()
            .push(doc);
    }

    pub async fn add_passage(&self, index: &str, content: &str) {
        self.add_document(index, content, None, Map::new()).await;
    }

    /// 从 TOML 语料（`[[documents]]`）批量写入，返回写入条数
    pub async fn load_toml_str(&self, content: &str) -> Result<usize, AgentError> {
        let corpus: CorpusFile =
            toml::from_str(content).map_err(|e| AgentError::ConfigError(e.to_string()))?;
        let count = corpus.documents.len();
        for doc in corpus.documents {
            self.add_document(&doc.index, &doc.content, doc.answer.as_deref(), doc.kwargs)
                .await;
        }
        Ok(count)
    }
}

#[derive(Deserialize)]
struct CorpusFile {
    #[serde(default)]
    documents: Vec<CorpusDoc>,
}

#[derive(Deserialize)]
struct CorpusDoc {
    index: String,
    content: String,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    kwargs: Map<String, Value>,
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn retrieve(
        &self,
        query: &str,
        refs: &[RetrieverRef],
        mode: RetrieveMode,
    ) -> Result<Vec<RetrievedDoc>, AgentError> {
        let query_tokens = tokenize_to_set(query);
        let indexes = self.indexes.read().await;
        let mut results = Vec::new();

        for r in refs {
            let Some(docs) = indexes.get(&r.index) else {
                tracing::warn!(index = %r.index, "retriever index not found");
                continue;
            };
            let mut scored: Vec<RetrievedDoc> = docs
                .iter()
                .map(|d| RetrievedDoc {
                    content: d.content.clone(),
                    score: jaccard_similarity(&query_tokens, &d.tokens),
                    answer: d.answer.clone(),
                    source: r.index.clone(),
                    kwargs: d.kwargs.clone(),
                })
                .filter(|d| d.score > 0.0)
                .collect();
            scored.sort_by(|a, b| b.score.total_cmp(&a.score));
            scored.truncate(r.top_k);
            results.extend(scored);
        }

        tracing::debug!(%mode, hits = results.len(), "in-memory retrieve");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retrieve_ranks_and_truncates() {
        let retriever = InMemoryRetriever::new();
        retriever.add_passage("kb", "rust ownership rules").await;
        retriever.add_passage("kb", "rust borrow checker and ownership").await;
        retriever.add_passage("kb", "python decorators").await;

        let docs = retriever
            .retrieve("rust ownership", &[RetrieverRef::new("kb", 1)], RetrieveMode::Qd)
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "rust ownership rules");
        assert_eq!(docs[0].source, "kb");
        assert!(docs[0].score > 0.0 && docs[0].score <= 1.0);
    }

    #[tokio::test]
    async fn test_unknown_index_is_empty() {
        let retriever = InMemoryRetriever::new();
        let docs = retriever
            .retrieve("anything", &[RetrieverRef::new("missing", 3)], RetrieveMode::Qq)
            .await
            .unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_qq_carries_answer() {
        let retriever = InMemoryRetriever::new();
        retriever
            .add_document("intent", "hello there", Some("greeting"), Map::new())
            .await;
        let docs = retriever
            .retrieve("hello", &[RetrieverRef::new("intent", 3)], RetrieveMode::Qq)
            .await
            .unwrap();
        assert_eq!(docs[0].answer.as_deref(), Some("greeting"));
    }

    #[tokio::test]
    async fn test_load_toml_corpus() {
        let retriever = InMemoryRetriever::new();
        let n = retriever
            .load_toml_str(
                r#"
[[documents]]
index = "faq"
content = "how to reset password"
answer = "Use the reset link on the login page."

[[documents]]
index = "intent"
content = "weather in paris"
answer = "get_weather"
kwargs = { city_name = "Paris" }
"#,
            )
            .await
            .unwrap();
        assert_eq!(n, 2);
        let docs = retriever
            .retrieve("weather today", &[RetrieverRef::new("intent", 3)], RetrieveMode::Qq)
            .await
            .unwrap();
        assert_eq!(docs[0].kwargs["city_name"], "Paris");
    }
}
