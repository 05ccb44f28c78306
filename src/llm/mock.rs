//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 按顺序吐出预置回复；队列耗尽后回显最后一条 User 消息，包装成 give_final_response 工具调用。
//! 所有收到的请求都会被记录，测试可据此断言调用次数与 prompt 内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::memory::Role;

enum Scripted {
    Text(String),
    Fail(String),
}

#[derive(Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回给定的回复
    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::default();
        for r in responses {
            client.push_response(r);
        }
        client
    }

    pub fn push_response(&self, text: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Scripted::Text(text.into()));
        }
    }

    /// 下一次调用返回 ApiError
    pub fn push_failure(&self, reason: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Scripted::Fail(reason.into()));
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Scripted::Text(text)) => Ok(text),
            Some(Scripted::Fail(reason)) => Err(LlmError::ApiError(reason)),
            None => {
                let last_user = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                let call = serde_json::json!({
                    "name": "give_final_response",
                    "kwargs": { "response": format!("Echo from Mock: {}", last_user) }
                });
                Ok(call.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;

    #[tokio::test]
    async fn test_scripted_then_echo() {
        let client = MockLlmClient::scripted(["first"]);
        client.push_failure("boom");
        let req = CompletionRequest::new("m", vec![Message::user("hi")]);

        assert_eq!(client.complete(&req).await.unwrap(), "first");
        assert!(client.complete(&req).await.is_err());
        let echoed = client.complete(&req).await.unwrap();
        assert!(echoed.contains("give_final_response"));
        assert!(echoed.contains("Echo from Mock: hi"));
        assert_eq!(client.call_count(), 3);
    }
}
