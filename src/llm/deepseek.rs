//! DeepSeek 后端（OpenAI 兼容端点）

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// key 取 `DEEPSEEK_API_KEY`，缺省时退回 `OPENAI_API_KEY`；base_url 为空时用官方端点
pub fn create_deepseek_client(
    model: Option<&str>,
    base_url: Option<&str>,
    timeout_secs: u64,
) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .ok();
    let model = model.unwrap_or(DEEPSEEK_CHAT);
    OpenAiClient::new(
        Some(base_url.unwrap_or(DEEPSEEK_BASE_URL)),
        model,
        api_key.as_deref(),
    )
    .with_timeout(timeout_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmClient;

    #[test]
    fn test_fresh_client_has_no_usage() {
        let client = create_deepseek_client(None, None, 5);
        assert_eq!(client.token_usage(), (0, 0, 0));
    }
}
