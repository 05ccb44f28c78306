//! get_weather 工具（LOOP）：按城市名请求天气端点，响应文本回灌给规划模型
//!
//! 端点模板中的 `{city}` 被替换为城市名；响应超过 max_result_chars 时截断。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::params_schema;
use crate::tools::{Tool, ToolContext, ToolMode, ToolOutput};

const MAX_RESULT_CHARS: usize = 500;

#[derive(Deserialize, JsonSchema)]
struct WeatherArgs {
    /// The name of the city to be queried
    city_name: String,
}

pub struct WeatherTool {
    client: Client,
    endpoint: String,
}

impl WeatherTool {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("agentflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    fn url_for(&self, city: &str) -> String {
        let city = city.trim().split_whitespace().collect::<Vec<_>>().join("+");
        self.endpoint.replace("{city}", &city)
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get weather information for a specific city."
    }

    fn parameters_schema(&self) -> Value {
        params_schema::<WeatherArgs>()
    }

    fn mode(&self) -> ToolMode {
        ToolMode::Loop
    }

    async fn invoke(&self, _ctx: &ToolContext<'_>, kwargs: &Value) -> Result<ToolOutput, String> {
        let args: WeatherArgs =
            serde_json::from_value(kwargs.clone()).map_err(|e| format!("invalid args: {}", e))?;
        let url = self.url_for(&args.city_name);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("weather request failed: {}", e))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| format!("weather response: {}", e))?;
        if !status.is_success() {
            return Err(format!("weather endpoint returned {}", status));
        }
        let body = body.trim();
        let result = if body.chars().count() > MAX_RESULT_CHARS {
            format!(
                "{}...[truncated]",
                body.chars().take(MAX_RESULT_CHARS).collect::<String>()
            )
        } else {
            body.to_string()
        };
        Ok(ToolOutput::ok(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_replaces_city() {
        let tool = WeatherTool::new("https://wttr.in/{city}?format=3", 5);
        assert_eq!(tool.url_for(" New  York "), "https://wttr.in/New+York?format=3");
        assert_eq!(tool.parameters_schema()["required"][0], "city_name");
    }
}
