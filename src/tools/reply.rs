//! 直接回复类工具（ONCE）：give_final_response、give_rhetorical_question、chat、greeting、comfort、transfer
//!
//! 这些工具不访问外部服务，结果就是参数里的回复文本；comfort / transfer / greeting 在参数缺省时使用固定话术。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::params_schema;
use crate::tools::{Tool, ToolContext, ToolMode, ToolOutput};

pub const COMFORT_TEMPLATE: &str = "不好意思没能帮到您，是否帮你转人工客服？";
pub const TRANSFER_TEMPLATE: &str = "立即为您转人工客服，请稍后";
pub const GREETING_TEMPLATE: &str = "您好，请问有什么可以帮您？";

#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct ResponseArgs {
    /// Response to user
    response: String,
}

#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct OptionalResponseArgs {
    /// Response to user; leave empty to use the standard reply
    response: Option<String>,
}

#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct QuestionArgs {
    /// The rhetorical question to user
    question: String,
}

/// 回复文本取自哪个参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyField {
    Response,
    OptionalResponse,
    Question,
    None,
}

impl ReplyField {
    fn key(self) -> Option<&'static str> {
        match self {
            ReplyField::Response | ReplyField::OptionalResponse => Some("response"),
            ReplyField::Question => Some("question"),
            ReplyField::None => None,
        }
    }
}

pub struct ReplyTool {
    name: &'static str,
    description: &'static str,
    field: ReplyField,
    template: Option<&'static str>,
}

impl ReplyTool {
    pub fn final_response() -> Self {
        Self {
            name: "give_final_response",
            description: "If none of the other tools need to be called, call this tool to give the final response to the user.",
            field: ReplyField::Response,
            template: None,
        }
    }

    pub fn rhetorical_question() -> Self {
        Self {
            name: "give_rhetorical_question",
            description: "If the user's request is ambiguous or lacks required information, ask a clarifying question instead of guessing.",
            field: ReplyField::Question,
            template: None,
        }
    }

    pub fn chat() -> Self {
        Self {
            name: "chat",
            description: "Casual conversation with the user, e.g. small talk that needs no external knowledge.",
            field: ReplyField::Response,
            template: None,
        }
    }

    pub fn greeting() -> Self {
        Self {
            name: "greeting",
            description: "Reply to the user's greeting, e.g. 'hello', 'hi'.",
            field: ReplyField::OptionalResponse,
            template: Some(GREETING_TEMPLATE),
        }
    }

    pub fn comfort() -> Self {
        Self {
            name: "comfort",
            description: "Comfort the user when they are unhappy or the question cannot be solved.",
            field: ReplyField::OptionalResponse,
            template: Some(COMFORT_TEMPLATE),
        }
    }

    pub fn transfer() -> Self {
        Self {
            name: "transfer",
            description: "Transfer the conversation to a human customer service agent.",
            field: ReplyField::None,
            template: Some(TRANSFER_TEMPLATE),
        }
    }
}

#[async_trait]
impl Tool for ReplyTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters_schema(&self) -> Value {
        match self.field {
            ReplyField::Response => params_schema::<ResponseArgs>(),
            ReplyField::OptionalResponse => params_schema::<OptionalResponseArgs>(),
            ReplyField::Question => params_schema::<QuestionArgs>(),
            ReplyField::None => serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    fn mode(&self) -> ToolMode {
        ToolMode::Once
    }

    async fn invoke(&self, _ctx: &ToolContext<'_>, kwargs: &Value) -> Result<ToolOutput, String> {
        let text = self
            .field
            .key()
            .and_then(|k| kwargs.get(k))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        match (text, self.template) {
            (Some(t), _) => Ok(ToolOutput::ok(t)),
            (None, Some(template)) => Ok(ToolOutput::ok(template)),
            (None, None) => Err(format!(
                "{}: missing {}",
                self.name,
                self.field.key().unwrap_or("response")
            )),
        }
    }
}
