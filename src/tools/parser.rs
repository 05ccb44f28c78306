//! 规划输出解析：从 LLM 原始文本中提取工具调用并校验
//!
//! 可识别的调用形态：
//! - ```json 代码块或 `<tool_call>...</tool_call>` 标签中的 JSON；
//! - 文本中顶层平衡的 JSON 对象（或对象数组）。
//!
//! 每个调用形如 `{"name": "...", "kwargs": {...}}`，也接受 tool / args / arguments 等别名。
//! 校验顺序：ToolNotExist → ToolNotFound → ToolParameterNotExist → MultipleToolName。
//! 同名调用重复出现时只保留第一个，成功时恰好返回一个调用。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::{RecoveryEngine, ToolCallErrorKind};
use crate::memory::Message;
use crate::tools::{required_params, ToolRegistry};

/// 一次已校验的工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub kwargs: Value,
    pub model_id: String,
}

#[derive(Debug, Deserialize)]
struct RawToolCall {
    #[serde(alias = "tool", alias = "tool_name")]
    name: String,
    #[serde(default, alias = "args", alias = "arguments", alias = "parameters")]
    kwargs: Value,
}

impl RawToolCall {
    /// kwargs 统一为对象：null → {}，字符串形式的 JSON 会被展开
    fn into_call(self, model_id: &str) -> ToolCall {
        let kwargs = match self.kwargs {
            Value::Null => Value::Object(Map::new()),
            Value::String(s) => serde_json::from_str::<Value>(&s)
                .ok()
                .filter(Value::is_object)
                .unwrap_or_else(|| Value::Object(Map::new())),
            other => other,
        };
        ToolCall {
            name: self.name.trim().to_string(),
            kwargs,
            model_id: model_id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedToolCalls {
    /// 规划输出原文，作为 assistant 消息写入 agent 历史
    pub agent_message: Message,
    pub tool_calls: Vec<ToolCall>,
}

/// 解析失败：携带原文消息与一条纠错提示（user 角色），两者都要写入 agent 历史
#[derive(Error, Debug, Clone)]
#[error("{kind}")]
pub struct ToolCallError {
    pub kind: ToolCallErrorKind,
    pub agent_message: Message,
    pub error_message: Message,
}

fn fenced_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("fenced block regex")
    })
}

fn tagged_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").expect("tool_call tag regex")
    })
}

/// 文本中以 `{` / `[` 开头的顶层 JSON 片段
///
/// 在每个左括号处尝试流式解析一个完整值；失败（如未闭合的 `[`）则从下一个左括号继续扫描。
fn balanced_json_segments(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut cursor = 0usize;

    for (i, c) in text.char_indices() {
        if i < cursor || !matches!(c, '{' | '[') {
            continue;
        }
        let rest = &text[i..];
        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        if let Some(Ok(_)) = stream.next() {
            let end = i + stream.byte_offset();
            segments.push(&text[i..end]);
            cursor = end;
        }
    }
    segments
}

fn calls_from_value(value: Value, model_id: &str, out: &mut Vec<ToolCall>) {
    match value {
        Value::Array(items) => {
            for item in items {
                calls_from_value(item, model_id, out);
            }
        }
        Value::Object(_) => {
            if let Ok(raw) = serde_json::from_value::<RawToolCall>(value) {
                if !raw.name.trim().is_empty() {
                    out.push(raw.into_call(model_id));
                }
            }
        }
        _ => {}
    }
}

fn calls_from_fragment(fragment: &str, model_id: &str, out: &mut Vec<ToolCall>) {
    let fragment = fragment.trim();
    if let Ok(value) = serde_json::from_str::<Value>(fragment) {
        calls_from_value(value, model_id, out);
        return;
    }
    // 代码块内有多个对象时逐个解析
    for segment in balanced_json_segments(fragment) {
        if let Ok(value) = serde_json::from_str::<Value>(segment) {
            calls_from_value(value, model_id, out);
        }
    }
}

/// 提取输出中的全部候选调用（尚未校验）
pub fn extract_tool_calls(generation: &str, model_id: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut wrapped = false;
    for re in [fenced_re(), tagged_re()] {
        for cap in re.captures_iter(generation) {
            wrapped = true;
            if let Some(m) = cap.get(1) {
                calls_from_fragment(m.as_str(), model_id, &mut calls);
            }
        }
    }
    if !wrapped {
        calls_from_fragment(generation, model_id, &mut calls);
    }
    calls
}

/// 绑定注册表与 scene 的解析器
pub struct ToolCallParser<'a> {
    registry: &'a ToolRegistry,
    scene: &'a str,
    recovery: &'a RecoveryEngine,
}

impl<'a> ToolCallParser<'a> {
    pub fn new(registry: &'a ToolRegistry, scene: &'a str, recovery: &'a RecoveryEngine) -> Self {
        Self {
            registry,
            scene,
            recovery,
        }
    }

    /// 解析并校验；offered_tools 用于生成纠错提示
    pub fn parse(
        &self,
        generation: &str,
        model_id: &str,
        offered_tools: &[String],
    ) -> Result<ParsedToolCalls, ToolCallError> {
        let agent_message = Message::assistant(generation);
        let fail = |kind: ToolCallErrorKind| ToolCallError {
            error_message: Message::user(self.recovery.feedback(&kind, offered_tools)),
            agent_message: agent_message.clone(),
            kind,
        };

        let calls = extract_tool_calls(generation, model_id);
        if calls.is_empty() {
            return Err(fail(ToolCallErrorKind::ToolNotExist));
        }

        for call in &calls {
            if !self.registry.contains(&call.name, self.scene) {
                return Err(fail(ToolCallErrorKind::ToolNotFound {
                    name: call.name.clone(),
                }));
            }
        }

        for call in &calls {
            let tool = self
                .registry
                .lookup(&call.name, self.scene)
                .map_err(|_| {
                    fail(ToolCallErrorKind::ToolNotFound {
                        name: call.name.clone(),
                    })
                })?;
            for param in required_params(tool.as_ref()) {
                let present = call
                    .kwargs
                    .get(&param)
                    .map(|v| !v.is_null())
                    .unwrap_or(false);
                if !present {
                    return Err(fail(ToolCallErrorKind::ToolParameterNotExist {
                        tool: call.name.clone(),
                        param,
                    }));
                }
            }
        }

        let mut names: Vec<String> = Vec::new();
        for call in &calls {
            if !names.contains(&call.name) {
                names.push(call.name.clone());
            }
        }
        if names.len() > 1 {
            return Err(fail(ToolCallErrorKind::MultipleToolName { names }));
        }

        let first = calls
            .into_iter()
            .next()
            .ok_or_else(|| fail(ToolCallErrorKind::ToolNotExist))?;
        Ok(ParsedToolCalls {
            agent_message,
            tool_calls: vec![first],
        })
    }
}
