//! JSON Schema 生成（schemars）
//!
//! - 工具参数 schema 由类型化参数结构体派生，与后端反序列化使用同一份定义；
//! - 工具调用格式 schema 注入规划 system prompt，减少 LLM 输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 工具调用格式：与解析器接受的 `{"name": "...", "kwargs": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，必须是可用工具之一
    pub name: String,
    /// 工具参数，按该工具的 parameters 定义填写
    pub kwargs: HashMap<String, Value>,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 由参数结构体生成 OpenAI 风格的 parameters schema（去掉 $schema / title）
pub fn params_schema<T: JsonSchema>() -> Value {
    let mut value = serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {} })
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.entry("required").or_insert_with(|| Value::Array(Vec::new()));
    }
    value
}
