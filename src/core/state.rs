//! 单轮对话状态
//!
//! ChatbotState 是阶段图在一轮请求内唯一的可变数据，每个阶段只返回 StateUpdate，由图引擎统一合并：
//! - 普通字段：Some 即覆盖；
//! - agent_chat_history / trace_infos：追加；
//! - extra_response / debug_infos：按 key 嵌套合并；
//! - answer：只能写一次；current_agent_recursion_num：每次只能加一。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bot::{BotConfig, IntentionKind};
use crate::core::AgentError;
use crate::memory::Message;
use crate::tools::{ToolCall, COMMON_SCENE};

/// 意图检测结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    SimilarQueryFound,
    IntentionDetected,
    NoClearIntention,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::SimilarQueryFound => "similar query found",
            IntentType::IntentionDetected => "intention detected",
            IntentType::NoClearIntention => "no clear intention",
        }
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 通过阈值的意图 few-shot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentionExample {
    pub query: String,
    pub score: f32,
    /// 意图名（即工具名）；FAQ 命中时为 "faq"
    pub intent: String,
    pub kind: IntentionKind,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    /// FAQ 命中时可直接返回的答案
    #[serde(default)]
    pub answer: Option<String>,
}

/// 最近一次 plan 的输出
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentOutput {
    pub content: String,
    /// 本轮提供给模型的工具名
    pub tool_names: Vec<String>,
    pub model_id: String,
}

#[derive(Debug, Clone)]
pub struct ChatbotState {
    pub chatbot_config: BotConfig,
    pub query: String,
    pub query_rewrite: Option<String>,
    pub chat_history: Vec<Message>,
    pub user_profile: Option<String>,
    pub scene: String,
    pub session_id: String,
    pub message_id: String,
    pub enable_trace: bool,
    pub trace_infos: Vec<String>,
    pub extra_response: Map<String, Value>,
    pub debug_infos: Map<String, Value>,

    pub intention_fewshot_examples: Vec<IntentionExample>,
    pub current_intent_tools: Vec<String>,
    pub intent_type: Option<IntentType>,
    pub matched_answer: Option<String>,
    pub contexts: Vec<String>,

    pub agent_recursion_limit: usize,
    pub current_agent_recursion_num: usize,
    pub current_agent_output: Option<AgentOutput>,
    pub parse_tool_calling_ok: bool,
    pub current_tool_calls: Vec<ToolCall>,
    pub agent_chat_history: Vec<Message>,
    /// 选中即强制全量知识检索的工具
    pub retrieval_tool_names: BTreeSet<String>,
    /// LOOP 模式工具（选中即执行并回到规划）
    pub valid_tool_calling_names: BTreeSet<String>,

    answer: Option<String>,
}

impl ChatbotState {
    pub fn new(chatbot_config: BotConfig, query: impl Into<String>) -> Self {
        Self {
            chatbot_config,
            query: query.into(),
            query_rewrite: None,
            chat_history: Vec::new(),
            user_profile: None,
            scene: COMMON_SCENE.to_string(),
            session_id: String::new(),
            message_id: String::new(),
            enable_trace: true,
            trace_infos: Vec::new(),
            extra_response: Map::new(),
            debug_infos: Map::new(),
            intention_fewshot_examples: Vec::new(),
            current_intent_tools: Vec::new(),
            intent_type: None,
            matched_answer: None,
            contexts: Vec::new(),
            agent_recursion_limit: 5,
            current_agent_recursion_num: 0,
            current_agent_output: None,
            parse_tool_calling_ok: false,
            current_tool_calls: Vec::new(),
            agent_chat_history: Vec::new(),
            retrieval_tool_names: BTreeSet::new(),
            valid_tool_calling_names: BTreeSet::new(),
            answer: None,
        }
    }

    pub fn with_chat_history(mut self, history: Vec<Message>) -> Self {
        self.chat_history = history;
        self
    }

    pub fn with_scene(mut self, scene: impl Into<String>) -> Self {
        self.scene = scene.into();
        self
    }

    pub fn with_user_profile(mut self, profile: Option<String>) -> Self {
        self.user_profile = profile;
        self
    }

    pub fn with_ids(mut self, session_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self.message_id = message_id.into();
        self
    }

    pub fn with_trace(mut self, enable: bool) -> Self {
        self.enable_trace = enable;
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.agent_recursion_limit = limit;
        self
    }

    pub fn with_retrieval_tool_names(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.retrieval_tool_names = names.into_iter().collect();
        self
    }

    pub fn with_valid_tool_calling_names(mut self, names: BTreeSet<String>) -> Self {
        self.valid_tool_calling_names = names;
        self
    }

    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    /// 检索与改写后续阶段使用的查询
    pub fn effective_query(&self) -> &str {
        self.query_rewrite.as_deref().unwrap_or(&self.query)
    }

    /// 已校验的工具调用（成功时恰好一个）
    pub fn current_tool_call(&self) -> Option<&ToolCall> {
        self.current_tool_calls.first()
    }

    /// 合并一个阶段的输出
    pub fn apply(&mut self, update: StateUpdate) -> Result<(), AgentError> {
        if let Some(n) = update.current_agent_recursion_num {
            if n != self.current_agent_recursion_num + 1 {
                return Err(AgentError::GraphError(format!(
                    "recursion counter must advance by one ({} -> {})",
                    self.current_agent_recursion_num, n
                )));
            }
        }
        if let Some(answer) = update.answer {
            if self.answer.is_some() {
                return Err(AgentError::GraphError("answer already set".to_string()));
            }
            self.answer = Some(answer);
        }

        if let Some(v) = update.query_rewrite {
            self.query_rewrite = Some(v);
        }
        if let Some(v) = update.intention_fewshot_examples {
            self.intention_fewshot_examples = v;
        }
        if let Some(v) = update.current_intent_tools {
            self.current_intent_tools = v;
        }
        if let Some(v) = update.intent_type {
            self.intent_type = Some(v);
        }
        if let Some(v) = update.matched_answer {
            self.matched_answer = Some(v);
        }
        if let Some(v) = update.contexts {
            self.contexts = v;
        }
        if let Some(v) = update.current_agent_output {
            self.current_agent_output = Some(v);
        }
        if let Some(n) = update.current_agent_recursion_num {
            self.current_agent_recursion_num = n;
        }
        if let Some(v) = update.parse_tool_calling_ok {
            self.parse_tool_calling_ok = v;
        }
        if let Some(v) = update.current_tool_calls {
            self.current_tool_calls = v;
        }

        self.agent_chat_history.extend(update.agent_chat_history);
        if self.enable_trace {
            self.trace_infos.extend(update.trace_infos);
        }
        merge_nested(&mut self.extra_response, update.extra_response);
        merge_nested(&mut self.debug_infos, update.debug_infos);
        Ok(())
    }
}

/// 递归合并：两边都是对象时逐 key 合并，否则覆盖
pub fn merge_nested(dst: &mut Map<String, Value>, src: Map<String, Value>) {
    for (key, value) in src {
        match (dst.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_nested(existing, incoming);
            }
            (_, value) => {
                dst.insert(key, value);
            }
        }
    }
}

/// 阶段输出：只包含该阶段写入的字段
#[derive(Debug, Default)]
pub struct StateUpdate {
    pub query_rewrite: Option<String>,
    pub intention_fewshot_examples: Option<Vec<IntentionExample>>,
    pub current_intent_tools: Option<Vec<String>>,
    pub intent_type: Option<IntentType>,
    pub matched_answer: Option<String>,
    pub contexts: Option<Vec<String>>,
    pub current_agent_output: Option<AgentOutput>,
    pub current_agent_recursion_num: Option<usize>,
    pub parse_tool_calling_ok: Option<bool>,
    pub current_tool_calls: Option<Vec<ToolCall>>,
    pub agent_chat_history: Vec<Message>,
    pub trace_infos: Vec<String>,
    pub extra_response: Map<String, Value>,
    pub debug_infos: Map<String, Value>,
    pub answer: Option<String>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trace(mut self, line: impl Into<String>) -> Self {
        self.trace_infos.push(line.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_response.insert(key.into(), value);
        self
    }

    pub fn debug(mut self, key: impl Into<String>, value: Value) -> Self {
        merge_nested(
            &mut self.debug_infos,
            Map::from_iter([(key.into(), value)]),
        );
        self
    }

    pub fn answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bot() -> BotConfig {
        toml::from_str("bot_id = \"b\"\nname = \"b\"\n[llm]\nmodel_id = \"m\"\n").unwrap()
    }

    #[test]
    fn test_answer_set_once() {
        let mut state = ChatbotState::new(bot(), "q");
        state.apply(StateUpdate::new().answer("a")).unwrap();
        assert_eq!(state.answer(), Some("a"));
        let err = state.apply(StateUpdate::new().answer("b")).unwrap_err();
        assert!(matches!(err, AgentError::GraphError(_)));
        assert_eq!(state.answer(), Some("a"));
    }

    #[test]
    fn test_recursion_counter_advances_by_one() {
        let mut state = ChatbotState::new(bot(), "q");
        let step = |n| StateUpdate {
            current_agent_recursion_num: Some(n),
            ..Default::default()
        };
        state.apply(step(1)).unwrap();
        state.apply(step(2)).unwrap();
        assert!(state.apply(step(4)).is_err());
        assert_eq!(state.current_agent_recursion_num, 2);
    }

    #[test]
    fn test_accumulators() {
        let mut state = ChatbotState::new(bot(), "q");
        state
            .apply(StateUpdate {
                agent_chat_history: vec![Message::assistant("a1")],
                ..Default::default()
            }
            .trace("t1")
            .extra("ref", json!({"docs": 1}))
            .debug("stage_elapsed_ms", json!({"plan": 3})))
            .unwrap();
        state
            .apply(StateUpdate {
                agent_chat_history: vec![Message::tool("r1")],
                ..Default::default()
            }
            .trace("t2")
            .extra("ref", json!({"intent": "x"}))
            .debug("stage_elapsed_ms", json!({"validate": 1})))
            .unwrap();

        assert_eq!(state.agent_chat_history.len(), 2);
        assert_eq!(state.trace_infos, vec!["t1", "t2"]);
        assert_eq!(state.extra_response["ref"], json!({"docs": 1, "intent": "x"}));
        assert_eq!(
            state.debug_infos["stage_elapsed_ms"],
            json!({"plan": 3, "validate": 1})
        );
    }

    #[test]
    fn test_trace_disabled() {
        let mut state = ChatbotState::new(bot(), "q").with_trace(false);
        state.apply(StateUpdate::new().trace("hidden")).unwrap();
        assert!(state.trace_infos.is_empty());
    }

    #[test]
    fn test_scalar_overwrite() {
        let mut state = ChatbotState::new(bot(), "q");
        state
            .apply(StateUpdate {
                parse_tool_calling_ok: Some(true),
                contexts: Some(vec!["c".into()]),
                ..Default::default()
            })
            .unwrap();
        state
            .apply(StateUpdate {
                parse_tool_calling_ok: Some(false),
                ..Default::default()
            })
            .unwrap();
        assert!(!state.parse_tool_calling_ok);
        assert_eq!(state.contexts, vec!["c".to_string()]);
    }
}
