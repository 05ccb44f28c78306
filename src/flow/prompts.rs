//! Prompt 组装：规划（GENERAL）、RAG 生成、多轮改写（CONV_SUMMARY）
//!
//! bot 配置的 prompt 文本中 `{{user_profile}}` 会被替换为当前用户画像；未配置时使用内置默认模板。

use serde_json::Value;

use crate::bot::{BotConfig, IntentionKind, PromptType};
use crate::core::ChatbotState;
use crate::memory::{render_transcript, Message};

pub const DEFAULT_GENERAL_PROMPT: &str =
    "You are a helpful customer service assistant. Decide which tool to call to serve the user.";

pub const DEFAULT_RAG_PROMPT: &str = "You are a customer service assistant. \
Answer the user's question using only the reference documents below. \
If the documents do not contain the answer, say you don't know.\n\n<docs>\n{context}\n</docs>";

pub const DEFAULT_CONV_SUMMARY_PROMPT: &str = "Given the following conversation and a follow up question, \
rephrase the follow up question to be a standalone question in its original language.\n\n\
Chat History:\n{history}\nFollow Up Input: {question}\nStandalone question:";

/// 替换 `{{user_profile}}` 占位
pub fn fill_user_profile(text: &str, profile: Option<&str>) -> String {
    text.replace("{{user_profile}}", profile.unwrap_or(""))
}

fn system_prompt(bot: &BotConfig, kind: PromptType, profile: Option<&str>, default: &str) -> String {
    let text = bot.prompt(kind).unwrap_or(default);
    fill_user_profile(text, profile)
}

/// 规划阶段的消息：system（prompt + 工具定义 + 调用格式 + few-shot）→ 历史 → 当前 query → agent 历史
pub fn planner_messages(
    state: &ChatbotState,
    tool_defs: &[Value],
    call_schema: &str,
) -> Vec<Message> {
    let mut system = system_prompt(
        &state.chatbot_config,
        PromptType::General,
        state.user_profile.as_deref(),
        DEFAULT_GENERAL_PROMPT,
    );

    system.push_str("\n\n## Tools\n");
    system.push_str(&serde_json::to_string_pretty(tool_defs).unwrap_or_default());
    system.push_str(
        "\n\n## Tool call format\nEach reply must call exactly one tool. \
         Output a single JSON object matching this schema and nothing else:\n",
    );
    system.push_str(call_schema);

    let examples: Vec<_> = state
        .intention_fewshot_examples
        .iter()
        .filter(|e| e.kind == IntentionKind::Intent)
        .collect();
    if !examples.is_empty() {
        system.push_str("\n\n## Examples\n");
        for e in examples {
            let call = serde_json::json!({ "name": e.intent, "kwargs": e.kwargs });
            system.push_str(&format!("query: {}\noutput: {}\n", e.query, call));
        }
    }

    let mut messages = Vec::with_capacity(state.chat_history.len() + state.agent_chat_history.len() + 2);
    messages.push(Message::system(system));
    messages.extend(state.chat_history.iter().cloned());
    messages.push(Message::user(state.effective_query()));
    messages.extend(state.agent_chat_history.iter().cloned());
    messages
}

/// RAG 生成的消息：system 中 `{context}` 被检索段落替换
pub fn rag_messages(
    bot: &BotConfig,
    profile: Option<&str>,
    contexts: &[String],
    query: &str,
    history: &[Message],
) -> Vec<Message> {
    let template = system_prompt(bot, PromptType::Rag, profile, DEFAULT_RAG_PROMPT);
    let context = contexts.join("\n\n");
    let system = if template.contains("{context}") {
        template.replace("{context}", &context)
    } else {
        format!("{}\n\n<docs>\n{}\n</docs>", template, context)
    };

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system));
    messages.extend(history.iter().cloned());
    messages.push(Message::user(query));
    messages
}

/// 多轮改写：CONV_SUMMARY 模板填入 `{history}` 与 `{question}`
pub fn rewrite_messages(template: &str, history: &[Message], question: &str) -> Vec<Message> {
    let prompt = template
        .replace("{history}", &render_transcript(history))
        .replace("{question}", question);
    vec![Message::user(prompt)]
}
