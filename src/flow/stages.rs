//! 阶段实现
//!
//! 每个阶段读取当前状态、调用外部协作者（检索 / LLM / 工具），返回 StateUpdate；合并由图引擎负责。
//! 协作者失败（检索错误、LLM 错误、工具后端错误）直接向上返回，本轮终止。

use serde_json::json;

use crate::bot::{IntentionKind, PromptType};
use crate::core::{
    AgentError, AgentOutput, ChatbotState, IntentType, IntentionExample, StateUpdate,
};
use crate::flow::prompts::{planner_messages, rag_messages, rewrite_messages};
use crate::flow::FlowContext;
use crate::llm::CompletionRequest;
use crate::memory::Message;
use crate::retrieval::RetrieveMode;
use crate::tools::{tool_call_schema_json, ToolCallParser};

/// 所有规划都会提供的兜底工具
pub const FINAL_RESPONSE_TOOL: &str = "give_final_response";

fn completion_request(state: &ChatbotState, messages: Vec<Message>) -> CompletionRequest {
    let llm = &state.chatbot_config.llm;
    CompletionRequest::new(&llm.model_id, messages).with_sampling(llm.temperature, llm.max_tokens)
}

/// 有历史且配置了 CONV_SUMMARY 时改写为独立问题；否则原样使用
pub async fn query_preprocess(
    ctx: &FlowContext,
    state: &ChatbotState,
) -> Result<StateUpdate, AgentError> {
    let template = state.chatbot_config.prompt(PromptType::ConvSummary);
    let rewrite = match template {
        Some(template) if !state.chat_history.is_empty() => {
            let messages = rewrite_messages(template, &state.chat_history, &state.query);
            let out = ctx.llm.complete(&completion_request(state, messages)).await?;
            let out = out.trim();
            if out.is_empty() {
                state.query.clone()
            } else {
                out.to_string()
            }
        }
        _ => state.query.clone(),
    };

    Ok(StateUpdate {
        query_rewrite: Some(rewrite.clone()),
        ..Default::default()
    }
    .trace(format!("**query_rewrite:** {}", rewrite))
    .extra("query_rewrite", json!(rewrite)))
}

/// qq 检索意图 few-shot；按各意图检索器的阈值过滤（严格大于）
pub async fn intention_detection(
    ctx: &FlowContext,
    state: &ChatbotState,
) -> Result<StateUpdate, AgentError> {
    let bot = &state.chatbot_config;
    let refs = bot.intention_retriever_refs();
    let docs = if refs.is_empty() {
        Vec::new()
    } else {
        ctx.retriever
            .retrieve(state.effective_query(), &refs, RetrieveMode::Qq)
            .await?
    };

    let mut examples: Vec<IntentionExample> = Vec::new();
    for doc in docs {
        let (threshold, kind) = bot
            .intention_retriever(&doc.source)
            .map(|r| (r.threshold, r.kind))
            .unwrap_or((ctx.intention_threshold, IntentionKind::Intent));
        if doc.score <= threshold {
            continue;
        }
        let example = match kind {
            IntentionKind::Intent => {
                let Some(intent) = doc.answer.clone() else {
                    tracing::warn!(index = %doc.source, "intent example without intent name, skipped");
                    continue;
                };
                IntentionExample {
                    query: doc.content,
                    score: doc.score,
                    intent,
                    kind,
                    kwargs: doc.kwargs,
                    answer: None,
                }
            }
            IntentionKind::Faq => {
                let Some(answer) = doc.answer.clone() else {
                    tracing::warn!(index = %doc.source, "faq example without answer, skipped");
                    continue;
                };
                IntentionExample {
                    query: doc.content,
                    score: doc.score,
                    intent: "faq".to_string(),
                    kind,
                    kwargs: doc.kwargs,
                    answer: Some(answer),
                }
            }
        };
        examples.push(example);
    }
    examples.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut intent_tools: Vec<String> = Vec::new();
    for e in examples.iter().filter(|e| e.kind == IntentionKind::Intent) {
        if !intent_tools.contains(&e.intent) {
            intent_tools.push(e.intent.clone());
        }
    }

    let best_answer = examples
        .first()
        .filter(|e| e.kind == IntentionKind::Faq)
        .and_then(|e| e.answer.clone());
    let intent_type = if examples.is_empty() {
        IntentType::NoClearIntention
    } else if best_answer.is_some() {
        IntentType::SimilarQueryFound
    } else {
        IntentType::IntentionDetected
    };

    let trace = format!(
        "**intention retrieved:**\n{}",
        serde_json::to_string_pretty(&examples).unwrap_or_default()
    );
    tracing::info!(examples = examples.len(), intent_type = %intent_type, "intention detected");
    Ok(StateUpdate {
        intention_fewshot_examples: Some(examples),
        current_intent_tools: Some(intent_tools.clone()),
        intent_type: Some(intent_type),
        matched_answer: best_answer,
        ..Default::default()
    }
    .trace(trace)
    .extra("intent_type", json!(intent_type.as_str()))
    .extra("current_intent_tools", json!(intent_tools)))
}

/// FAQ 命中：答案在 final_results_preparation 中返回
pub async fn matched_query_return(
    _ctx: &FlowContext,
    state: &ChatbotState,
) -> Result<StateUpdate, AgentError> {
    let matched = state
        .intention_fewshot_examples
        .first()
        .map(|e| e.query.clone())
        .unwrap_or_default();
    Ok(StateUpdate::new()
        .trace(format!("**matched query:** {}", matched))
        .extra("current_agent_intent_type", json!("matched_query")))
}

/// 本轮提供给规划模型的工具：意图工具 ∪ bot 启用工具 ∪ give_final_response，去重且必须已注册
pub fn offered_tools(ctx: &FlowContext, state: &ChatbotState) -> Vec<String> {
    let enabled = state
        .chatbot_config
        .enabled_tools(state.user_profile.as_deref());
    let mut names: Vec<String> = Vec::new();
    let candidates = state
        .current_intent_tools
        .iter()
        .cloned()
        .chain(enabled)
        .chain(std::iter::once(FINAL_RESPONSE_TOOL.to_string()));
    for name in candidates {
        if names.contains(&name) {
            continue;
        }
        if !ctx.registry.contains(&name, &state.scene) {
            tracing::warn!(tool = %name, scene = %state.scene, "offered tool not registered, skipped");
            continue;
        }
        names.push(name);
    }
    names
}

/// plan：调用 LLM 产出下一步工具调用；计数加一
pub async fn agent_plan(ctx: &FlowContext, state: &ChatbotState) -> Result<StateUpdate, AgentError> {
    let tool_names = offered_tools(ctx, state);
    let defs = ctx.registry.tool_defs(&tool_names, &state.scene);
    let messages = planner_messages(state, &defs, &tool_call_schema_json());
    let request = completion_request(state, messages);
    let content = ctx.llm.complete(&request).await?;
    let num = state.current_agent_recursion_num + 1;

    let trace = format!(
        "**current_agent_output (#{}):**\n{}",
        num, content
    );
    Ok(StateUpdate {
        current_agent_output: Some(AgentOutput {
            content,
            tool_names,
            model_id: request.model_id,
        }),
        current_agent_recursion_num: Some(num),
        ..Default::default()
    }
    .trace(trace))
}

/// validate：解析并校验最近一次 plan 输出
pub fn agent_validate(ctx: &FlowContext, state: &ChatbotState) -> Result<StateUpdate, AgentError> {
    let output = state
        .current_agent_output
        .as_ref()
        .ok_or_else(|| AgentError::GraphError("validate reached before plan".to_string()))?;
    let parser = ToolCallParser::new(&ctx.registry, &state.scene, &ctx.recovery);

    match parser.parse(&output.content, &output.model_id, &output.tool_names) {
        Ok(parsed) => {
            let names: Vec<&str> = parsed.tool_calls.iter().map(|c| c.name.as_str()).collect();
            let trace = format!("**tool_calls parsed:** {}", names.join(", "));
            let mut update = StateUpdate {
                parse_tool_calling_ok: Some(true),
                agent_chat_history: vec![parsed.agent_message],
                ..Default::default()
            }
            .trace(trace);
            // 首个选中的工具即本轮意图，后续规划不再覆盖
            let intent_unset = state
                .extra_response
                .get("current_agent_intent_type")
                .map_or(true, |v| v.is_null() || v.as_str() == Some(""));
            if let Some(call) = parsed.tool_calls.first().filter(|_| intent_unset) {
                update = update.extra("current_agent_intent_type", json!(call.name));
            }
            update.current_tool_calls = Some(parsed.tool_calls);
            Ok(update)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                recursion_num = state.current_agent_recursion_num,
                "tool call parse failed"
            );
            Ok(StateUpdate {
                parse_tool_calling_ok: Some(false),
                current_tool_calls: Some(Vec::new()),
                agent_chat_history: vec![e.agent_message, e.error_message],
                ..Default::default()
            }
            .trace(format!("**tool_calls parse failed:** {}", e.kind)))
        }
    }
}

/// 执行选中的 LOOP 工具，结果以 tool 消息回灌
pub async fn tools_execution(
    ctx: &FlowContext,
    state: &ChatbotState,
) -> Result<StateUpdate, AgentError> {
    let call = state
        .current_tool_call()
        .ok_or_else(|| AgentError::GraphError("no tool call to execute".to_string()))?;
    let result = ctx
        .executor
        .execute(call, &state.scene, &ctx.tool_context(state))
        .await?;
    let message = result.to_message();
    Ok(StateUpdate {
        agent_chat_history: vec![message],
        ..Default::default()
    }
    .trace(format!(
        "**tool_execute_res:** {} -> {}",
        result.name, result.output.result
    )))
}

/// qd 检索 bot 配置的全部知识库
pub async fn all_knowledge_retrieve(
    ctx: &FlowContext,
    state: &ChatbotState,
) -> Result<StateUpdate, AgentError> {
    let refs = state.chatbot_config.knowledge_retriever_refs();
    let contexts: Vec<String> = if refs.is_empty() {
        Vec::new()
    } else {
        ctx.retriever
            .retrieve(state.effective_query(), &refs, RetrieveMode::Qd)
            .await?
            .into_iter()
            .map(|d| d.content)
            .collect()
    };
    let count = contexts.len();
    Ok(StateUpdate {
        contexts: Some(contexts),
        ..Default::default()
    }
    .trace(format!("**all knowledge retrieved:** {} passages", count))
    .debug("all_knowledge_retrieve", json!({ "passages": count })))
}

/// 以 RAG prompt 生成最终答案（终态）
pub async fn llm_rag_results_generation(
    ctx: &FlowContext,
    state: &ChatbotState,
) -> Result<StateUpdate, AgentError> {
    let messages = rag_messages(
        &state.chatbot_config,
        state.user_profile.as_deref(),
        &state.contexts,
        &state.query,
        &state.chat_history,
    );
    let answer = ctx.llm.complete(&completion_request(state, messages)).await?;
    Ok(StateUpdate::new()
        .trace(format!("**llm_rag_results:** {}", answer))
        .answer(answer))
}

/// 终态：FAQ 答案，或执行选中的 ONCE 工具得到答案（不写入 agent 历史）
pub async fn final_results_preparation(
    ctx: &FlowContext,
    state: &ChatbotState,
) -> Result<StateUpdate, AgentError> {
    if state.intent_type == Some(IntentType::SimilarQueryFound) {
        if let Some(answer) = &state.matched_answer {
            return Ok(StateUpdate::new()
                .trace("**final_results:** matched FAQ answer")
                .answer(answer.clone()));
        }
    }

    let call = state
        .current_tool_call()
        .filter(|_| state.parse_tool_calling_ok)
        .ok_or_else(|| AgentError::GraphError("no terminal tool call selected".to_string()))?;
    let result = ctx
        .executor
        .execute(call, &state.scene, &ctx.tool_context(state))
        .await?;
    Ok(StateUpdate::new()
        .trace(format!("**final_results:** {} -> {}", result.name, result.output.result))
        .extra("current_tool_call", json!({ "name": result.name, "kwargs": result.kwargs }))
        .answer(result.output.result))
}
