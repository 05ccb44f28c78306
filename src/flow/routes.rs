//! 路由谓词
//!
//! 谓词只读取状态，返回路由决策以及需要记录的派生字段（以 StateUpdate 形式），由图引擎显式合并。

use serde_json::json;

use crate::core::{ChatbotState, IntentType, StateUpdate};

/// 路由结果：决策 + 派生字段
#[derive(Debug)]
pub struct Routed<R> {
    pub route: R,
    pub update: StateUpdate,
}

impl<R> Routed<R> {
    fn new(route: R) -> Self {
        Self {
            route,
            update: StateUpdate::new(),
        }
    }
}

/// 意图检测之后的去向；没有任何 few-shot 时一律视为无明确意图
pub fn intent_route(state: &ChatbotState) -> Routed<IntentType> {
    if state.intention_fewshot_examples.is_empty() {
        let mut routed = Routed::new(IntentType::NoClearIntention);
        routed.update = StateUpdate::new().extra("current_agent_intent_type", json!("final_rag"));
        return routed;
    }
    Routed::new(state.intent_type.unwrap_or(IntentType::IntentionDetected))
}

/// plan/validate 子图内：解析失败且还有规划额度时重试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentLoopRoute {
    Replan,
    Continue,
}

pub fn agent_loop_route(state: &ChatbotState) -> AgentLoopRoute {
    if !state.parse_tool_calling_ok
        && state.current_agent_recursion_num < state.agent_recursion_limit
    {
        AgentLoopRoute::Replan
    } else {
        AgentLoopRoute::Continue
    }
}

/// 规划子图之后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRoute {
    /// LOOP 工具：执行后回到规划
    ValidToolCalling,
    /// ONCE 工具：直接准备最终结果
    NoNeedToolCalling,
    /// 额度耗尽、解析失败或选中检索类工具：全量知识检索 + RAG
    ForceRetrieveAllKnowledge,
}

/// 顺序：额度 → 解析结果 → 检索类工具 → LOOP 工具 → 其余
pub fn agent_route(state: &ChatbotState) -> Routed<AgentRoute> {
    let recursion_ok = state.current_agent_recursion_num < state.agent_recursion_limit;
    let current_tool_name = state.current_tool_call().map(|c| c.name.clone());

    let route = if !recursion_ok || !state.parse_tool_calling_ok {
        AgentRoute::ForceRetrieveAllKnowledge
    } else {
        match current_tool_name.as_deref() {
            None => AgentRoute::ForceRetrieveAllKnowledge,
            Some(name) if state.retrieval_tool_names.contains(name) => {
                AgentRoute::ForceRetrieveAllKnowledge
            }
            Some(name) if state.valid_tool_calling_names.contains(name) => {
                AgentRoute::ValidToolCalling
            }
            Some(_) => AgentRoute::NoNeedToolCalling,
        }
    };

    let mut routed = Routed::new(route);
    routed.update = StateUpdate::new().debug(
        "agent_route",
        json!({
            "current_tool_name": current_tool_name,
            "recursion_ok": recursion_ok,
            "recursion_num": state.current_agent_recursion_num,
        }),
    );
    if route == AgentRoute::ForceRetrieveAllKnowledge {
        routed.update = routed
            .update
            .extra("current_agent_intent_type", json!("final_rag"));
    }
    routed
}

/// 全量知识检索之后的去向：只有 RAG 生成一条边
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieveRoute {
    GenerateRag,
}

pub fn all_knowledge_route(_state: &ChatbotState) -> RetrieveRoute {
    RetrieveRoute::GenerateRag
}
