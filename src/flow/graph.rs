//! 阶段图引擎
//!
//! query_preprocess → intention_detection →（FAQ 命中）matched_query_return → final_results_preparation
//!                                        →（有意图）agent ⇄ tools_execution → final_results_preparation
//!                                        →（无意图 / 额度耗尽 / 检索类工具）all_knowledge_retrieve → llm_rag_results_generation
//!
//! 引擎逐阶段执行：调用阶段函数得到 StateUpdate 并合并，再用路由谓词决定下一阶段。
//! 每个阶段包在 tracing span 内并记录耗时；步数超过上界视为图错误。

use std::future::Future;
use std::time::Instant;

use serde_json::json;
use tracing::Instrument;

use crate::core::{AgentError, ChatbotState, IntentType, StateUpdate};
use crate::flow::agent::run_agent_subgraph;
use crate::flow::events::{emit, EventSink, FlowEvent};
use crate::flow::routes::{
    agent_route, all_knowledge_route, intent_route, AgentRoute, RetrieveRoute,
};
use crate::flow::stages;
use crate::flow::FlowContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    QueryPreprocess,
    IntentionDetection,
    MatchedQueryReturn,
    Agent,
    ToolsExecution,
    AllKnowledgeRetrieve,
    LlmRagResultsGeneration,
    FinalResultsPreparation,
    End,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::QueryPreprocess => "query_preprocess",
            Stage::IntentionDetection => "intention_detection",
            Stage::MatchedQueryReturn => "matched_query_return",
            Stage::Agent => "agent",
            Stage::ToolsExecution => "tools_execution",
            Stage::AllKnowledgeRetrieve => "all_knowledge_retrieve",
            Stage::LlmRagResultsGeneration => "llm_rag_results_generation",
            Stage::FinalResultsPreparation => "final_results_preparation",
            Stage::End => "end",
        }
    }
}

/// 图中的一条边（用于渲染）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: &'static str,
    pub to: &'static str,
    pub label: Option<&'static str>,
}

const fn edge(from: &'static str, to: &'static str, label: Option<&'static str>) -> Edge {
    Edge { from, to, label }
}

pub const TOP_LEVEL_EDGES: &[Edge] = &[
    edge("query_preprocess", "intention_detection", None),
    edge("intention_detection", "matched_query_return", Some("similar query found")),
    edge("intention_detection", "agent", Some("intention detected")),
    edge("intention_detection", "all_knowledge_retrieve", Some("no clear intention")),
    edge("matched_query_return", "final_results_preparation", None),
    edge("agent", "tools_execution", Some("valid tool calling")),
    edge("agent", "final_results_preparation", Some("no need tool calling")),
    edge("agent", "all_knowledge_retrieve", Some("force to retrieve all knowledge")),
    edge("tools_execution", "agent", None),
    edge("all_knowledge_retrieve", "llm_rag_results_generation", Some("generate results in rag mode")),
    edge("llm_rag_results_generation", "end", None),
    edge("final_results_preparation", "end", None),
];

pub const AGENT_SUBGRAPH_EDGES: &[Edge] = &[
    edge("agent.plan", "agent.validate", None),
    edge("agent.validate", "agent.plan", Some("invalid tool calling")),
];

/// 执行阶段函数：span + 耗时日志 + 事件；耗时写入 debug_infos.stage_elapsed_ms
pub(crate) async fn monitored<F>(
    name: &'static str,
    events: EventSink<'_>,
    fut: F,
) -> Result<StateUpdate, AgentError>
where
    F: Future<Output = Result<StateUpdate, AgentError>>,
{
    emit(
        events,
        FlowEvent::StageStarted {
            stage: name.to_string(),
        },
    );
    let start = Instant::now();
    let result = fut.instrument(tracing::info_span!("stage", stage = name)).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok(_) => tracing::info!(stage = name, elapsed_ms, "stage finished"),
        Err(e) => tracing::error!(stage = name, elapsed_ms, error = %e, "stage failed"),
    }
    emit(
        events,
        FlowEvent::StageFinished {
            stage: name.to_string(),
            elapsed_ms,
            ok: result.is_ok(),
        },
    );
    result.map(|u| u.debug("stage_elapsed_ms", json!({ name: elapsed_ms })))
}

/// 合并 StateUpdate，并把新增的 trace 行转发为事件
pub(crate) fn apply_update(
    state: &mut ChatbotState,
    update: StateUpdate,
    events: EventSink<'_>,
) -> Result<(), AgentError> {
    let before = state.trace_infos.len();
    state.apply(update)?;
    for line in &state.trace_infos[before..] {
        emit(events, FlowEvent::Trace { text: line.clone() });
    }
    Ok(())
}

pub struct StageGraph {
    ctx: FlowContext,
}

impl StageGraph {
    pub fn new(ctx: FlowContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &FlowContext {
        &self.ctx
    }

    /// 从 query_preprocess 运行到终态；返回设置了 answer 的最终状态
    pub async fn run(
        &self,
        mut state: ChatbotState,
        events: EventSink<'_>,
    ) -> Result<ChatbotState, AgentError> {
        let max_steps = 2 * (state.agent_recursion_limit + 1) + 8;
        let mut stage = Stage::QueryPreprocess;
        let mut steps = 0usize;

        while stage != Stage::End {
            steps += 1;
            if steps > max_steps {
                return Err(AgentError::GraphError(format!(
                    "exceeded {} stage transitions",
                    max_steps
                )));
            }
            if let Err(e) = self.execute_stage(stage, &mut state, events).await {
                emit(events, FlowEvent::Error { text: e.to_string() });
                return Err(e);
            }
            let next = self.next_stage(stage, &mut state)?;
            tracing::debug!(from = stage.as_str(), to = next.as_str(), "route");
            emit(
                events,
                FlowEvent::Route {
                    from: stage.as_str().to_string(),
                    to: next.as_str().to_string(),
                },
            );
            stage = next;
        }

        let answer = state
            .answer()
            .ok_or_else(|| AgentError::GraphError("graph ended without an answer".to_string()))?
            .to_string();
        emit(events, FlowEvent::Answer { text: answer });
        Ok(state)
    }

    async fn execute_stage(
        &self,
        stage: Stage,
        state: &mut ChatbotState,
        events: EventSink<'_>,
    ) -> Result<(), AgentError> {
        let ctx = &self.ctx;
        match stage {
            Stage::Agent => return run_agent_subgraph(ctx, state, events).await,
            Stage::End => return Ok(()),
            _ => {}
        }
        let snapshot: &ChatbotState = state;
        let update = match stage {
            Stage::Agent | Stage::End => return Ok(()),
            Stage::QueryPreprocess => {
                monitored(stage.as_str(), events, stages::query_preprocess(ctx, snapshot)).await?
            }
            Stage::IntentionDetection => {
                monitored(stage.as_str(), events, stages::intention_detection(ctx, snapshot))
                    .await?
            }
            Stage::MatchedQueryReturn => {
                monitored(stage.as_str(), events, stages::matched_query_return(ctx, snapshot))
                    .await?
            }
            Stage::ToolsExecution => {
                monitored(stage.as_str(), events, stages::tools_execution(ctx, snapshot)).await?
            }
            Stage::AllKnowledgeRetrieve => {
                monitored(stage.as_str(), events, stages::all_knowledge_retrieve(ctx, snapshot))
                    .await?
            }
            Stage::LlmRagResultsGeneration => {
                monitored(
                    stage.as_str(),
                    events,
                    stages::llm_rag_results_generation(ctx, snapshot),
                )
                .await?
            }
            Stage::FinalResultsPreparation => {
                monitored(
                    stage.as_str(),
                    events,
                    stages::final_results_preparation(ctx, snapshot),
                )
                .await?
            }
        };
        apply_update(state, update, events)
    }

    /// 路由：谓词给出决策，派生字段显式合并
    fn next_stage(&self, stage: Stage, state: &mut ChatbotState) -> Result<Stage, AgentError> {
        let next = match stage {
            Stage::QueryPreprocess => Stage::IntentionDetection,
            Stage::IntentionDetection => {
                let routed = intent_route(state);
                state.apply(routed.update)?;
                match routed.route {
                    IntentType::SimilarQueryFound => Stage::MatchedQueryReturn,
                    IntentType::IntentionDetected => Stage::Agent,
                    IntentType::NoClearIntention => Stage::AllKnowledgeRetrieve,
                }
            }
            Stage::MatchedQueryReturn => Stage::FinalResultsPreparation,
            Stage::Agent => {
                let routed = agent_route(state);
                state.apply(routed.update)?;
                match routed.route {
                    AgentRoute::ValidToolCalling => Stage::ToolsExecution,
                    AgentRoute::NoNeedToolCalling => Stage::FinalResultsPreparation,
                    AgentRoute::ForceRetrieveAllKnowledge => Stage::AllKnowledgeRetrieve,
                }
            }
            Stage::ToolsExecution => Stage::Agent,
            Stage::AllKnowledgeRetrieve => match all_knowledge_route(state) {
                RetrieveRoute::GenerateRag => Stage::LlmRagResultsGeneration,
            },
            Stage::LlmRagResultsGeneration | Stage::FinalResultsPreparation | Stage::End => {
                Stage::End
            }
        };
        Ok(next)
    }

    /// Mermaid flowchart（含 agent 子图）
    pub fn mermaid() -> String {
        let mut out = String::from("flowchart TD\n");
        for e in TOP_LEVEL_EDGES {
            out.push_str(&render_edge(e));
        }
        out.push_str("    subgraph agent_subgraph [agent]\n");
        for e in AGENT_SUBGRAPH_EDGES {
            out.push_str("    ");
            out.push_str(&render_edge(e));
        }
        out.push_str("    end\n");
        out
    }
}

fn render_edge(e: &Edge) -> String {
    let id = |s: &str| s.replace('.', "_");
    match e.label {
        Some(label) => format!("    {} -->|{}| {}\n", id(e.from), label, id(e.to)),
        None => format!("    {} --> {}\n", id(e.from), id(e.to)),
    }
}
