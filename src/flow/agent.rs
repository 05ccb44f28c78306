//! plan/validate 子图：解析失败时带纠错提示重新规划，直到成功或额度耗尽

use crate::core::{AgentError, ChatbotState};
use crate::flow::events::EventSink;
use crate::flow::graph::{apply_update, monitored};
use crate::flow::routes::{agent_loop_route, AgentLoopRoute};
use crate::flow::stages::{agent_plan, agent_validate};
use crate::flow::FlowContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentStep {
    Plan,
    Validate,
}

/// 运行子图；每轮 plan 计数加一，因此最多执行 agent_recursion_limit 次 plan（至少一次）
pub async fn run_agent_subgraph(
    ctx: &FlowContext,
    state: &mut ChatbotState,
    events: EventSink<'_>,
) -> Result<(), AgentError> {
    let mut step = AgentStep::Plan;
    loop {
        match step {
            AgentStep::Plan => {
                let update = monitored("agent.plan", events, agent_plan(ctx, state)).await?;
                apply_update(state, update, events)?;
                step = AgentStep::Validate;
            }
            AgentStep::Validate => {
                let update =
                    monitored("agent.validate", events, async { agent_validate(ctx, state) })
                        .await?;
                apply_update(state, update, events)?;
                match agent_loop_route(state) {
                    AgentLoopRoute::Replan => {
                        tracing::debug!(
                            recursion_num = state.current_agent_recursion_num,
                            "replanning after parse failure"
                        );
                        step = AgentStep::Plan;
                    }
                    AgentLoopRoute::Continue => return Ok(()),
                }
            }
        }
    }
}
