//! 阶段图过程事件：用于流式展示阶段进度、trace 与最终答案

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// 进入某个阶段
    StageStarted { stage: String },
    /// 阶段结束（含耗时）
    StageFinished {
        stage: String,
        elapsed_ms: u64,
        ok: bool,
    },
    /// 一条新的 trace 信息
    Trace { text: String },
    /// 路由决策
    Route { from: String, to: String },
    /// 最终答案
    Answer { text: String },
    /// 错误
    Error { text: String },
}

/// 可选的事件发送端；接收方已关闭时静默丢弃
pub type EventSink<'a> = Option<&'a tokio::sync::mpsc::UnboundedSender<FlowEvent>>;

pub(crate) fn emit(sink: EventSink<'_>, event: FlowEvent) {
    if let Some(tx) = sink {
        let _ = tx.send(event);
    }
}
