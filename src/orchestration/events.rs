//! 编排事件（供 Web / CLI 等前端展示进度）
//!
//! 驱动循环通过可选的 mpsc 通道推送；没有订阅者时静默丢弃。

use serde::Serialize;

use crate::plan::FailureReason;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    PlanCreated {
        plan_id: String,
        goal: String,
        steps: usize,
    },
    StepStarted {
        step_id: String,
        capability: String,
        attempt: u32,
    },
    StepSucceeded {
        step_id: String,
        duration_ms: u64,
    },
    StepFailed {
        step_id: String,
        error: String,
        retry_count: u32,
    },
    Replanned {
        version: u32,
        trigger_step: String,
        pending_steps: usize,
    },
    TimedOut {
        elapsed_ms: u64,
    },
    Finished {
        success: bool,
        failure_reason: Option<FailureReason>,
    },
}
