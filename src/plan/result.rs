//! 编排结果：交给消息处理层投递的最终产物

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::plan::{ExecutionPlan, StepResult};

/// 终止原因：无（完全成功）、超时、步骤失败且无法重规划
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    StepFailed,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::StepFailed => write!(f, "step_failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorResult {
    /// 反映计划实际完成状态，与 Composer 是否走了降级无关
    pub success: bool,
    pub response: String,
    pub step_results: BTreeMap<String, StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
}
