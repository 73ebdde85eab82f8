//! 错误恢复引擎
//!
//! 步骤失败后由 RecoveryEngine 给出 RecoveryAction，驱动循环只负责执行动作，不自行判断。

use crate::core::RecoveryAction;
use crate::plan::PlanStep;

/// 失败步骤的恢复决策：retry_count 未超过 max_retries 时重试，否则视重规划额度决定 Replan / Abort
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 调用前 step.retry_count 必须已计入本次失败
    pub fn on_step_failure(&self, step: &PlanStep, can_replan: bool) -> RecoveryAction {
        if step.retry_count <= step.max_retries {
            RecoveryAction::Retry
        } else if can_replan {
            RecoveryAction::Replan
        } else {
            RecoveryAction::Abort
        }
    }
}
