//! 步骤执行器
//!
//! 持有能力注册表与单步超时，execute_step 按名查找能力并在超时内调用；
//! 未知能力、能力报错、超时都折叠为 success=false 的 StepResult，不向驱动循环抛错。
//! 每次调用输出一条结构化审计日志（JSON）。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::capability::{CapabilityContext, CapabilityRegistry};
use crate::core::OrchestratorError;
use crate::plan::{truncate_chars, PlanContext, PlanStep, StepResult};

pub struct StepExecutor {
    registry: Arc<CapabilityRegistry>,
    timeout: Duration,
}

impl StepExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 执行单个步骤；prior_results 为此前累计的 stepResults
    pub async fn execute_step(
        &self,
        step: &PlanStep,
        ctx: &PlanContext,
        prior_results: &BTreeMap<String, StepResult>,
    ) -> StepResult {
        let start = Instant::now();

        let (result, outcome) = match self.registry.lookup(&step.capability) {
            None => (
                StepResult::failed(
                    OrchestratorError::UnknownCapability(step.capability.clone()).to_string(),
                ),
                "unknown_capability",
            ),
            Some(capability) => {
                let cap_ctx = CapabilityContext {
                    step_id: &step.id,
                    user_message: &ctx.user_message,
                    prior_results,
                    profile: &ctx.profile,
                };
                match timeout(self.timeout, capability.execute(&step.task, &cap_ctx)).await {
                    Ok(Ok(out)) => (
                        StepResult::ok(out.output).with_sub_operations(out.sub_operations),
                        "ok",
                    ),
                    Ok(Err(e)) => (StepResult::failed(e), "error"),
                    Err(_) => (
                        StepResult::failed(OrchestratorError::StepTimeout.to_string()),
                        "timeout",
                    ),
                }
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "step_audit",
            "step_id": step.id,
            "capability": step.capability,
            "attempt": step.retry_count + 1,
            "ok": result.success,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "task_preview": truncate_chars(&step.task, 200),
        });
        tracing::info!(target: "step_audit", audit = %audit.to_string(), "step finished");

        result.with_duration_ms(duration_ms)
    }
}
