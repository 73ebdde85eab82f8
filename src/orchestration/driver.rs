//! 编排驱动：单个用户回合的主控循环
//!
//! Planner 一次 -> 逐步执行（失败重试 / 重规划 / 终止，成功后可按 needsReplan 信号重规划）-> Composer 一次。
//! 每次状态转移以值接收计划并返回新计划，便于逐步测试；每个步骤开始前检查墙钟上限。
//! orchestrate 是唯一的错误边界：内部错误与 panic 都在此转为固定回复与 success = false。

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::mpsc::UnboundedSender;

use crate::capability::CapabilityRegistry;
use crate::config::OrchestratorLimits;
use crate::core::{OrchestratorError, RecoveryAction, RecoveryEngine};
use crate::llm::LlmClient;
use crate::orchestration::{
    OrchestratorEvent, Planner, ReplanTrigger, Replanner, ResponseComposer, StepExecutor,
};
use crate::plan::{
    ExecutionPlan, FailureReason, OrchestratorResult, PlanContext, PlanStatus, StepStatus,
};

/// 错误边界的固定回复（用户永远看不到原始错误或堆栈）
pub const FALLBACK_REPLY: &str = "Sorry, something went wrong on my end. Please try again in a moment.";

/// 一次状态转移后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    /// 执行（或跳过）该下标的步骤
    Continue(usize),
    /// 结束循环，附带终止原因（None 表示全部完成）
    Finish(Option<FailureReason>),
}

/// 编排器：组件与上限在构造时确定，本身无跨回合可变状态，可被多个并发回合共享
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    planner: Planner,
    executor: StepExecutor,
    replanner: Replanner,
    composer: ResponseComposer,
    recovery: RecoveryEngine,
    limits: OrchestratorLimits,
    event_tx: Option<UnboundedSender<OrchestratorEvent>>,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<CapabilityRegistry>,
        limits: OrchestratorLimits,
    ) -> Self {
        Self {
            planner: Planner::new(llm.clone(), registry.clone(), limits.clone()),
            executor: StepExecutor::new(registry.clone(), limits.step_timeout()),
            replanner: Replanner::new(llm.clone(), registry, limits.clone()),
            composer: ResponseComposer::new(llm.clone(), limits.clone()),
            recovery: RecoveryEngine::new(),
            llm,
            limits,
            event_tx: None,
        }
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: UnboundedSender<OrchestratorEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, ev: OrchestratorEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    /// 处理一个用户回合，永不返回错误
    pub async fn orchestrate(&self, ctx: &PlanContext) -> OrchestratorResult {
        match AssertUnwindSafe(self.run(ctx)).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "orchestration aborted");
                self.boundary_result(e.to_string())
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                tracing::error!(panic = %msg, "orchestration panicked");
                self.boundary_result(format!("internal panic: {msg}"))
            }
        }
    }

    fn boundary_result(&self, error: String) -> OrchestratorResult {
        self.emit(OrchestratorEvent::Finished {
            success: false,
            failure_reason: None,
        });
        OrchestratorResult {
            success: false,
            response: FALLBACK_REPLY.to_string(),
            step_results: BTreeMap::new(),
            failure_reason: None,
            error: Some(error),
            plan: None,
        }
    }

    async fn run(&self, ctx: &PlanContext) -> Result<OrchestratorResult, OrchestratorError> {
        let (init_prompt, init_completion, _) = self.llm.token_usage();

        let (plan, failure) = self.drive(ctx).await?;
        let response = self.composer.synthesize_response(ctx, &plan, failure).await;
        let success = plan.status == PlanStatus::Completed;

        let (prompt_tokens, completion_tokens, _) = self.llm.token_usage();
        tracing::info!(
            plan_id = %plan.id,
            version = plan.version,
            steps = plan.steps.len(),
            success,
            failure_reason = ?failure,
            prompt_tokens = prompt_tokens.saturating_sub(init_prompt),
            completion_tokens = completion_tokens.saturating_sub(init_completion),
            "orchestration finished"
        );
        self.emit(OrchestratorEvent::Finished {
            success,
            failure_reason: failure,
        });

        let error = failure.map(|reason| match reason {
            FailureReason::Timeout => "execution time limit exceeded".to_string(),
            FailureReason::StepFailed => plan
                .context
                .errors
                .last()
                .map(|e| format!("{}: {}", e.step_id, e.error))
                .unwrap_or_else(|| reason.to_string()),
        });

        Ok(OrchestratorResult {
            success,
            response,
            step_results: plan.context.step_results.clone(),
            failure_reason: failure,
            error,
            plan: Some(plan),
        })
    }

    /// 规划并推进到终态；返回终态计划与失败原因
    async fn drive(
        &self,
        ctx: &PlanContext,
    ) -> Result<(ExecutionPlan, Option<FailureReason>), OrchestratorError> {
        let mut plan = self.planner.create_plan(ctx).await;
        self.emit(OrchestratorEvent::PlanCreated {
            plan_id: plan.id.clone(),
            goal: plan.goal.clone(),
            steps: plan.steps.len(),
        });

        // 零步骤计划：直接回答，不调用任何能力
        if plan.steps.is_empty() {
            plan.status = PlanStatus::Completed;
            plan.touch();
            return Ok((plan, None));
        }

        plan.status = PlanStatus::Executing;
        plan.touch();

        let mut index = 0;
        loop {
            let (next, transition) = self.advance(plan, index, ctx).await?;
            plan = next;
            match transition {
                Transition::Continue(i) => index = i,
                Transition::Finish(failure) => {
                    plan.status = if failure.is_some() {
                        PlanStatus::Failed
                    } else {
                        PlanStatus::Completed
                    };
                    plan.touch();
                    return Ok((plan, failure));
                }
            }
        }
    }

    /// 单次状态转移
    async fn advance(
        &self,
        mut plan: ExecutionPlan,
        index: usize,
        ctx: &PlanContext,
    ) -> Result<(ExecutionPlan, Transition), OrchestratorError> {
        if index >= plan.steps.len() {
            return Ok((plan, Transition::Finish(None)));
        }
        match plan.steps[index].status {
            StepStatus::Pending => {}
            StepStatus::Completed => return Ok((plan, Transition::Continue(index + 1))),
            other => {
                return Err(OrchestratorError::InvalidState(format!(
                    "step {} is {} when dispatched",
                    plan.steps[index].id, other
                )))
            }
        }

        // 只在即将启动新步骤时检查墙钟；最后一步结束后超时不影响结果
        let elapsed_ms = plan.elapsed_ms(Utc::now());
        if elapsed_ms >= self.limits.max_execution_time_ms {
            tracing::warn!(plan_id = %plan.id, elapsed_ms, "execution time limit reached");
            self.emit(OrchestratorEvent::TimedOut { elapsed_ms });
            return Ok((plan, Transition::Finish(Some(FailureReason::Timeout))));
        }

        plan.steps[index].status = StepStatus::Running;
        let visible = plan.completed_results();
        let step = &plan.steps[index];
        self.emit(OrchestratorEvent::StepStarted {
            step_id: step.id.clone(),
            capability: step.capability.clone(),
            attempt: step.retry_count + 1,
        });
        let result = self
            .executor
            .execute_step(step, ctx, &visible)
            .await;

        let step_id = step.id.clone();
        let success = result.success;
        let duration_ms = result.duration_ms;
        let signal = if success { result.replan_signal() } else { None };
        let error = result
            .error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string());
        plan.record_result(index, result);

        if success {
            plan.steps[index].status = StepStatus::Completed;
            self.emit(OrchestratorEvent::StepSucceeded {
                step_id: step_id.clone(),
                duration_ms,
            });
            if let Some(reason) = signal {
                if self.replanner.can_replan(&plan) {
                    tracing::info!(plan_id = %plan.id, step_id = %step_id, reason = %reason, "capability requested replan");
                    let plan = self
                        .replan(plan, ctx, ReplanTrigger::Signal { step_id, reason })
                        .await;
                    return Ok(resume(plan));
                }
                tracing::info!(plan_id = %plan.id, step_id = %step_id, "replan requested but limits reached, continuing");
            }
            return Ok((plan, Transition::Continue(index + 1)));
        }

        plan.steps[index].retry_count += 1;
        let retry_count = plan.steps[index].retry_count;
        self.emit(OrchestratorEvent::StepFailed {
            step_id: step_id.clone(),
            error: error.clone(),
            retry_count,
        });

        let can_replan = self.replanner.can_replan(&plan);
        match self.recovery.on_step_failure(&plan.steps[index], can_replan) {
            RecoveryAction::Retry => {
                tracing::debug!(plan_id = %plan.id, step_id = %step_id, retry_count, "retrying step");
                plan.reset_for_retry(index);
                Ok((plan, Transition::Continue(index)))
            }
            RecoveryAction::Replan => {
                plan.steps[index].status = StepStatus::Failed;
                let plan = self
                    .replan(plan, ctx, ReplanTrigger::StepFailed { step_id, error })
                    .await;
                Ok(resume(plan))
            }
            RecoveryAction::Abort => {
                tracing::warn!(plan_id = %plan.id, step_id = %step_id, error = %error, "step failed and cannot replan");
                plan.steps[index].status = StepStatus::Failed;
                Ok((plan, Transition::Finish(Some(FailureReason::StepFailed))))
            }
        }
    }

    async fn replan(
        &self,
        mut plan: ExecutionPlan,
        ctx: &PlanContext,
        trigger: ReplanTrigger,
    ) -> ExecutionPlan {
        plan.status = PlanStatus::Replanning;
        let plan = self.replanner.replan(plan, ctx, &trigger).await;
        self.emit(OrchestratorEvent::Replanned {
            version: plan.version,
            trigger_step: trigger.step_id().to_string(),
            pending_steps: plan
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Pending)
                .count(),
        });
        plan
    }
}

/// 重规划后从第一个 pending 步骤继续；没有则结束
fn resume(plan: ExecutionPlan) -> (ExecutionPlan, Transition) {
    match plan.first_pending_index() {
        Some(i) => (plan, Transition::Continue(i)),
        None => (plan, Transition::Finish(None)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
