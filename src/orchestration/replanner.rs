//! Replanner：在步骤失败或能力发出 needsReplan 信号时修订计划
//!
//! can_replan 同时检查三个上限（版本数、累计步骤数、自首次创建起的墙钟时间），任一不满足即拒绝。
//! replan 以值接收旧计划、返回新计划：已完成步骤原样保留（id 与结果不变、排在最前），
//! 模型新提出的步骤以 pending 追加；模型调用或解析失败时只保留已完成步骤，不新增工作。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::capability::CapabilityRegistry;
use crate::config::OrchestratorLimits;
use crate::llm::LlmClient;
use crate::orchestration::{request_draft, task_key};
use crate::plan::{ExecutionPlan, PlanContext, PlanDraft, PlanStatus, PlanStep};

const REPLANNER_SYSTEM_PROMPT: &str = r#"You are revising an in-progress plan for a personal assistant reached over SMS and chat.
Some steps have already run. Keep every completed step exactly as it is (same id, status "completed").
Propose only the remaining work needed to satisfy the request, working around the problem described.
Do not repeat work that already succeeded. Only use capabilities from the provided list.
Respond with a single JSON object and nothing else:
{"goal": "<short summary>", "steps": [{"id": "<id>", "capability": "<name>", "task": "<task>", "status": "completed|pending"}]}"#;

/// 触发重规划的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplanTrigger {
    /// 步骤重试额度用尽仍失败
    StepFailed { step_id: String, error: String },
    /// 步骤成功但能力请求转向
    Signal { step_id: String, reason: String },
}

impl ReplanTrigger {
    pub fn step_id(&self) -> &str {
        match self {
            ReplanTrigger::StepFailed { step_id, .. } | ReplanTrigger::Signal { step_id, .. } => {
                step_id
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            ReplanTrigger::StepFailed { step_id, error } => {
                format!("Step {step_id} failed after all retries: {error}")
            }
            ReplanTrigger::Signal { step_id, reason } => {
                format!("Step {step_id} succeeded but asked for a different approach: {reason}")
            }
        }
    }
}

pub struct Replanner {
    llm: Arc<dyn LlmClient>,
    registry: Arc<CapabilityRegistry>,
    limits: OrchestratorLimits,
}

impl Replanner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<CapabilityRegistry>,
        limits: OrchestratorLimits,
    ) -> Self {
        Self {
            llm,
            registry,
            limits,
        }
    }

    pub fn can_replan(&self, plan: &ExecutionPlan) -> bool {
        self.can_replan_at(plan, Utc::now())
    }

    /// 三个上限相互独立，全部通过才允许重规划
    pub fn can_replan_at(&self, plan: &ExecutionPlan, now: DateTime<Utc>) -> bool {
        let within_versions = plan.version <= self.limits.max_replans;
        let within_steps = plan.instantiated_steps < self.limits.max_total_steps;
        let within_time = plan.elapsed_ms(now) < self.limits.max_execution_time_ms;
        if !(within_versions && within_steps && within_time) {
            tracing::debug!(
                plan_id = %plan.id,
                version = plan.version,
                instantiated_steps = plan.instantiated_steps,
                within_versions,
                within_steps,
                within_time,
                "replan not allowed"
            );
        }
        within_versions && within_steps && within_time
    }

    /// 修订计划；永不失败，最坏情况退化为「只保留已完成步骤」
    pub async fn replan(
        &self,
        plan: ExecutionPlan,
        ctx: &PlanContext,
        trigger: &ReplanTrigger,
    ) -> ExecutionPlan {
        let user_prompt = self.build_prompt(&plan, ctx, trigger);
        let draft = request_draft(self.llm.as_ref(), REPLANNER_SYSTEM_PROMPT, &user_prompt)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(plan_id = %plan.id, error = %e, "replan failed, keeping completed steps only");
                PlanDraft::default()
            });
        self.merge(plan, draft)
    }

    fn build_prompt(&self, plan: &ExecutionPlan, ctx: &PlanContext, trigger: &ReplanTrigger) -> String {
        let steps = plan
            .steps
            .iter()
            .map(|s| {
                let detail = s
                    .result
                    .as_ref()
                    .map(|r| r.preview(self.limits.result_preview_chars))
                    .unwrap_or_default();
                format!(
                    "- id={} capability={} status={} task={}\n  result: {}",
                    s.id, s.capability, s.status, s.task, detail
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let remaining = self
            .limits
            .max_total_steps
            .saturating_sub(plan.instantiated_steps);

        format!(
            "Available capabilities:\n{}\n\nOriginal request: {}\nGoal: {}\n\nSteps so far:\n{}\n\nProblem: {}\n\nYou may add at most {} new steps.",
            self.registry.describe(),
            ctx.user_message,
            plan.goal,
            steps,
            trigger.describe(),
            remaining
        )
    }

    /// 合并草稿与历史：
    /// - 已完成步骤全部保留且排在最前，草稿中出现同 id 或标为 completed 的条目一律跳过，绝不重跑；
    /// - 未知能力、与已完成或已接纳步骤同能力同任务的条目被折叠；
    /// - 新步骤以 pending、retry_count = 0 追加，id 与本计划历史冲突时重新分配；
    /// - 新步骤数受累计上限约束，超出部分截断。
    pub fn merge(&self, prior: ExecutionPlan, draft: PlanDraft) -> ExecutionPlan {
        let mut plan = prior;
        let completed: Vec<PlanStep> = plan.completed_steps().cloned().collect();
        let completed_ids: HashSet<String> = completed.iter().map(|s| s.id.clone()).collect();
        let mut seen: HashSet<(String, String)> = completed
            .iter()
            .map(|s| task_key(&s.capability, &s.task))
            .collect();
        let mut used_ids = plan.used_step_ids();
        let budget = self
            .limits
            .max_total_steps
            .saturating_sub(plan.instantiated_steps);

        let mut new_steps: Vec<PlanStep> = Vec::new();
        let mut truncated = 0usize;
        for d in draft.steps {
            // 模型复述的历史步骤（同 id 的已完成步骤，或自称已完成）不产生新工作
            if d.claims_completed()
                || d.id.as_ref().is_some_and(|id| completed_ids.contains(id))
            {
                continue;
            }
            if !self.registry.contains(&d.capability) {
                tracing::warn!(capability = %d.capability, "replanner proposed unknown capability, dropping step");
                continue;
            }
            if !seen.insert(task_key(&d.capability, &d.task)) {
                continue;
            }
            if new_steps.len() >= budget {
                truncated += 1;
                continue;
            }
            let id = match d.id.map(|id| id.trim().to_string()) {
                Some(id) if !id.is_empty() && !used_ids.contains(&id) => id,
                _ => mint_step_id(&used_ids, plan.instantiated_steps + new_steps.len() + 1),
            };
            used_ids.insert(id.clone());
            new_steps.push(PlanStep::new(
                id,
                d.capability,
                d.task.trim(),
                self.limits.max_retries_per_step,
            ));
        }
        if truncated > 0 {
            tracing::warn!(plan_id = %plan.id, truncated, "replan exceeded step ceiling, new steps truncated");
        }

        plan.instantiated_steps += new_steps.len();
        let added = new_steps.len();
        plan.steps = completed;
        plan.steps.extend(new_steps);
        if let Some(goal) = draft.goal {
            plan.goal = goal;
        }
        plan.version += 1;
        plan.status = PlanStatus::Executing;
        plan.touch();

        tracing::info!(
            plan_id = %plan.id,
            version = plan.version,
            kept = plan.steps.len() - added,
            added,
            "plan revised"
        );
        plan
    }
}

/// 从 start 起找第一个未被占用的 step_N
fn mint_step_id(used: &HashSet<String>, start: usize) -> String {
    (start..)
        .map(|n| format!("step_{n}"))
        .find(|id| !used.contains(id))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
