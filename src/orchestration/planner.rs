//! Planner：由用户请求与上下文生成初始计划
//!
//! 一次 LLM 调用产出 {"goal", "steps"}；LLM 失败或输出无法解析时返回空计划（等同于「直接回答」），
//! 绝不让规划失败中断本轮。未注册的能力在规划期即被剔除。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::capability::CapabilityRegistry;
use crate::config::OrchestratorLimits;
use crate::llm::LlmClient;
use crate::orchestration::{request_draft, task_key};
use crate::plan::{truncate_chars, ExecutionPlan, PlanContext, PlanDraft, PlanStep};

const PLANNER_SYSTEM_PROMPT: &str = r#"You are the planning component of a personal assistant that users reach over SMS and chat.
Decide which capabilities are needed to satisfy the user's latest message and list them as ordered steps.
Steps run one after another; later steps can use the results of earlier ones.
If the message can be answered directly (greetings, small talk, questions answerable from the conversation), return an empty step list.
Only use capabilities from the provided list.
Respond with a single JSON object and nothing else:
{"goal": "<short summary of intent>", "steps": [{"capability": "<name>", "task": "<what this capability should do>"}]}"#;

/// 目标摘要在无模型输出时取用户消息的前若干字符
const GOAL_FALLBACK_CHARS: usize = 80;

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    registry: Arc<CapabilityRegistry>,
    limits: OrchestratorLimits,
}

impl Planner {
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

    /// 生成 version = 1 的新计划；步骤可能为空
    pub async fn create_plan(&self, ctx: &PlanContext) -> ExecutionPlan {
        let user_prompt = self.build_prompt(ctx);
        let draft = request_draft(self.llm.as_ref(), PLANNER_SYSTEM_PROMPT, &user_prompt)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "plan generation failed, answering directly");
                PlanDraft::default()
            });
        self.build_plan(ctx, draft)
    }

    fn build_prompt(&self, ctx: &PlanContext) -> String {
        format!(
            "Available capabilities:\n{}\n\n{}\nCurrent time (UTC): {}\n\nKnown facts and preferences:\n{}\n\nRecent conversation:\n{}\n\nLatest message: {}",
            self.registry.describe(),
            ctx.profile_section(),
            Utc::now().format("%Y-%m-%d %H:%M"),
            ctx.facts_section(),
            ctx.history_section(),
            ctx.user_message
        )
    }

    /// 草稿转计划：剔除未知能力与重复任务，按步数上限截断，分配 step_1.. 的稳定 id
    pub fn build_plan(&self, ctx: &PlanContext, draft: PlanDraft) -> ExecutionPlan {
        let mut seen = HashSet::new();
        let mut steps = Vec::new();
        for d in draft.steps {
            if !self.registry.contains(&d.capability) {
                tracing::warn!(capability = %d.capability, "planner proposed unknown capability, dropping step");
                continue;
            }
            if !seen.insert(task_key(&d.capability, &d.task)) {
                continue;
            }
            if steps.len() >= self.limits.max_total_steps {
                tracing::warn!(max_total_steps = self.limits.max_total_steps, "initial plan truncated");
                break;
            }
            steps.push(PlanStep::new(
                format!("step_{}", steps.len() + 1),
                d.capability,
                d.task.trim(),
                self.limits.max_retries_per_step,
            ));
        }

        let goal = draft
            .goal
            .unwrap_or_else(|| truncate_chars(ctx.user_message.trim(), GOAL_FALLBACK_CHARS));
        let plan = ExecutionPlan::new(goal, steps);
        tracing::info!(
            plan_id = %plan.id,
            steps = plan.steps.len(),
            goal = %plan.goal,
            "plan created"
        );
        plan
    }
}
