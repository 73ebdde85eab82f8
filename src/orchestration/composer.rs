//! Response Composer：把计划与所有步骤结果合成为一条自然语言回复
//!
//! 一次 LLM 调用；有失败原因时在 prompt 中明确告知哪一步、什么错误，让模型如实说明而不是编造成功。
//! 自身调用失败时两级降级：先从步骤输出中的 message / shortUrl 等字段拼出确定性回复，
//! 再不行用固定的通用句子，保证每一轮都有回复。

use std::sync::Arc;

use serde_json::Value;

use crate::config::OrchestratorLimits;
use crate::core::OrchestratorError;
use crate::llm::LlmClient;
use crate::plan::{Channel, ExecutionPlan, FailureReason, PlanContext, StepStatus};

const COMPOSER_SYSTEM_PROMPT: &str = "You write the final reply of a personal assistant. \
Use only the step results provided; never claim an action succeeded unless its result says so. \
If something went wrong, say briefly what could not be done and suggest a next step. \
Reply in plain text without markdown.";

/// 最后兜底的通用回复
pub const GENERIC_FALLBACK_REPLY: &str = "Done, but I hit some issues. Let me know if anything is missing.";

/// 确定性降级时从 output 中提取的文本字段
const MESSAGE_FIELDS: [&str; 2] = ["message", "text"];
/// 确定性降级时从 output 中提取的链接字段
const LINK_FIELDS: [&str; 3] = ["shortUrl", "short_url", "url"];

pub struct ResponseComposer {
    llm: Arc<dyn LlmClient>,
    limits: OrchestratorLimits,
}

impl ResponseComposer {
    pub fn new(llm: Arc<dyn LlmClient>, limits: OrchestratorLimits) -> Self {
        Self { llm, limits }
    }

    pub async fn synthesize_response(
        &self,
        ctx: &PlanContext,
        plan: &ExecutionPlan,
        failure: Option<FailureReason>,
    ) -> String {
        let prompt = self.build_prompt(ctx, plan, failure);
        match self.llm.complete_prompt(COMPOSER_SYSTEM_PROMPT, &prompt).await {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(_) => {
                tracing::warn!(plan_id = %plan.id, "composer returned empty reply, using fallback");
                fallback_response(plan)
            }
            Err(e) => {
                let e = OrchestratorError::Llm(e);
                tracing::warn!(plan_id = %plan.id, error = %e, "composer call failed, using fallback");
                fallback_response(plan)
            }
        }
    }

    fn build_prompt(
        &self,
        ctx: &PlanContext,
        plan: &ExecutionPlan,
        failure: Option<FailureReason>,
    ) -> String {
        let mut sections = vec![
            format!("User request: {}", ctx.user_message),
            format!("Goal: {}", plan.goal),
            ctx.profile_section(),
        ];

        if plan.steps.is_empty() {
            sections.push(format!(
                "No capabilities were needed. Answer the request directly.\n\nKnown facts and preferences:\n{}\n\nRecent conversation:\n{}",
                ctx.facts_section(),
                ctx.history_section()
            ));
        } else {
            let results = plan
                .steps
                .iter()
                .map(|s| {
                    let detail = s
                        .result
                        .as_ref()
                        .map(|r| r.preview(self.limits.result_preview_chars))
                        .unwrap_or_else(|| "(not run)".to_string());
                    format!("- [{}] {} ({}): {}\n  {}", s.status, s.capability, s.id, s.task, detail)
                })
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("Step results:\n{results}"));
        }

        if !plan.context.errors.is_empty() {
            let errors = plan
                .context
                .errors
                .iter()
                .map(|e| format!("- {}: {}", e.step_id, e.error))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("Errors encountered along the way:\n{errors}"));
        }

        if let Some(reason) = failure {
            sections.push(failure_framing(plan, reason));
        }

        if ctx.profile.channel == Channel::Sms {
            sections.push("The reply is sent by SMS: keep it under 320 characters.".to_string());
        }

        sections.join("\n\n")
    }
}

fn failure_framing(plan: &ExecutionPlan, reason: FailureReason) -> String {
    match reason {
        FailureReason::Timeout => {
            let done = plan.completed_steps().count();
            format!(
                "IMPORTANT: the request ran out of time before finishing ({} of {} steps completed). \
                 Tell the user what was done and what was not; do not pretend the rest succeeded.",
                done,
                plan.steps.len()
            )
        }
        FailureReason::StepFailed => {
            let failed = plan.steps.iter().rev().find(|s| s.status == StepStatus::Failed);
            let (step, error) = match failed {
                Some(s) => (
                    format!("{} ({})", s.id, s.capability),
                    s.result
                        .as_ref()
                        .and_then(|r| r.error.clone())
                        .unwrap_or_else(|| "unknown error".to_string()),
                ),
                None => ("unknown step".to_string(), "unknown error".to_string()),
            };
            format!(
                "IMPORTANT: step {step} failed and could not be recovered: {error}. \
                 Apologize briefly, explain what could not be done, and do not claim success."
            )
        }
    }
}

/// 不依赖 LLM 的确定性回复：按步骤顺序收集成功输出里的 message 与链接字段，都没有时用通用句子
pub fn fallback_response(plan: &ExecutionPlan) -> String {
    let mut messages: Vec<String> = Vec::new();
    let mut links: Vec<String> = Vec::new();

    let outputs = plan
        .steps
        .iter()
        .filter_map(|s| plan.context.step_results.get(&s.id))
        .chain(
            plan.context
                .step_results
                .iter()
                .filter(|(id, _)| plan.step(id).is_none())
                .map(|(_, r)| r),
        )
        .filter(|r| r.success);

    for result in outputs {
        match &result.output {
            Value::Object(map) => {
                for field in MESSAGE_FIELDS {
                    if let Some(text) = map.get(field).and_then(|v| v.as_str()) {
                        push_unique(&mut messages, text);
                    }
                }
                for field in LINK_FIELDS {
                    if let Some(link) = map.get(field).and_then(|v| v.as_str()) {
                        push_unique(&mut links, link);
                    }
                }
            }
            Value::String(text) => push_unique(&mut messages, text),
            _ => {}
        }
    }

    let mut parts = messages;
    parts.extend(links);
    if parts.is_empty() {
        GENERIC_FALLBACK_REPLY.to_string()
    } else {
        parts.join("\n")
    }
}

fn push_unique(items: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() && !items.iter().any(|v| v == value) {
        items.push(value.to_string());
    }
}
