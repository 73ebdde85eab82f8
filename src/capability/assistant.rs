//! 通用助手能力：用 LLM 直接完成不需要外部系统的任务（总结、起草、解释）
//!
//! 会把此前步骤的结果（截断后）一并交给模型，使后续步骤可以基于前面的产出继续。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::capability::{Capability, CapabilityContext, CapabilityOutput};
use crate::llm::LlmClient;
use crate::plan::truncate_chars;

const SYSTEM_PROMPT: &str = "You are a concise assistant completing one sub-task for a user who reads replies over SMS or chat. \
Answer the task directly in plain text. If earlier results are provided, build on them instead of repeating work.";

/// 单个先前结果放入 prompt 的最大字符数
const PRIOR_RESULT_CHARS: usize = 400;

pub struct AssistantCapability {
    llm: Arc<dyn LlmClient>,
}

impl AssistantCapability {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Capability for AssistantCapability {
    fn name(&self) -> &str {
        "assistant"
    }

    fn description(&self) -> &str {
        "General-purpose writing and reasoning: summarize, draft, explain or answer using earlier step results. No access to external accounts."
    }

    async fn execute(
        &self,
        task: &str,
        ctx: &CapabilityContext<'_>,
    ) -> Result<CapabilityOutput, String> {
        let prior = ctx
            .prior_results
            .iter()
            .filter(|(id, r)| r.success && id.as_str() != ctx.step_id)
            .map(|(id, r)| format!("[{}] {}", id, r.preview(PRIOR_RESULT_CHARS)))
            .collect::<Vec<_>>();
        let prior = if prior.is_empty() {
            "(none)".to_string()
        } else {
            prior.join("\n")
        };

        let user_prompt = format!(
            "Original request: {}\nUser timezone: {}\n\nEarlier results:\n{}\n\nTask: {}",
            ctx.user_message,
            ctx.profile.timezone.as_deref().unwrap_or("UTC"),
            prior,
            task
        );

        let reply = self.llm.complete_prompt(SYSTEM_PROMPT, &user_prompt).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err("assistant returned an empty answer".to_string());
        }
        tracing::debug!(step_id = ctx.step_id, reply = %truncate_chars(reply, 120), "assistant answered");
        Ok(CapabilityOutput::new(json!({ "message": reply })).with_sub_operations(1))
    }
}
