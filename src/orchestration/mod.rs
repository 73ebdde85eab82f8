//! 编排层：Planner、StepExecutor、Replanner、ResponseComposer 与驱动循环 Orchestrator

pub mod composer;
pub mod driver;
pub mod events;
pub mod executor;
pub mod planner;
pub mod replanner;

pub use composer::{fallback_response, ResponseComposer, GENERIC_FALLBACK_REPLY};
pub use driver::{Orchestrator, FALLBACK_REPLY};
pub use events::OrchestratorEvent;
pub use executor::StepExecutor;
pub use planner::Planner;
pub use replanner::{ReplanTrigger, Replanner};

use crate::core::OrchestratorError;
use crate::llm::LlmClient;
use crate::plan::{parse_plan_draft, PlanDraft};

/// 请求一份计划草稿（Planner 与 Replanner 共用）：调用失败为 Llm 错误，输出无法解析为 JsonParse 错误
pub(crate) async fn request_draft(
    llm: &dyn LlmClient,
    system: &str,
    user: &str,
) -> Result<PlanDraft, OrchestratorError> {
    let output = llm
        .complete_prompt(system, user)
        .await
        .map_err(OrchestratorError::Llm)?;
    parse_plan_draft(&output)
}

/// 去重用的任务键：能力名 + 归一化任务文本（小写、压缩空白）
pub(crate) fn task_key(capability: &str, task: &str) -> (String, String) {
    (
        capability.trim().to_lowercase(),
        task.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase(),
    )
}
