//! 计划层：计划/步骤数据模型、回合输入上下文、编排结果与 LLM 输出解析

pub mod context;
pub mod parse;
pub mod result;
pub mod types;

pub use context::{Channel, PlanContext, UserProfile};
pub use parse::{extract_json_block, parse_plan_draft, PlanDraft, StepDraft};
pub use result::{FailureReason, OrchestratorResult};
pub use types::{
    truncate_chars, ExecutionContext, ExecutionPlan, PlanStatus, PlanStep, StepError, StepResult,
    StepStatus,
};
