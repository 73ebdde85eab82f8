//! 编排错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：步骤失败后根据重试计数与重规划额度决定 Retry / Replan / Abort。
//! 能力执行错误属于「数据」，以 StepResult 返回；只有真正意外的错误才走 OrchestratorError。

use thiserror::Error;

/// 编排过程中可能出现的错误（LLM、解析、能力查找、超时、状态异常、配置）
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    /// 单步超过 step_timeout_ms；文本固定，便于上层与 Composer 识别
    #[error("step timeout")]
    StepTimeout,

    #[error("Invalid orchestrator state: {0}")]
    InvalidState(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for OrchestratorError {
    fn from(e: config::ConfigError) -> Self {
        OrchestratorError::Config(e.to_string())
    }
}

/// 恢复引擎针对失败步骤给出的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 原地重跑同一步骤
    Retry,
    /// 重试额度用尽，交给 Replanner 修订计划
    Replan,
    /// 无法再重规划，终止本轮并以 step_failed 合成回复
    Abort,
}
