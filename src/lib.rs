//! Switchboard - 多步骤请求编排器
//!
//! 一次用户回合：Planner 拆解步骤 -> 逐步调用能力（重试 / 重规划 / 终止）-> Composer 合成单条回复。
//!
//! 模块划分：
//! - **agent**: 无头运行时（组件构建、单条消息处理）
//! - **capability**: 能力接口与注册表（echo、assistant）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与失败恢复策略
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 会话历史
//! - **observability**: 日志初始化
//! - **orchestration**: Planner、Executor、Replanner、Composer 与主控 Driver
//! - **plan**: 计划数据模型、回合上下文、编排结果

pub mod agent;
pub mod capability;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod orchestration;
pub mod plan;

pub use orchestration::Orchestrator;
pub use plan::{OrchestratorResult, PlanContext};
