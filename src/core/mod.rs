//! 核心层：错误类型与失败恢复决策

pub mod error;
pub mod recovery;

pub use error::{OrchestratorError, RecoveryAction};
pub use recovery::RecoveryEngine;
