//! 可观测性
//!
//! 结构化日志：默认 info，可通过 RUST_LOG 覆盖；每次能力调用另有一条 target = "step_audit" 的 JSON 审计记录。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化全局 subscriber；重复调用时忽略（测试中可能多次初始化）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
