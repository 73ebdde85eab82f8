//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SWITCHBOARD__*` 覆盖
//! （双下划线表示嵌套，如 `SWITCHBOARD__ORCHESTRATOR__MAX_REPLANS=5`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::OrchestratorError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorLimits,
}

/// [app] 段：应用名与交给 Planner 的历史窗口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 规划时带入的最近对话轮数
    pub history_window: usize,
    /// 每个会话在内存中保留的轮数
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            history_window: 10,
            max_context_turns: 20,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// deepseek / openai / mock；实际选择还取决于 API Key 是否存在
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 单次 LLM 请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
            request_timeout_secs: 60,
        }
    }
}

/// [orchestrator] 段：全局数值上限，作为值传入 Driver / Replanner 等组件
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrchestratorLimits {
    /// 自计划创建起的墙钟上限
    pub max_execution_time_ms: u64,
    pub max_replans: u32,
    /// 所有版本累计实例化步骤数上限
    pub max_total_steps: usize,
    pub max_retries_per_step: u32,
    pub step_timeout_ms: u64,
    /// prompt 中每个步骤结果的截断字符数
    pub result_preview_chars: usize,
}

impl Default for OrchestratorLimits {
    fn default() -> Self {
        Self {
            max_execution_time_ms: 120_000,
            max_replans: 3,
            max_total_steps: 10,
            max_retries_per_step: 2,
            step_timeout_ms: 60_000,
            result_preview_chars: 500,
        }
    }
}

impl OrchestratorLimits {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

/// 从 config 目录加载配置，环境变量 SWITCHBOARD__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, OrchestratorError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, skipping");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SWITCHBOARD")
            .separator("__")
            .try_parsing(true),
    );

    Ok(builder.build()?.try_deserialize()?)
}
