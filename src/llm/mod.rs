//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / 脚本化）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::LlmSection;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use traits::LlmClient;

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let provider = cfg.provider.to_lowercase();
    let deepseek_key = std::env::var("DEEPSEEK_API_KEY").ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient);
    }

    match (provider.as_str(), deepseek_key, openai_key) {
        ("deepseek", Some(key), _) | ("deepseek", None, Some(key)) => {
            let model = cfg.model.clone().unwrap_or_else(|| DEEPSEEK_CHAT.to_string());
            tracing::info!("Using DeepSeek LLM ({})", model);
            Arc::new(OpenAiClient::deepseek(&model, &key, cfg.request_timeout_secs))
        }
        (_, _, Some(key)) => {
            let model = cfg.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            tracing::info!("Using OpenAI-compatible LLM ({})", model);
            Arc::new(OpenAiClient::new(
                cfg.base_url.as_deref(),
                &model,
                &key,
                cfg.request_timeout_secs,
            ))
        }
        _ => {
            tracing::warn!("No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}
