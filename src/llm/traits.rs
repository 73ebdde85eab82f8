//! LLM 客户端抽象
//!
//! 编排器只依赖「输入消息、产出文本」：Planner / Replanner / Composer 与 assistant 能力都通过 LlmClient 调用，
//! 不绑定任何厂商的请求/响应格式。

use async_trait::async_trait;

use crate::memory::Message;

/// LLM 客户端 trait：消息列表完成与 system/user 两段 prompt 完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// system + user 两段 prompt 的便捷形式
    async fn complete_prompt(&self, system: &str, user: &str) -> Result<String, String> {
        self.complete(&[Message::system(system), Message::user(user)])
            .await
    }

    /// 累计 token 使用：(prompt_tokens, completion_tokens, total_tokens)，默认 (0, 0, 0)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
