//! Mock / 脚本化 LLM 客户端（无需 API）
//!
//! - MockLlmClient：未配置 API Key 时的运行时兜底，回显最后一条 User 消息的首行。
//! - ScriptedLlmClient：按顺序返回预置的回复或错误，并记录每次收到的消息，供测试断言 prompt 内容与调用次数。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

/// Mock 客户端：回显用户最后一条消息的首行
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.lines().next())
            .unwrap_or("(no input)");

        Ok(format!("Echo from Mock: {}", last_user))
    }
}

/// 脚本化客户端：队列耗尽后返回错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::new();
        for r in responses {
            client.push_ok(r);
        }
        client
    }

    pub fn push_ok(&self, response: impl Into<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Ok(response.into()));
        }
    }

    pub fn push_err(&self, error: impl Into<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(error.into()));
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// 第 index 次调用收到的全部消息内容（按顺序拼接）
    pub fn prompt(&self, index: usize) -> Option<String> {
        let calls = self.calls.lock().ok()?;
        calls.get(index).map(|msgs| {
            msgs.iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        self.responses
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front()
            .unwrap_or_else(|| Err("scripted LLM exhausted".to_string()))
    }
}
