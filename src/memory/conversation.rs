//! 对话历史
//!
//! 每个会话保留最近 N 轮（user/assistant 对），规划时再按 history_window 截取更小的窗口放入 prompt。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// 会话历史：最多保留 max_turns 轮（约 max_turns*2 条消息），超出丢弃最旧部分
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns,
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        let keep = self.max_turns * 2;
        if self.messages.len() > keep {
            self.messages.drain(..self.messages.len() - keep);
        }
    }

    /// 记录一轮完整往返
    pub fn push_turn(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.push(Message::user(user));
        self.push(Message::assistant(assistant));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 最近 turns 轮的 user/assistant 消息（按时间顺序），供 Planner 的历史窗口使用
    pub fn window(&self, turns: usize) -> Vec<Message> {
        let mut recent: Vec<Message> = self
            .messages
            .iter()
            .rev()
            .filter(|m| m.role != Role::System)
            .take(turns * 2)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
