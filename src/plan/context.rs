//! 回合输入上下文：用户消息、有限历史窗口、用户事实/偏好、用户资料（姓名/时区/渠道）

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::memory::{Message, Role};

/// 消息渠道
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Sms,
    Chat,
    Web,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Sms => write!(f, "sms"),
            Channel::Chat => write!(f, "chat"),
            Channel::Web => write!(f, "web"),
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sms" => Ok(Channel::Sms),
            "chat" => Ok(Channel::Chat),
            "web" => Ok(Channel::Web),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// 用户资料
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: Option<String>,
    /// IANA 时区名，如 America/New_York
    pub timezone: Option<String>,
    pub channel: Channel,
}

/// 单个用户回合的只读输入
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    pub user_message: String,
    pub history: Vec<Message>,
    pub facts: Vec<String>,
    pub preferences: Vec<String>,
    pub profile: UserProfile,
}

impl PlanContext {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_facts(mut self, facts: Vec<String>) -> Self {
        self.facts = facts;
        self
    }

    pub fn with_preferences(mut self, preferences: Vec<String>) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn profile_section(&self) -> String {
        format!(
            "User: {}\nTimezone: {}\nChannel: {}",
            self.profile.name.as_deref().unwrap_or("(unknown)"),
            self.profile.timezone.as_deref().unwrap_or("UTC"),
            self.profile.channel
        )
    }

    /// 历史窗口渲染为 "role: content" 行；system 消息不进入 prompt
    pub fn history_section(&self) -> String {
        if self.history.is_empty() {
            return "(no prior messages)".to_string();
        }
        self.history
            .iter()
            .filter_map(|m| match m.role {
                Role::User => Some(format!("user: {}", m.content)),
                Role::Assistant => Some(format!("assistant: {}", m.content)),
                Role::System => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn facts_section(&self) -> String {
        let items: Vec<String> = self
            .facts
            .iter()
            .chain(self.preferences.iter())
            .map(|f| format!("- {f}"))
            .collect();
        if items.is_empty() {
            "(none)".to_string()
        } else {
            items.join("\n")
        }
    }
}
