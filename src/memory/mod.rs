//! 记忆层：会话历史（用户事实、偏好等持久存储由外部提供，作为只读输入）

pub mod conversation;

pub use conversation::{ConversationMemory, Message, Role};
