//! 能力层：注册表与内置能力（echo / assistant）
//!
//! 日历、邮件、文件等真实能力由部署方实现 Capability 并在启动时注册。

pub mod assistant;
pub mod echo;
pub mod registry;

pub use assistant::AssistantCapability;
pub use echo::EchoCapability;
pub use registry::{Capability, CapabilityContext, CapabilityOutput, CapabilityRegistry};
