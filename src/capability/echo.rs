//! Echo 能力（诊断用）：把任务文本原样作为 message 返回

use async_trait::async_trait;
use serde_json::json;

use crate::capability::{Capability, CapabilityContext, CapabilityOutput};

pub struct EchoCapability;

#[async_trait]
impl Capability for EchoCapability {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the task text back (diagnostics only)."
    }

    async fn execute(
        &self,
        task: &str,
        _ctx: &CapabilityContext<'_>,
    ) -> Result<CapabilityOutput, String> {
        if task.trim().is_empty() {
            return Err("nothing to echo".to_string());
        }
        Ok(CapabilityOutput::new(json!({ "message": task })))
    }
}
