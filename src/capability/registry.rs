//! 能力注册表
//!
//! 所有能力实现 Capability trait（name / description / allowed_tools / execute），启动时显式注册，
//! 由 StepExecutor 按名查找；描述信息只用于 Planner / Replanner 的 prompt，不参与执行契约。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::plan::{StepResult, UserProfile};

/// 能力执行时可见的上下文：当前步骤、原始请求、此前步骤结果、用户资料
#[derive(Debug, Clone, Copy)]
pub struct CapabilityContext<'a> {
    pub step_id: &'a str,
    pub user_message: &'a str,
    pub prior_results: &'a BTreeMap<String, StepResult>,
    pub profile: &'a UserProfile,
}

/// 能力产出：output 对编排器不透明，可携带 needsReplan 信号与 message / shortUrl 等提示字段
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityOutput {
    pub output: Value,
    pub sub_operations: u32,
}

impl CapabilityOutput {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            sub_operations: 0,
        }
    }

    pub fn with_sub_operations(mut self, count: u32) -> Self {
        self.sub_operations = count;
        self
    }
}

/// 能力 trait：失败以 Err(String) 返回（属于数据而非异常），由 StepExecutor 折叠为 StepResult
#[async_trait]
pub trait Capability: Send + Sync {
    /// 能力名称（计划步骤中的 "capability" 字段）
    fn name(&self) -> &str;

    /// 能力描述（供 LLM 规划时理解用途）
    fn description(&self) -> &str;

    /// 该能力内部可调用的子工具，仅用于 prompt 展示
    fn allowed_tools(&self) -> &[String] {
        &[]
    }

    async fn execute(
        &self,
        task: &str,
        ctx: &CapabilityContext<'_>,
    ) -> Result<CapabilityOutput, String>;
}

/// 能力注册表：按名称存储 Arc<dyn Capability>
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: impl Capability + 'static) {
        self.register_arc(Arc::new(capability));
    }

    pub fn register_arc(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        if self.capabilities.insert(name.clone(), capability).is_some() {
            tracing::warn!(capability = %name, "capability re-registered, previous handler replaced");
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// 按名称排序，保证 prompt 稳定
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    /// 生成 prompt 中的 Available capabilities 段落
    pub fn describe(&self) -> String {
        if self.capabilities.is_empty() {
            return "(no capabilities registered)".to_string();
        }
        self.names()
            .iter()
            .filter_map(|name| self.capabilities.get(name))
            .map(|cap| {
                let tools = cap.allowed_tools();
                if tools.is_empty() {
                    format!("- {}: {}", cap.name(), cap.description())
                } else {
                    format!("- {}: {} (tools: {})", cap.name(), cap.description(), tools.join(", "))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
