//! 计划与步骤数据模型
//!
//! ExecutionPlan 在一次用户回合内被创建一次，由驱动循环推进步骤状态、由 Replanner 修订步骤列表；
//! id 与 created_at 在整个生命周期（含所有重规划版本）内不变，version 每次重规划严格 +1。

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 步骤状态：pending -> running -> completed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 计划状态：planning -> executing -> (replanning)* -> completed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Planning,
    Executing,
    Replanning,
    Completed,
    Failed,
}

/// 单步执行结果。output 对编排器不透明，唯一会被检查的是其中可选的 needsReplan 信号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 能力内部执行的子操作数（仅转发，不参与控制流）
    #[serde(default)]
    pub sub_operations: u32,
    #[serde(default)]
    pub duration_ms: u64,
}

impl StepResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            sub_operations: 0,
            duration_ms: 0,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            sub_operations: 0,
            duration_ms: 0,
        }
    }

    pub fn with_sub_operations(mut self, count: u32) -> Self {
        self.sub_operations = count;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// 能力在成功后仍可请求转向：output.needsReplan 为 true、非空字符串或 {"reason": ...}
    pub fn replan_signal(&self) -> Option<String> {
        let signal = self
            .output
            .get("needsReplan")
            .or_else(|| self.output.get("needs_replan"))?;
        match signal {
            Value::Bool(true) => Some(
                self.output
                    .get("replanReason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("capability requested a different approach")
                    .to_string(),
            ),
            Value::String(reason) if !reason.trim().is_empty() => Some(reason.trim().to_string()),
            Value::Object(map) => Some(
                map.get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("capability requested a different approach")
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// 供 prompt 使用的结果预览：成功取 output，失败取 error，按字符截断
    pub fn preview(&self, max_chars: usize) -> String {
        let raw = if self.success {
            match &self.output {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            }
        } else {
            self.error.clone().unwrap_or_else(|| "unknown error".to_string())
        };
        truncate_chars(&raw, max_chars)
    }
}

/// 按字符数截断，超出时追加 "..."
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 计划中的一个步骤：一次能力调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub id: String,
    pub capability: String,
    pub task: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl PlanStep {
    pub fn new(
        id: impl Into<String>,
        capability: impl Into<String>,
        task: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            task: task.into(),
            status: StepStatus::Pending,
            result: None,
            retry_count: 0,
            max_retries,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// 失败记录：按发生顺序追加，跨重规划保留
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepError {
    pub step_id: String,
    pub error: String,
}

/// 计划累积的执行上下文：stepResults（step id -> 最近一次结果）与 errors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub step_results: BTreeMap<String, StepResult>,
    pub errors: Vec<StepError>,
}

/// 一次可回复的编排单元
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub id: String,
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub status: PlanStatus,
    pub version: u32,
    pub context: ExecutionContext,
    /// 所有版本累计实例化过的步骤数（步数上限按此计算）
    pub instantiated_steps: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn new(goal: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal: goal.into(),
            instantiated_steps: steps.len(),
            steps,
            status: PlanStatus::Planning,
            version: 1,
            context: ExecutionContext::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 自首次创建起经过的毫秒数（重规划不重置）
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.created_at).num_milliseconds().max(0) as u64
    }

    pub fn first_pending_index(&self) -> Option<usize> {
        self.steps.iter().position(|s| s.status == StepStatus::Pending)
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn completed_steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| s.is_completed())
    }

    /// 本计划用过的全部 step id（当前步骤 + 历史结果），新步骤不得复用
    pub fn used_step_ids(&self) -> HashSet<String> {
        self.steps
            .iter()
            .map(|s| s.id.clone())
            .chain(self.context.step_results.keys().cloned())
            .chain(self.context.errors.iter().map(|e| e.step_id.clone()))
            .collect()
    }

    /// 当前计划中已完成步骤的结果；只有这些对后续步骤可见
    pub fn completed_results(&self) -> BTreeMap<String, StepResult> {
        self.completed_steps()
            .filter_map(|s| {
                self.context
                    .step_results
                    .get(&s.id)
                    .map(|r| (s.id.clone(), r.clone()))
            })
            .collect()
    }

    /// 重试前把步骤退回 pending，并撤下失败尝试的结果（失败记录仍保留在 errors 中）
    pub fn reset_for_retry(&mut self, index: usize) {
        if let Some(step) = self.steps.get_mut(index) {
            step.status = StepStatus::Pending;
            step.result = None;
            self.context.step_results.remove(&step.id);
        }
    }

    /// 写入一次尝试的结果：步骤与 context.step_results 同步。
    /// 调用方负责随后把步骤移出 pending；重试时由 reset_for_retry 撤回结果
    pub fn record_result(&mut self, index: usize, result: StepResult) {
        if let Some(step) = self.steps.get_mut(index) {
            if !result.success {
                self.context.errors.push(StepError {
                    step_id: step.id.clone(),
                    error: result
                        .error
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                });
            }
            self.context
                .step_results
                .insert(step.id.clone(), result.clone());
            step.result = Some(result);
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
