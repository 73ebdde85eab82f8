//! 编排端到端场景：脚本化 LLM + 测试能力，覆盖重试、重规划、超时、降级回复与重规划信号

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use switchboard::capability::{
    Capability, CapabilityContext, CapabilityOutput, CapabilityRegistry, EchoCapability,
};
use switchboard::config::OrchestratorLimits;
use switchboard::llm::ScriptedLlmClient;
use switchboard::orchestration::{Orchestrator, GENERIC_FALLBACK_REPLY};
use switchboard::plan::{FailureReason, PlanContext, PlanStatus, StepStatus};

/// 前 fail_first 次失败，之后返回固定输出；记录调用次数
struct FlakyCapability {
    name: &'static str,
    fail_first: usize,
    output: Value,
    calls: AtomicUsize,
}

impl FlakyCapability {
    fn new(name: &'static str, fail_first: usize, output: Value) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail_first,
            output,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for FlakyCapability {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "test capability"
    }

    async fn execute(
        &self,
        _task: &str,
        _ctx: &CapabilityContext<'_>,
    ) -> Result<CapabilityOutput, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            Err("API error".to_string())
        } else {
            Ok(CapabilityOutput::new(self.output.clone()))
        }
    }
}

struct SleepyCapability {
    delay: Duration,
}

#[async_trait]
impl Capability for SleepyCapability {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "sleeps before answering"
    }

    async fn execute(
        &self,
        task: &str,
        _ctx: &CapabilityContext<'_>,
    ) -> Result<CapabilityOutput, String> {
        tokio::time::sleep(self.delay).await;
        Ok(CapabilityOutput::new(json!({ "message": task })))
    }
}

/// 记录每次调用时可见的此前结果
#[derive(Default)]
struct PeekCapability {
    seen: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Capability for PeekCapability {
    fn name(&self) -> &str {
        "peek"
    }

    fn description(&self) -> &str {
        "reports prior results"
    }

    async fn execute(
        &self,
        _task: &str,
        ctx: &CapabilityContext<'_>,
    ) -> Result<CapabilityOutput, String> {
        let ids: Vec<String> = ctx.prior_results.keys().cloned().collect();
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(ids.clone());
        }
        Ok(CapabilityOutput::new(json!({ "seen": ids })))
    }
}

fn registry(caps: Vec<Arc<dyn Capability>>) -> Arc<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    for cap in caps {
        registry.register_arc(cap);
    }
    Arc::new(registry)
}

fn run_with(
    llm: &Arc<ScriptedLlmClient>,
    registry: Arc<CapabilityRegistry>,
    limits: OrchestratorLimits,
) -> Orchestrator {
    Orchestrator::new(llm.clone(), registry, limits)
}

#[tokio::test]
async fn test_single_step_succeeds_first_try() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        r#"{"goal": "check calendar", "steps": [{"capability": "calendar", "task": "list tomorrow"}]}"#,
        "You have one meeting tomorrow at 3pm.",
    ]));
    let calendar = FlakyCapability::new("calendar", 0, json!({"events": 1}));
    let orchestrator = run_with(
        &llm,
        registry(vec![calendar.clone() as Arc<dyn Capability>]),
        OrchestratorLimits::default(),
    );

    let result = orchestrator
        .orchestrate(&PlanContext::new("what's on tomorrow?"))
        .await;

    assert!(result.success);
    assert_eq!(result.response, "You have one meeting tomorrow at 3pm.");
    assert_eq!(result.step_results.len(), 1);
    assert_eq!(calendar.calls(), 1);
    assert!(result.failure_reason.is_none());
    let plan = result.plan.unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.version, 1);
}

#[tokio::test]
async fn test_step_retried_until_success() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        r#"{"steps": [{"capability": "calendar", "task": "list tomorrow"}]}"#,
        "Done.",
    ]));
    let calendar = FlakyCapability::new("calendar", 2, json!({"events": 0}));
    let orchestrator = run_with(
        &llm,
        registry(vec![calendar.clone() as Arc<dyn Capability>]),
        OrchestratorLimits::default(),
    );

    let result = orchestrator.orchestrate(&PlanContext::new("calendar?")).await;

    assert!(result.success);
    assert_eq!(calendar.calls(), 3);
    let plan = result.plan.unwrap();
    assert_eq!(plan.steps[0].status, StepStatus::Completed);
    assert_eq!(plan.steps[0].retry_count, 2);
    // 两次失败都记录在 errors 中，stepResults 保存最近一次（成功）结果
    assert_eq!(plan.context.errors.len(), 2);
    assert!(result.step_results["step_1"].success);
    // 没有触发重规划：LLM 只调用了 Planner 与 Composer
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn test_exhausted_retries_replan_then_fail() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        r#"{"steps": [{"capability": "broken", "task": "book a table"}]}"#,
        r#"{"steps": [{"capability": "broken", "task": "book a table somewhere else"}]}"#,
        "Sorry, I couldn't book the table.",
    ]));
    let broken = FlakyCapability::new("broken", usize::MAX, Value::Null);
    let limits = OrchestratorLimits {
        max_replans: 1,
        ..OrchestratorLimits::default()
    };
    let orchestrator = run_with(
        &llm,
        registry(vec![broken.clone() as Arc<dyn Capability>]),
        limits,
    );

    let result = orchestrator.orchestrate(&PlanContext::new("book dinner")).await;

    assert!(!result.success);
    assert_eq!(result.failure_reason, Some(FailureReason::StepFailed));
    assert_eq!(result.response, "Sorry, I couldn't book the table.");
    // 两个版本各 3 次尝试
    assert_eq!(broken.calls(), 6);
    // Planner + Replanner 一次 + Composer
    assert_eq!(llm.call_count(), 3);
    assert!(llm.prompt(1).unwrap().contains("API error"));
    assert!(llm.prompt(2).unwrap().contains("failed and could not be recovered"));

    let plan = result.plan.unwrap();
    assert_eq!(plan.version, 2);
    assert_eq!(plan.status, PlanStatus::Failed);
    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].id, "step_2");
    assert_eq!(plan.steps[0].status, StepStatus::Failed);
    assert!(result.error.unwrap().contains("API error"));
}

#[tokio::test]
async fn test_wall_clock_limit_halts_before_next_step() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        r#"{"steps": [
            {"capability": "slow", "task": "first"},
            {"capability": "slow", "task": "second"},
            {"capability": "slow", "task": "third"}
        ]}"#,
        "I ran out of time.",
    ]));
    let limits = OrchestratorLimits {
        max_execution_time_ms: 300,
        ..OrchestratorLimits::default()
    };
    let slow: Arc<dyn Capability> = Arc::new(SleepyCapability {
        delay: Duration::from_millis(200),
    });
    let orchestrator = run_with(
        &llm,
        registry(vec![slow]),
        limits,
    );

    let result = orchestrator.orchestrate(&PlanContext::new("do three things")).await;

    assert!(!result.success);
    assert_eq!(result.failure_reason, Some(FailureReason::Timeout));
    assert!(result.step_results.contains_key("step_1"));
    assert!(!result.step_results.contains_key("step_3"));
    let plan = result.plan.unwrap();
    assert_eq!(plan.status, PlanStatus::Failed);
    assert_eq!(plan.steps[2].status, StepStatus::Pending);
    assert!(llm.prompt(1).unwrap().contains("ran out of time"));
}

#[tokio::test]
async fn test_unparseable_replan_keeps_completed_only() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        r#"{"steps": [{"capability": "echo", "task": "hello"}, {"capability": "broken", "task": "send it"}]}"#,
        "I'm not sure what to do next.",
        "Said hello.",
    ]));
    let broken = FlakyCapability::new("broken", usize::MAX, Value::Null);
    let orchestrator = run_with(
        &llm,
        registry(vec![
            Arc::new(EchoCapability) as Arc<dyn Capability>,
            broken.clone() as Arc<dyn Capability>,
        ]),
        OrchestratorLimits::default(),
    );

    let result = orchestrator.orchestrate(&PlanContext::new("say hello and send")).await;

    let plan = result.plan.unwrap();
    assert_eq!(plan.version, 2);
    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].id, "step_1");
    assert_eq!(plan.steps[0].status, StepStatus::Completed);
    assert_eq!(plan.instantiated_steps, 2);
    assert_eq!(broken.calls(), 3);
    // 没有剩余 pending 步骤，计划按已完成收尾
    assert!(result.success);
    assert_eq!(result.response, "Said hello.");
}

#[tokio::test]
async fn test_composer_failure_uses_step_hints() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        r#"{"steps": [{"capability": "link", "task": "make a payment link"}]}"#,
    ]));
    llm.push_err("upstream 503");
    let link = FlakyCapability::new(
        "link",
        0,
        json!({"message": "Here is your payment link", "shortUrl": "https://sb.ly/pay"}),
    );
    let orchestrator = run_with(
        &llm,
        registry(vec![link as Arc<dyn Capability>]),
        OrchestratorLimits::default(),
    );

    let result = orchestrator.orchestrate(&PlanContext::new("send me a link")).await;

    assert!(result.success);
    assert!(result.response.contains("Here is your payment link"));
    assert!(result.response.contains("https://sb.ly/pay"));
}

#[tokio::test]
async fn test_composer_failure_without_hints_is_generic() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        r#"{"steps": [{"capability": "broken", "task": "do it"}]}"#,
    ]));
    llm.push_err("upstream 503");
    let broken = FlakyCapability::new("broken", usize::MAX, Value::Null);
    let limits = OrchestratorLimits {
        max_replans: 0,
        ..OrchestratorLimits::default()
    };
    let orchestrator = run_with(
        &llm,
        registry(vec![broken.clone() as Arc<dyn Capability>]),
        limits,
    );

    let result = orchestrator.orchestrate(&PlanContext::new("do it")).await;

    // max_replans = 0：重试耗尽后直接终止，不调用 Replanner
    assert_eq!(broken.calls(), 3);
    assert!(!result.success);
    assert_eq!(result.failure_reason, Some(FailureReason::StepFailed));
    assert_eq!(result.response, GENERIC_FALLBACK_REPLY);
}

#[tokio::test]
async fn test_replan_signal_never_reruns_completed_step() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        r#"{"steps": [{"capability": "lookup", "task": "find contact"}, {"capability": "echo", "task": "old follow up"}]}"#,
        r#"{"steps": [
            {"id": "step_1", "capability": "lookup", "task": "find contact", "status": "completed"},
            {"capability": "echo", "task": "ask which contact"}
        ]}"#,
        "Which Alex did you mean?",
    ]));
    let lookup = FlakyCapability::new(
        "lookup",
        0,
        json!({"matches": 2, "needsReplan": {"reason": "multiple contacts match"}}),
    );
    let orchestrator = run_with(
        &llm,
        registry(vec![
            lookup.clone() as Arc<dyn Capability>,
            Arc::new(EchoCapability) as Arc<dyn Capability>,
        ]),
        OrchestratorLimits::default(),
    );

    let result = orchestrator.orchestrate(&PlanContext::new("text Alex")).await;

    assert!(result.success);
    assert_eq!(lookup.calls(), 1);
    assert!(llm.prompt(1).unwrap().contains("multiple contacts match"));

    let plan = result.plan.unwrap();
    assert_eq!(plan.version, 2);
    let ids: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["step_1", "step_3"]);
    assert_eq!(plan.steps[1].task, "ask which contact");
    assert_eq!(
        result.step_results["step_3"].output,
        json!({"message": "ask which contact"})
    );
    assert!(!result.step_results.contains_key("step_2"));
}

#[tokio::test]
async fn test_unknown_capabilities_give_empty_plan() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        r#"{"steps": [{"capability": "teleport", "task": "go to Mars"}]}"#,
        "I can't do that, but here's what I know.",
    ]));
    let echo = FlakyCapability::new("echo", 0, Value::Null);
    let orchestrator = run_with(
        &llm,
        registry(vec![echo.clone() as Arc<dyn Capability>]),
        OrchestratorLimits::default(),
    );

    let result = orchestrator.orchestrate(&PlanContext::new("teleport me")).await;

    assert!(result.success);
    assert!(result.step_results.is_empty());
    assert_eq!(echo.calls(), 0);
}

#[tokio::test]
async fn test_planner_llm_failure_degrades_to_direct_answer() {
    let llm = Arc::new(ScriptedLlmClient::new());
    llm.push_err("connection reset");
    llm.push_ok("Hello!");
    let orchestrator = run_with(
        &llm,
        registry(vec![Arc::new(EchoCapability) as Arc<dyn Capability>]),
        OrchestratorLimits::default(),
    );

    let result = orchestrator.orchestrate(&PlanContext::new("hi")).await;

    assert!(result.success);
    assert_eq!(result.response, "Hello!");
    assert_eq!(result.plan.unwrap().steps.len(), 0);
}

#[tokio::test]
async fn test_last_step_finishing_late_still_succeeds() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        r#"{"steps": [{"capability": "slow", "task": "only"}]}"#,
        "All done.",
    ]));
    let limits = OrchestratorLimits {
        max_execution_time_ms: 100,
        ..OrchestratorLimits::default()
    };
    let slow: Arc<dyn Capability> = Arc::new(SleepyCapability {
        delay: Duration::from_millis(200),
    });
    let orchestrator = run_with(&llm, registry(vec![slow]), limits);

    let result = orchestrator.orchestrate(&PlanContext::new("one slow thing")).await;

    assert!(result.success);
    assert!(result.failure_reason.is_none());
    assert_eq!(result.response, "All done.");
    assert_eq!(result.plan.unwrap().status, PlanStatus::Completed);
    assert!(!llm.prompt(1).unwrap().contains("ran out of time"));
}

#[tokio::test]
async fn test_failed_results_hidden_from_later_steps() {
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        r#"{"steps": [{"capability": "echo", "task": "hello"}, {"capability": "broken", "task": "fetch"}]}"#,
        r#"{"steps": [{"capability": "peek", "task": "look around"}]}"#,
        "Done.",
    ]));
    let broken = FlakyCapability::new("broken", usize::MAX, Value::Null);
    let peek = Arc::new(PeekCapability::default());
    let orchestrator = run_with(
        &llm,
        registry(vec![
            Arc::new(EchoCapability) as Arc<dyn Capability>,
            broken as Arc<dyn Capability>,
            peek.clone() as Arc<dyn Capability>,
        ]),
        OrchestratorLimits::default(),
    );

    let result = orchestrator.orchestrate(&PlanContext::new("hello then fetch")).await;

    assert!(result.success);
    let seen = peek.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![vec!["step_1".to_string()]]);
    // 失败步骤的结果仍记录在编排结果中，只是不对后续步骤可见
    assert!(!result.step_results["step_2"].success);
}
