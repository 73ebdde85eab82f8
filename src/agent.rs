//! Headless 运行时
//!
//! 供 CLI 或其他前端调用的无界面入口：create_agent_components 按配置构建 LLM、能力注册表与编排器，
//! process_message 对单条用户输入跑一次编排，并把本轮往返写入会话历史。

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::capability::{AssistantCapability, CapabilityRegistry, EchoCapability};
use crate::config::AppConfig;
use crate::llm::{create_llm_from_config, LlmClient};
use crate::memory::ConversationMemory;
use crate::orchestration::{Orchestrator, OrchestratorEvent};
use crate::plan::{OrchestratorResult, PlanContext, UserProfile};

/// 预构建的组件，可多会话共享
pub struct AgentComponents {
    pub llm: Arc<dyn LlmClient>,
    pub registry: Arc<CapabilityRegistry>,
    pub orchestrator: Orchestrator,
    pub config: AppConfig,
}

/// 内置能力：echo 与通用 assistant
pub fn default_registry(llm: Arc<dyn LlmClient>) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(EchoCapability);
    registry.register(AssistantCapability::new(llm));
    registry
}

/// 按配置创建组件
pub fn create_agent_components(cfg: AppConfig) -> AgentComponents {
    let llm = create_llm_from_config(&cfg.llm);
    create_agent_components_with_llm(cfg, llm, None)
}

/// 使用指定 LLM 创建组件；可选事件通道用于推送编排进度
pub fn create_agent_components_with_llm(
    cfg: AppConfig,
    llm: Arc<dyn LlmClient>,
    event_tx: Option<mpsc::UnboundedSender<OrchestratorEvent>>,
) -> AgentComponents {
    let registry = Arc::new(default_registry(llm.clone()));
    let mut orchestrator =
        Orchestrator::new(llm.clone(), registry.clone(), cfg.orchestrator.clone());
    if let Some(tx) = event_tx {
        orchestrator = orchestrator.with_event_tx(tx);
    }
    tracing::info!(
        capabilities = ?registry.names(),
        max_replans = cfg.orchestrator.max_replans,
        max_total_steps = cfg.orchestrator.max_total_steps,
        "agent components ready"
    );
    AgentComponents {
        llm,
        registry,
        orchestrator,
        config: cfg,
    }
}

/// 处理单条用户消息：以最近 history_window 轮历史构建上下文，编排后把往返写入会话
pub async fn process_message(
    components: &AgentComponents,
    conversation: &mut ConversationMemory,
    profile: UserProfile,
    facts: Vec<String>,
    user_input: &str,
) -> OrchestratorResult {
    let ctx = PlanContext::new(user_input)
        .with_history(conversation.window(components.config.app.history_window))
        .with_facts(facts)
        .with_profile(profile);
    let result = components.orchestrator.orchestrate(&ctx).await;
    conversation.push_turn(user_input, result.response.clone());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[tokio::test]
    async fn test_process_message_records_turn() {
        let llm = Arc::new(ScriptedLlmClient::with_responses([
            r#"{"goal": "echo back", "steps": [{"capability": "echo", "task": "hello"}]}"#,
            "hello",
            r#"{"steps": []}"#,
            "You said hello earlier.",
        ]));
        let components = create_agent_components_with_llm(AppConfig::default(), llm.clone(), None);
        let mut conversation = ConversationMemory::new(components.config.app.max_context_turns);

        let first = process_message(
            &components,
            &mut conversation,
            UserProfile::default(),
            vec![],
            "say hello",
        )
        .await;
        assert!(first.success);
        assert_eq!(first.response, "hello");
        assert_eq!(conversation.len(), 2);

        let second = process_message(
            &components,
            &mut conversation,
            UserProfile::default(),
            vec!["Likes short answers".to_string()],
            "what did I ask?",
        )
        .await;
        assert!(second.success);
        assert_eq!(conversation.len(), 4);
        // 第二轮规划 prompt 含上一轮历史与事实
        let planner_prompt = llm.prompt(2).unwrap();
        assert!(planner_prompt.contains("say hello"));
        assert!(planner_prompt.contains("Likes short answers"));
    }

    #[test]
    fn test_default_registry_has_builtins() {
        let registry = default_registry(Arc::new(ScriptedLlmClient::new()));
        assert_eq!(registry.names(), vec!["assistant".to_string(), "echo".to_string()]);
    }
}
