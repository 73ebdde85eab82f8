//! LLM 输出的容错结构化解析
//!
//! Planner 与 Replanner 共用：剥离 ```json / ``` 代码块，定位首个 JSON 对象或数组，
//! 逐条解析 steps，单条损坏只丢弃该条；整体无法解析时返回 JsonParse，由调用方降级为空草稿。

use serde::Deserialize;
use serde_json::Value;

use crate::core::OrchestratorError;

/// 模型给出的单步草稿
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "agent")]
    pub capability: String,
    pub task: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl StepDraft {
    /// 模型是否声称该步已完成
    pub fn claims_completed(&self) -> bool {
        matches!(
            self.status.as_deref().map(|s| s.trim().to_lowercase()),
            Some(ref s) if s == "completed" || s == "done"
        )
    }
}

/// 模型给出的计划草稿
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanDraft {
    pub goal: Option<String>,
    pub steps: Vec<StepDraft>,
}

/// 从文本中提取 JSON 片段：优先 ```json 代码块，其次任意 ``` 代码块，最后取最外层 {} 或 []
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + "```json".len()..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        let body = rest.find("```").map(|end| &rest[..end]).unwrap_or(rest);
        // 跳过 ```JSON 之类的语言标注行
        let body = match body.find('\n') {
            Some(nl) if !body[..nl].trim_start().starts_with(['{', '[']) => &body[nl + 1..],
            _ => body,
        };
        return Some(body.trim());
    }

    let obj = trimmed.find('{').zip(trimmed.rfind('}'));
    let arr = trimmed.find('[').zip(trimmed.rfind(']'));
    let pick = match (obj, arr) {
        (Some(o), Some(a)) => Some(if a.0 < o.0 { a } else { o }),
        (o, a) => o.or(a),
    };
    pick.filter(|(start, end)| end > start)
        .map(|(start, end)| &trimmed[start..=end])
}

/// 解析计划草稿；接受 {"goal": ..., "steps": [...]} 或裸数组
pub fn parse_plan_draft(text: &str) -> Result<PlanDraft, OrchestratorError> {
    let json_str = extract_json_block(text)
        .ok_or_else(|| OrchestratorError::JsonParse(format!("no JSON found in: {}", preview(text))))?;
    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| OrchestratorError::JsonParse(format!("{}: {}", e, preview(json_str))))?;

    let (goal, raw_steps) = match value {
        Value::Array(items) => (None, items),
        Value::Object(mut map) => {
            let goal = map
                .get("goal")
                .and_then(|g| g.as_str())
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty());
            let steps = match map.remove("steps") {
                Some(Value::Array(items)) => items,
                Some(_) => {
                    return Err(OrchestratorError::JsonParse(
                        "\"steps\" is not an array".to_string(),
                    ))
                }
                None => Vec::new(),
            };
            (goal, steps)
        }
        _ => {
            return Err(OrchestratorError::JsonParse(format!(
                "expected object or array: {}",
                preview(json_str)
            )))
        }
    };

    let steps = raw_steps
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<StepDraft>(item) {
            Ok(step) if !step.capability.trim().is_empty() && !step.task.trim().is_empty() => {
                Some(step)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed step draft");
                None
            }
        })
        .collect();

    Ok(PlanDraft { goal, steps })
}

fn preview(text: &str) -> String {
    crate::plan::truncate_chars(text, 200)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_object() {
        let text = "Here is the plan:\n```json\n{\"goal\": \"Find the meeting\", \"steps\": [{\"capability\": \"calendar\", \"task\": \"find tomorrow's meeting\"}]}\n```";
        let draft = parse_plan_draft(text).unwrap();
        assert_eq!(draft.goal.as_deref(), Some("Find the meeting"));
        assert_eq!(draft.steps.len(), 1);
        assert_eq!(draft.steps[0].capability, "calendar");
    }

    #[test]
    fn test_parse_plain_fence_with_language_tag() {
        let text = "```JSON\n[{\"agent\": \"email\", \"task\": \"search invoices\"}]\n```";
        let draft = parse_plan_draft(text).unwrap();
        assert_eq!(draft.steps.len(), 1);
        assert_eq!(draft.steps[0].capability, "email");
        assert!(draft.goal.is_none());
    }

    #[test]
    fn test_parse_bare_object_with_prose() {
        let text = "Sure! {\"steps\": []} Let me know.";
        let draft = parse_plan_draft(text).unwrap();
        assert!(draft.steps.is_empty());
    }

    #[test]
    fn test_malformed_step_is_dropped() {
        let text = r#"{"steps": [{"capability": "calendar"}, {"capability": "email", "task": "find receipts", "status": "Done"}, {"capability": "", "task": "x"}]}"#;
        let draft = parse_plan_draft(text).unwrap();
        assert_eq!(draft.steps.len(), 1);
        assert!(draft.steps[0].claims_completed());
    }

    #[test]
    fn test_unparseable_degrades_to_empty() {
        assert!(parse_plan_draft("I could not come up with a plan").is_err());
        assert!(matches!(
            parse_plan_draft("{not json"),
            Err(OrchestratorError::JsonParse(_))
        ));
        assert!(parse_plan_draft("{\"steps\": 5}").is_err());
    }
}
