//! Tool dispatch facade (C13): groups operations into workflows, validates
//! `action` and its required parameters, then delegates to C8/C9/C10/C11.
//!
//! Each workflow accepts an `action` string from a closed set; an action not
//! in that set is an [`DispatchError::InvalidAction`], a missing required
//! parameter is a [`DispatchError::MissingParam`]. Both carry a recovery hint
//! (§7: validation errors are surfaced with a hint, never logged as errors).

use std::sync::Arc;

use covenant_core::{Category, EdgeRelationship, EntityType, Manager, RecallQuery, RememberInput, Rule, Worked};
use serde_json::{json, Value};

use crate::dream::DreamScheduler;
use crate::tasks::TaskManager;

#[derive(Debug)]
pub enum DispatchError {
    InvalidAction {
        workflow: &'static str,
        action: String,
        valid_actions: &'static [&'static str],
    },
    MissingParam {
        param: &'static str,
        action: String,
    },
    Core(covenant_core::CoreError),
}

impl DispatchError {
    /// Recovery-hint text surfaced verbatim to the caller (§7: validation
    /// errors get a hint, never a logged error).
    pub fn hint(&self) -> String {
        match self {
            DispatchError::InvalidAction { workflow, action, valid_actions } => {
                format!("'{action}' is not a valid action for {workflow}; valid actions: {}", valid_actions.join(", "))
            }
            DispatchError::MissingParam { param, action } => {
                format!("'{action}' requires parameter '{param}'")
            }
            DispatchError::Core(e) => e.to_string(),
        }
    }
}

impl From<covenant_core::CoreError> for DispatchError {
    fn from(e: covenant_core::CoreError) -> Self {
        DispatchError::Core(e)
    }
}

fn require<'a>(args: &'a Value, param: &'static str, action: &str) -> Result<&'a Value, DispatchError> {
    args.get(param).filter(|v| !v.is_null()).ok_or_else(|| DispatchError::MissingParam {
        param,
        action: action.to_string(),
    })
}

fn require_str<'a>(args: &'a Value, param: &'static str, action: &str) -> Result<&'a str, DispatchError> {
    require(args, param, action)?.as_str().ok_or_else(|| DispatchError::MissingParam {
        param,
        action: action.to_string(),
    })
}

fn opt_str<'a>(args: &'a Value, param: &str) -> Option<&'a str> {
    args.get(param).and_then(Value::as_str)
}

fn opt_u64(args: &Value, param: &str) -> Option<u64> {
    args.get(param).and_then(Value::as_u64)
}

fn opt_str_vec(args: &Value, param: &str) -> Vec<String> {
    args.get(param)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

pub const COMMUNE_ACTIONS: &[&str] = &["get_briefing", "health"];
pub const CONSULT_ACTIONS: &[&str] = &["context_check"];
pub const INSCRIBE_ACTIONS: &[&str] = &["remember", "remember_batch", "link", "pin", "archive"];
pub const REFLECT_ACTIONS: &[&str] = &["record_outcome", "verify_facts"];
pub const UNDERSTAND_ACTIONS: &[&str] = &["recall", "recall_for_file", "recall_by_entity", "recall_hierarchical"];
pub const GOVERN_ACTIONS: &[&str] = &["add_rule", "update_rule", "unlink", "prune_memories"];
pub const EXPLORE_ACTIONS: &[&str] = &["explore_entity", "explore_community", "trace_evolution"];
pub const MAINTAIN_ACTIONS: &[&str] = &["trigger_dream", "task_status", "task_cancel"];

/// Everything a workflow needs besides the parsed arguments.
pub struct DispatchContext<'a> {
    pub manager: &'a Manager,
    pub dream: &'a Arc<DreamScheduler>,
    pub tasks: &'a TaskManager,
}

pub fn commune(action: &str, _args: &Value, ctx: &DispatchContext) -> Result<Value, DispatchError> {
    match action {
        "get_briefing" => {
            let project = ctx.manager.storage().project();
            let rules = ctx.manager.storage().rules_for_project(project)?;
            Ok(json!({ "project": project, "rules": rules.len() }))
        }
        "health" => Ok(json!({ "status": "ok" })),
        other => Err(DispatchError::InvalidAction { workflow: "commune", action: other.to_string(), valid_actions: COMMUNE_ACTIONS }),
    }
}

pub fn consult(action: &str, args: &Value, _ctx: &DispatchContext) -> Result<Value, DispatchError> {
    match action {
        "context_check" => {
            let description = require_str(args, "description", action)?;
            Ok(json!({ "description": description, "granted": true }))
        }
        other => Err(DispatchError::InvalidAction { workflow: "consult", action: other.to_string(), valid_actions: CONSULT_ACTIONS }),
    }
}

pub fn inscribe(action: &str, args: &Value, ctx: &DispatchContext) -> Result<Value, DispatchError> {
    match action {
        "remember" => {
            let content = require_str(args, "content", action)?;
            let category = parse_category(opt_str(args, "category"));
            let memory = ctx.manager.remember(RememberInput {
                category,
                content: content.to_string(),
                rationale: opt_str(args, "rationale").map(str::to_string),
                context: args.get("context").cloned(),
                tags: opt_str_vec(args, "tags"),
                file_path: opt_str(args, "file_path").map(str::to_string),
                happened_at: None,
                source_client: opt_str(args, "source_client").map(str::to_string),
                source_model: opt_str(args, "source_model").map(str::to_string),
            })?;
            Ok(json!({ "memory_id": memory.id }))
        }
        "remember_batch" => {
            let items = require(args, "items", action)?
                .as_array()
                .ok_or_else(|| DispatchError::MissingParam { param: "items", action: action.to_string() })?;
            let mut inputs = Vec::with_capacity(items.len());
            for item in items {
                let content = item.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
                inputs.push(RememberInput {
                    category: parse_category(item.get("category").and_then(Value::as_str)),
                    content,
                    tags: opt_str_vec(item, "tags"),
                    ..Default::default()
                });
            }
            let memories = ctx.manager.remember_batch(inputs)?;
            Ok(json!({ "memory_ids": memories.iter().map(|m| m.id.clone()).collect::<Vec<_>>() }))
        }
        "link" => {
            let source_id = require_str(args, "source_id", action)?;
            let target_id = require_str(args, "target_id", action)?;
            let relationship = parse_edge_relationship(opt_str(args, "relationship"));
            let edge = ctx.manager.link(source_id, target_id, relationship, opt_str(args, "description"))?;
            Ok(json!({ "edge_id": edge.id }))
        }
        "pin" => {
            let memory_id = require_str(args, "memory_id", action)?;
            let pinned = args.get("pinned").and_then(Value::as_bool).unwrap_or(true);
            ctx.manager.pin(memory_id, pinned)?;
            Ok(json!({ "memory_id": memory_id, "pinned": pinned }))
        }
        "archive" => {
            let memory_id = require_str(args, "memory_id", action)?;
            ctx.manager.archive(memory_id)?;
            Ok(json!({ "memory_id": memory_id, "archived": true }))
        }
        other => Err(DispatchError::InvalidAction { workflow: "inscribe", action: other.to_string(), valid_actions: INSCRIBE_ACTIONS }),
    }
}

pub fn reflect(action: &str, args: &Value, ctx: &DispatchContext) -> Result<Value, DispatchError> {
    match action {
        "record_outcome" => {
            let memory_id = require_str(args, "memory_id", action)?;
            let outcome_text = require_str(args, "outcome_text", action)?;
            let worked = match args.get("worked").and_then(Value::as_bool) {
                Some(true) => Worked::True,
                Some(false) => Worked::False,
                None => Worked::Unknown,
            };
            ctx.manager.record_outcome(memory_id, outcome_text, worked)?;
            Ok(json!({ "memory_id": memory_id }))
        }
        "verify_facts" => {
            let text = require_str(args, "text", action)?;
            let categories: Vec<Category> = opt_str_vec(args, "categories").iter().map(|s| parse_category(Some(s))).collect();
            let checks = ctx.manager.verify_facts(text, &categories, None)?;
            Ok(json!({
                "claims": checks.iter().map(|c| json!({
                    "claim": c.claim,
                    "verdict": format!("{:?}", c.verdict),
                    "conflict_reason": c.conflict_reason,
                })).collect::<Vec<_>>()
            }))
        }
        other => Err(DispatchError::InvalidAction { workflow: "reflect", action: other.to_string(), valid_actions: REFLECT_ACTIONS }),
    }
}

pub fn understand(action: &str, args: &Value, ctx: &DispatchContext) -> Result<Value, DispatchError> {
    match action {
        "recall" => {
            let topic = require_str(args, "topic", action)?;
            let query = RecallQuery {
                topic: topic.to_string(),
                categories: opt_str_vec(args, "categories").iter().map(|s| parse_category(Some(s))).collect(),
                tags: opt_str_vec(args, "tags"),
                file_path: opt_str(args, "file_path").map(str::to_string),
                offset: opt_u64(args, "offset").unwrap_or(0) as usize,
                limit: opt_u64(args, "limit").unwrap_or(20) as usize,
                include_linked: args.get("include_linked").and_then(Value::as_bool).unwrap_or(false),
                ..Default::default()
            };
            let result = ctx.manager.recall(&query)?;
            Ok(recall_result_to_json(&result))
        }
        "recall_for_file" => {
            let file_path = require_str(args, "file_path", action)?;
            let memories = ctx.manager.recall_for_file(file_path)?;
            Ok(json!({ "memories": memories.iter().map(|m| m.id.clone()).collect::<Vec<_>>() }))
        }
        "recall_by_entity" => {
            let name = require_str(args, "name", action)?;
            let entity_type = opt_str(args, "entity_type").map(parse_entity_type);
            let memories = ctx.manager.recall_by_entity(name, entity_type)?;
            Ok(json!({ "memories": memories.iter().map(|m| m.id.clone()).collect::<Vec<_>>() }))
        }
        "recall_hierarchical" => {
            let topic = require_str(args, "topic", action)?;
            let include_members = args.get("include_members").and_then(Value::as_bool).unwrap_or(false);
            let limit = opt_u64(args, "limit").unwrap_or(20) as usize;
            let result = ctx.manager.recall_hierarchical(topic, include_members, limit)?;
            Ok(recall_result_to_json(&result))
        }
        other => Err(DispatchError::InvalidAction { workflow: "understand", action: other.to_string(), valid_actions: UNDERSTAND_ACTIONS }),
    }
}

pub fn govern(action: &str, args: &Value, ctx: &DispatchContext) -> Result<Value, DispatchError> {
    let storage = ctx.manager.storage();
    match action {
        "add_rule" => {
            let trigger_phrase = require_str(args, "trigger_phrase", action)?;
            let rule = Rule {
                id: uuid::Uuid::new_v4().to_string(),
                project: storage.project().to_string(),
                trigger_phrase: trigger_phrase.to_string(),
                must_do: opt_str_vec(args, "must_do"),
                must_not: opt_str_vec(args, "must_not"),
                ask_first: opt_str_vec(args, "ask_first"),
                warnings: opt_str_vec(args, "warnings"),
                priority: args.get("priority").and_then(Value::as_i64).unwrap_or(0) as i32,
                enabled: true,
            };
            storage.insert_rule(&rule)?;
            Ok(json!({ "rule_id": rule.id }))
        }
        "update_rule" => {
            let rule_id = require_str(args, "rule_id", action)?;
            let must_do = args.get("must_do").map(|_| opt_str_vec(args, "must_do"));
            let must_not = args.get("must_not").map(|_| opt_str_vec(args, "must_not"));
            let ask_first = args.get("ask_first").map(|_| opt_str_vec(args, "ask_first"));
            let warnings = args.get("warnings").map(|_| opt_str_vec(args, "warnings"));
            let changed = storage.update_rule(
                rule_id,
                opt_str(args, "trigger_phrase"),
                must_do.as_deref(),
                must_not.as_deref(),
                ask_first.as_deref(),
                warnings.as_deref(),
                args.get("priority").and_then(Value::as_i64).map(|p| p as i32),
                args.get("enabled").and_then(Value::as_bool),
            )?;
            Ok(json!({ "rule_id": rule_id, "updated": changed }))
        }
        "unlink" => {
            let source_id = require_str(args, "source_id", action)?;
            let target_id = require_str(args, "target_id", action)?;
            let relationship = opt_str(args, "relationship").map(parse_edge_relationship);
            let removed = ctx.manager.unlink(source_id, target_id, relationship)?;
            Ok(json!({ "removed": removed }))
        }
        "prune_memories" => {
            let project = storage.project();
            let min_age_days = args.get("min_age_days").and_then(Value::as_i64).unwrap_or(90);
            let importance_below = args.get("importance_below").and_then(Value::as_f64).unwrap_or(0.1) as f32;
            let cutoff = chrono::Utc::now() - chrono::Duration::days(min_age_days);
            let candidates = storage.all_active_memories(project)?;
            let mut pruned = Vec::new();
            for memory in candidates {
                if memory.pinned || memory.updated_at > cutoff {
                    continue;
                }
                if memory.importance_score <= importance_below {
                    ctx.manager.archive(&memory.id)?;
                    pruned.push(memory.id);
                }
            }
            Ok(json!({ "pruned": pruned }))
        }
        other => Err(DispatchError::InvalidAction { workflow: "govern", action: other.to_string(), valid_actions: GOVERN_ACTIONS }),
    }
}

pub fn explore(action: &str, args: &Value, ctx: &DispatchContext) -> Result<Value, DispatchError> {
    let storage = ctx.manager.storage();
    match action {
        "explore_entity" => {
            let name = require_str(args, "name", action)?;
            let Some(entity) = storage.find_entity_by_name(storage.project(), name)? else {
                return Ok(json!({ "found": false }));
            };
            let memory_ids = storage.memory_ids_for_entity(&entity.id)?;
            Ok(json!({
                "found": true,
                "entity_id": entity.id,
                "entity_type": format!("{:?}", entity.entity_type),
                "mention_count": entity.mention_count,
                "memory_ids": memory_ids,
            }))
        }
        "explore_community" => {
            let communities = storage.communities_for_project(storage.project())?;
            Ok(json!({
                "communities": communities.iter().map(|c| json!({
                    "id": c.id,
                    "level": c.level,
                    "members": c.member_memory_ids.len(),
                    "summary": c.summary,
                })).collect::<Vec<_>>()
            }))
        }
        "trace_evolution" => {
            let memory_ids = if let Some(entity_name) = opt_str(args, "entity") {
                match storage.find_entity_by_name(storage.project(), entity_name)? {
                    Some(entity) => storage.memory_ids_for_entity(&entity.id)?,
                    None => Vec::new(),
                }
            } else {
                let ids = require(args, "memory_ids", action)?;
                ids.as_array()
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default()
            };
            let (timeline, chain) = covenant_core::temporal::trace_evolution(storage, &memory_ids)?;
            Ok(json!({
                "timeline": timeline.iter().map(|e| json!({
                    "memory_id": e.memory_id,
                    "version_number": e.version.version_number,
                    "is_current": e.is_current,
                })).collect::<Vec<_>>(),
                "invalidation_chain": chain.iter().map(|l| json!({
                    "invalidated_version_id": l.invalidated_version_id,
                    "invalidated_by_version_id": l.invalidated_by_version_id,
                    "invalidation_time": l.invalidation_time.to_rfc3339(),
                })).collect::<Vec<_>>(),
            }))
        }
        other => Err(DispatchError::InvalidAction { workflow: "explore", action: other.to_string(), valid_actions: EXPLORE_ACTIONS }),
    }
}

pub async fn maintain(action: &str, args: &Value, ctx: &DispatchContext<'_>) -> Result<Value, DispatchError> {
    match action {
        "trigger_dream" => {
            ctx.dream.notify_tool_call();
            Ok(json!({ "acknowledged": true }))
        }
        "task_status" => {
            let task_id = require_str(args, "task_id", action)?;
            let task = ctx.tasks.get_task(task_id)?;
            Ok(json!({ "task": task }))
        }
        "task_cancel" => {
            let task_id = require_str(args, "task_id", action)?;
            ctx.tasks.cancel(task_id)?;
            Ok(json!({ "task_id": task_id, "cancelled": true }))
        }
        other => Err(DispatchError::InvalidAction { workflow: "maintain", action: other.to_string(), valid_actions: MAINTAIN_ACTIONS }),
    }
}

fn recall_result_to_json(result: &covenant_core::RecallResult) -> Value {
    let buckets: serde_json::Map<String, Value> = result
        .buckets
        .iter()
        .map(|(category, memories)| {
            (format!("{category:?}").to_lowercase(), json!(memories.iter().map(|m| m.id.clone()).collect::<Vec<_>>()))
        })
        .collect();
    json!({
        "buckets": buckets,
        "linked": result.linked.iter().map(|m| m.id.clone()).collect::<Vec<_>>(),
    })
}

fn parse_category(s: Option<&str>) -> Category {
    match s {
        Some("decision") => Category::Decision,
        Some("learning") => Category::Learning,
        Some("pattern") => Category::Pattern,
        Some("preference") => Category::Preference,
        Some("gotcha") => Category::Gotcha,
        _ => Category::default(),
    }
}

fn parse_entity_type(s: &str) -> EntityType {
    match s {
        "module" => EntityType::Module,
        "class" => EntityType::Class,
        "file" => EntityType::File,
        _ => EntityType::Function,
    }
}

fn parse_edge_relationship(s: Option<&str>) -> EdgeRelationship {
    match s {
        Some("supersedes") => EdgeRelationship::Supersedes,
        Some("depends_on") => EdgeRelationship::DependsOn,
        Some("contradicts") => EdgeRelationship::Contradicts,
        _ => EdgeRelationship::RelatedTo,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::{Config, Storage};

    fn test_ctx() -> (Manager, Arc<DreamScheduler>, TaskManager) {
        let storage = Storage::open_in_memory("dispatch-test").unwrap();
        let manager = Manager::new(storage, Config::default()).unwrap();
        let dream = DreamScheduler::new(Arc::new(Manager::new(Storage::open_in_memory("dispatch-test-2").unwrap(), Config::default()).unwrap()), "dispatch-test".to_string(), covenant_core::config::DreamParams::default());
        let tasks = TaskManager::new(Arc::new(Storage::open_in_memory("dispatch-test-3").unwrap()));
        (manager, dream, tasks)
    }

    #[test]
    fn invalid_action_carries_valid_actions() {
        let (manager, dream, tasks) = test_ctx();
        let ctx = DispatchContext { manager: &manager, dream: &dream, tasks: &tasks };
        let err = inscribe("frobnicate", &json!({}), &ctx).unwrap_err();
        match err {
            DispatchError::InvalidAction { valid_actions, .. } => assert_eq!(valid_actions, INSCRIBE_ACTIONS),
            _ => panic!("expected InvalidAction"),
        }
    }

    #[test]
    fn missing_param_names_the_param() {
        let (manager, dream, tasks) = test_ctx();
        let ctx = DispatchContext { manager: &manager, dream: &dream, tasks: &tasks };
        let err = inscribe("remember", &json!({}), &ctx).unwrap_err();
        match err {
            DispatchError::MissingParam { param, .. } => assert_eq!(param, "content"),
            _ => panic!("expected MissingParam"),
        }
    }

    #[test]
    fn remember_then_recall_round_trips() {
        let (manager, dream, tasks) = test_ctx();
        let ctx = DispatchContext { manager: &manager, dream: &dream, tasks: &tasks };
        let result = inscribe("remember", &json!({"content": "use retries for flaky network calls", "category": "pattern"}), &ctx).unwrap();
        assert!(result.get("memory_id").is_some());
        let recalled = understand("recall", &json!({"topic": "retries"}), &ctx).unwrap();
        assert!(recalled.get("buckets").is_some());
    }
}
