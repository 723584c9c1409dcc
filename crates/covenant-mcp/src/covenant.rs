//! Covenant middleware (C9): a stateful filter invoked on every client tool
//! call. Gates mutating tools behind session briefing and time-limited
//! counsel tokens, and strips the `_client_meta` provenance side-channel.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use covenant_core::{ContextCheck, Provenance, SessionState, Storage};
use serde::Serialize;
use serde_json::Value;

/// Always allowed, regardless of session state.
const COVENANT_EXEMPT: &[&str] = &["get_briefing", "health", "context_check"];

/// Briefing must have been called this session.
const COMMUNION_REQUIRED: &[&str] = &[
    "add_rule",
    "update_rule",
    "link",
    "unlink",
    "pin",
    "remember",
    "remember_batch",
    "execute",
    "record_outcome",
    "verify_facts",
    "prune_memories",
    "archive",
    "trigger_dream",
    "task_status",
    "task_cancel",
];

/// A `context_check` must have landed within [`Covenant::counsel_ttl`].
const COUNSEL_REQUIRED: &[&str] = &["remember", "prune_memories", "archive", "unlink", "update_rule"];

fn is_read_only_query(tool: &str) -> bool {
    tool.starts_with("recall") || tool.starts_with("search_")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    CommunionRequired,
    CounselRequired,
    CounselExpired,
}

#[derive(Debug, Clone, Serialize)]
pub struct Remedy {
    pub tool: String,
    pub argument_hint: String,
}

/// The structured block response a violating call gets back (§6).
#[derive(Debug, Clone, Serialize)]
pub struct CovenantBlock {
    pub status: &'static str,
    pub violation: Violation,
    pub message: String,
    pub remedy: Remedy,
    pub project_path: String,
}

/// Parsed `_client_meta` side-channel, stashed for the duration of one call
/// so [`covenant_core::Manager::remember`] can attach it as provenance.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ClientMeta {
    pub client: Option<String>,
    #[serde(rename = "providerID")]
    pub provider_id: Option<String>,
    #[serde(rename = "modelID")]
    pub model_id: Option<String>,
}

impl From<ClientMeta> for Provenance {
    fn from(meta: ClientMeta) -> Self {
        Provenance {
            client: meta.client,
            provider_id: meta.provider_id,
            model_id: meta.model_id,
        }
    }
}

/// Strip `_client_meta` from a tool-call argument object, returning the
/// parsed side-channel (if any) and the cleaned arguments.
pub fn strip_client_meta(mut args: Value) -> (Value, Option<ClientMeta>) {
    let meta = args
        .as_object_mut()
        .and_then(|obj| obj.remove("_client_meta"))
        .and_then(|raw| serde_json::from_value::<ClientMeta>(raw).ok());
    (args, meta)
}

/// Session-scoped covenant state plus the access-control decision.
pub struct Covenant {
    storage: Mutex<Option<()>>,
    counsel_ttl: Duration,
}

impl Covenant {
    pub fn new(counsel_ttl: Duration) -> Self {
        Self {
            storage: Mutex::new(None),
            counsel_ttl,
        }
    }

    fn session_id(project: &str) -> String {
        let hour_bucket = Utc::now().format("%Y%m%d%H");
        format!("{project}:{hour_bucket}")
    }

    fn load(storage: &Storage, project: &str) -> covenant_core::Result<SessionState> {
        let session_id = Self::session_id(project);
        match storage.get_session_state(&session_id)? {
            Some(state) => Ok(state),
            None => Ok(SessionState {
                session_id,
                project: project.to_string(),
                briefed: false,
                context_checks: Vec::new(),
                pending_decisions: Vec::new(),
                last_activity: Utc::now(),
            }),
        }
    }

    /// Decide whether `tool` may run against `project`'s current session
    /// state (§4.9 `check_tool_access`). Returns `None` to allow.
    pub fn check_tool_access(
        &self,
        storage: &Storage,
        project: &str,
        tool: &str,
    ) -> covenant_core::Result<Option<CovenantBlock>> {
        let _guard = self.storage.lock().expect("covenant lock poisoned");

        if COVENANT_EXEMPT.contains(&tool) || is_read_only_query(tool) {
            return Ok(None);
        }

        let state = Self::load(storage, project)?;

        if COMMUNION_REQUIRED.contains(&tool) && !state.briefed {
            return Ok(Some(CovenantBlock {
                status: "blocked",
                violation: Violation::CommunionRequired,
                message: format!("'{tool}' requires a briefing before it can run this session"),
                remedy: Remedy {
                    tool: "get_briefing".to_string(),
                    argument_hint: "call get_briefing with no arguments".to_string(),
                },
                project_path: project.to_string(),
            }));
        }

        if COUNSEL_REQUIRED.contains(&tool) {
            let fresh = state
                .context_checks
                .iter()
                .any(|check| Utc::now() - check.timestamp <= chrono::Duration::from_std(self.counsel_ttl).unwrap_or_default());
            if !fresh {
                let violation = match state.context_checks.iter().map(|c| c.timestamp).max() {
                    Some(last) => {
                        let age = (Utc::now() - last).num_seconds();
                        return Ok(Some(CovenantBlock {
                            status: "blocked",
                            violation: Violation::CounselExpired,
                            message: format!("counsel token expired {age}s ago"),
                            remedy: Remedy {
                                tool: "context_check".to_string(),
                                argument_hint: "call context_check with a short plan description".to_string(),
                            },
                            project_path: project.to_string(),
                        }));
                    }
                    None => Violation::CounselRequired,
                };
                return Ok(Some(CovenantBlock {
                    status: "blocked",
                    violation,
                    message: format!("'{tool}' requires a recent context_check"),
                    remedy: Remedy {
                        tool: "context_check".to_string(),
                        argument_hint: "call context_check with a short plan description".to_string(),
                    },
                    project_path: project.to_string(),
                }));
            }
        }

        Ok(None)
    }

    /// Record that the briefing ran this session (`get_briefing`).
    pub fn mark_briefed(&self, storage: &Storage, project: &str) -> covenant_core::Result<()> {
        let _guard = self.storage.lock().expect("covenant lock poisoned");
        let mut state = Self::load(storage, project)?;
        state.briefed = true;
        state.last_activity = Utc::now();
        storage.put_session_state(&state)
    }

    /// Record a `context_check` counsel grant.
    pub fn record_context_check(&self, storage: &Storage, project: &str, topic: &str) -> covenant_core::Result<()> {
        let _guard = self.storage.lock().expect("covenant lock poisoned");
        let mut state = Self::load(storage, project)?;
        state.context_checks.push(ContextCheck {
            topic: topic.to_string(),
            timestamp: Utc::now(),
        });
        state.last_activity = Utc::now();
        storage.put_session_state(&state)
    }

    /// Track a memory awaiting an outcome (`pending_decisions`).
    pub fn add_pending_decision(&self, storage: &Storage, project: &str, memory_id: &str) -> covenant_core::Result<()> {
        let _guard = self.storage.lock().expect("covenant lock poisoned");
        let mut state = Self::load(storage, project)?;
        if !state.pending_decisions.iter().any(|id| id == memory_id) {
            state.pending_decisions.push(memory_id.to_string());
        }
        storage.put_session_state(&state)
    }

    /// Clear a memory from `pending_decisions` once `record_outcome` runs
    /// (testable property #4 in §8).
    pub fn clear_pending_decision(&self, storage: &Storage, project: &str, memory_id: &str) -> covenant_core::Result<()> {
        let _guard = self.storage.lock().expect("covenant lock poisoned");
        let mut state = Self::load(storage, project)?;
        state.pending_decisions.retain(|id| id != memory_id);
        storage.put_session_state(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> Storage {
        Storage::open_in_memory("covenant-test").unwrap()
    }

    #[test]
    fn exempt_tools_always_pass() {
        let covenant = Covenant::new(Duration::from_secs(300));
        let storage = test_storage();
        let block = covenant
            .check_tool_access(&storage, "covenant-test", "get_briefing")
            .unwrap();
        assert!(block.is_none());
    }

    #[test]
    fn mutating_tool_blocked_before_briefing() {
        let covenant = Covenant::new(Duration::from_secs(300));
        let storage = test_storage();
        let block = covenant
            .check_tool_access(&storage, "covenant-test", "remember")
            .unwrap()
            .expect("should block");
        assert_eq!(block.violation, Violation::CommunionRequired);
    }

    #[test]
    fn briefed_session_still_needs_counsel_for_remember() {
        let covenant = Covenant::new(Duration::from_secs(300));
        let storage = test_storage();
        covenant.mark_briefed(&storage, "covenant-test").unwrap();
        let block = covenant
            .check_tool_access(&storage, "covenant-test", "remember")
            .unwrap()
            .expect("should still block");
        assert_eq!(block.violation, Violation::CounselRequired);
    }

    #[test]
    fn fresh_context_check_unblocks_remember() {
        let covenant = Covenant::new(Duration::from_secs(300));
        let storage = test_storage();
        covenant.mark_briefed(&storage, "covenant-test").unwrap();
        covenant
            .record_context_check(&storage, "covenant-test", "plan")
            .unwrap();
        let block = covenant
            .check_tool_access(&storage, "covenant-test", "remember")
            .unwrap();
        assert!(block.is_none());
    }

    #[test]
    fn client_meta_is_stripped_from_arguments() {
        let args = serde_json::json!({
            "content": "x",
            "_client_meta": { "client": "editor", "providerID": "p", "modelID": "m" }
        });
        let (cleaned, meta) = strip_client_meta(args);
        assert!(cleaned.get("_client_meta").is_none());
        assert_eq!(meta.unwrap().client.as_deref(), Some("editor"));
    }
}
