//! Phase tracker & tool-visibility filter (C10): maps tool calls to a ritual
//! phase and exposes per-phase tool allow-lists. Composes after C9.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Briefing,
    Exploration,
    Action,
    Reflection,
}

impl Phase {
    fn visible_tools(self) -> &'static [&'static str] {
        match self {
            Phase::Briefing => &["get_briefing", "health"],
            Phase::Exploration => &[
                "get_briefing",
                "health",
                "context_check",
                "recall",
                "recall_for_file",
                "recall_by_entity",
                "recall_hierarchical",
                "search_memories",
                "explore_entity",
                "explore_community",
                "trace_evolution",
            ],
            Phase::Action => &[
                "context_check",
                "recall",
                "recall_for_file",
                "recall_by_entity",
                "remember",
                "remember_batch",
                "add_rule",
                "update_rule",
                "link",
                "unlink",
                "pin",
                "archive",
                "execute",
                "prune_memories",
                "trigger_dream",
                "task_status",
                "task_cancel",
            ],
            Phase::Reflection => &["record_outcome", "verify_facts", "recall"],
        }
    }

    fn label(self) -> &'static str {
        match self {
            Phase::Briefing => "briefing",
            Phase::Exploration => "exploration",
            Phase::Action => "action",
            Phase::Reflection => "reflection",
        }
    }
}

/// Tool name (or prefix, for `remember*`) to the phase it drives the session
/// into (§4.10 transition table).
fn transition_for(tool: &str) -> Option<Phase> {
    if tool == "get_briefing" {
        Some(Phase::Briefing)
    } else if tool == "context_check" {
        Some(Phase::Exploration)
    } else if tool.starts_with("remember") || matches!(tool, "add_rule" | "update_rule" | "execute") {
        Some(Phase::Action)
    } else if matches!(tool, "record_outcome" | "verify_facts") {
        Some(Phase::Reflection)
    } else {
        None
    }
}

/// The phase that makes `tool` visible, for the `TOOL_NOT_VISIBLE` hint.
fn home_phase(tool: &str) -> Option<Phase> {
    for phase in [Phase::Briefing, Phase::Exploration, Phase::Action, Phase::Reflection] {
        if phase.visible_tools().contains(&tool) {
            return Some(phase);
        }
    }
    None
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolNotVisible {
    pub status: &'static str,
    pub violation: &'static str,
    pub tool: String,
    pub current_phase: &'static str,
    pub hint: String,
}

/// Per-project phase state. Default phase is BRIEFING (§4.10), also used
/// when no project path is supplied at all.
pub struct PhaseTracker {
    phases: Mutex<HashMap<String, Phase>>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            phases: Mutex::new(HashMap::new()),
        }
    }

    fn current(&self, project: Option<&str>) -> Phase {
        match project {
            Some(project) => *self
                .phases
                .lock()
                .expect("phase lock poisoned")
                .get(project)
                .unwrap_or(&Phase::Briefing),
            None => Phase::Briefing,
        }
    }

    /// Check `tool` against the current visibility set and, if visible,
    /// advance the phase per the transition table.
    pub fn check_and_advance(&self, project: Option<&str>, tool: &str) -> Result<(), ToolNotVisible> {
        let phase = self.current(project);
        if !phase.visible_tools().contains(&tool) {
            let hint = match home_phase(tool) {
                Some(home) => format!("available in {} phase", home.label()),
                None => "not currently visible in any phase".to_string(),
            };
            return Err(ToolNotVisible {
                status: "blocked",
                violation: "TOOL_NOT_VISIBLE",
                tool: tool.to_string(),
                current_phase: phase.label(),
                hint,
            });
        }
        if let (Some(project), Some(next)) = (project, transition_for(tool)) {
            self.phases
                .lock()
                .expect("phase lock poisoned")
                .insert(project.to_string(), next);
        }
        Ok(())
    }

    /// Tools visible in the current phase, for a `list_tools`-style listing.
    pub fn visible_tools(&self, project: Option<&str>) -> &'static [&'static str] {
        self.current(project).visible_tools()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_phase_is_briefing() {
        let tracker = PhaseTracker::new();
        assert!(tracker.check_and_advance(Some("p"), "get_briefing").is_ok());
        assert!(tracker.check_and_advance(Some("p"), "remember").is_err());
    }

    #[test]
    fn briefing_then_context_check_unlocks_exploration_then_action() {
        let tracker = PhaseTracker::new();
        tracker.check_and_advance(Some("p"), "get_briefing").unwrap();
        tracker.check_and_advance(Some("p"), "context_check").unwrap();
        assert!(tracker.check_and_advance(Some("p"), "recall").is_ok());
        assert!(tracker.check_and_advance(Some("p"), "remember").is_ok());
    }

    #[test]
    fn not_visible_error_carries_home_phase_hint() {
        let tracker = PhaseTracker::new();
        tracker.check_and_advance(Some("p"), "get_briefing").unwrap();
        tracker.check_and_advance(Some("p"), "context_check").unwrap();
        tracker.check_and_advance(Some("p"), "remember").unwrap();
        let err = tracker.check_and_advance(Some("p"), "verify_facts").unwrap_err();
        assert_eq!(err.hint, "available in reflection phase");
    }

    #[test]
    fn no_project_path_uses_briefing_visibility() {
        let tracker = PhaseTracker::new();
        assert!(tracker.check_and_advance(None, "remember").is_err());
        assert!(tracker.check_and_advance(None, "health").is_ok());
    }
}
