//! Data model shared by the relational store, retrieval engine, and graph layer.
//!
//! These types are the row shapes persisted by C1; everything upstream
//! (search, dreaming, dispatch) works in terms of them rather than raw SQL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `worked` is tri-state: a decision can be outstanding, vindicated, or refuted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Worked {
    Unknown,
    True,
    False,
}

impl Worked {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Worked::Unknown => "unknown",
            Worked::True => "true",
            Worked::False => "false",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "true" => Worked::True,
            "false" => Worked::False,
            _ => Worked::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Decision,
    Pattern,
    Warning,
    Learning,
    Reflection,
}

impl Category {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Category::Decision => "decision",
            Category::Pattern => "pattern",
            Category::Warning => "warning",
            Category::Learning => "learning",
            Category::Reflection => "reflection",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "decision" => Category::Decision,
            "pattern" => Category::Pattern,
            "warning" => Category::Warning,
            "learning" => Category::Learning,
            "reflection" => Category::Reflection,
            _ => return None,
        })
    }
}

/// Provenance captured from the `_client_meta` side-channel (§4.9, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub client: Option<String>,
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
}

/// The fundamental unit (§3 Memory). Content mutations flow through
/// [`crate::temporal`]; this struct is the current, hydrated view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub project: String,
    pub category: Category,
    pub content: String,
    pub rationale: Option<String>,
    pub context: Option<serde_json::Value>,
    pub tags: Vec<String>,
    pub file_path: Option<String>,
    pub outcome: Option<String>,
    pub worked: Worked,
    pub pinned: bool,
    pub archived: bool,
    pub importance_score: f32,
    pub surprise_score: f32,
    pub provenance: Option<Provenance>,
    pub happened_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    ContentUpdated,
    OutcomeRecorded,
    Invalidated,
}

impl ChangeType {
    pub fn as_db_str(self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::ContentUpdated => "content_updated",
            ChangeType::OutcomeRecorded => "outcome_recorded",
            ChangeType::Invalidated => "invalidated",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "content_updated" => ChangeType::ContentUpdated,
            "outcome_recorded" => ChangeType::OutcomeRecorded,
            "invalidated" => ChangeType::Invalidated,
            _ => ChangeType::Created,
        }
    }
}

/// An immutable snapshot (§3 MemoryVersion, §4.7). Bi-temporal: `changed_at`
/// is when the system learned the fact, `valid_from`/`valid_to` is when the
/// fact was true in reality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryVersion {
    pub id: String,
    pub memory_id: String,
    pub version_number: u32,
    pub content: String,
    pub rationale: Option<String>,
    pub context: Option<serde_json::Value>,
    pub tags: Vec<String>,
    pub outcome: Option<String>,
    pub worked: Worked,
    pub change_type: ChangeType,
    pub change_description: Option<String>,
    pub changed_at: DateTime<Utc>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub invalidated_by_version_id: Option<String>,
}

/// A trigger phrase plus four action lists (§3 Rule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub project: String,
    pub trigger_phrase: String,
    pub must_do: Vec<String>,
    pub must_not: Vec<String>,
    pub ask_first: Vec<String>,
    pub warnings: Vec<String>,
    pub priority: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Function,
    Class,
    File,
    Concept,
    Module,
}

impl EntityType {
    pub fn as_db_str(self) -> &'static str {
        match self {
            EntityType::Function => "function",
            EntityType::Class => "class",
            EntityType::File => "file",
            EntityType::Concept => "concept",
            EntityType::Module => "module",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "function" => EntityType::Function,
            "class" => EntityType::Class,
            "file" => EntityType::File,
            "concept" => EntityType::Concept,
            "module" => EntityType::Module,
            _ => return None,
        })
    }
}

/// An extracted symbol (§3 Entity, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub project: String,
    pub entity_type: EntityType,
    pub name: String,
    pub qualified_name: Option<String>,
    pub mention_count: u32,
    pub code_entity_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRelationship {
    Mentions,
    About,
    Modifies,
}

impl EntityRelationship {
    pub fn as_db_str(self) -> &'static str {
        match self {
            EntityRelationship::Mentions => "mentions",
            EntityRelationship::About => "about",
            EntityRelationship::Modifies => "modifies",
        }
    }
}

/// Many-to-many memory↔entity link (§3 MemoryEntityRef).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntityRef {
    pub id: String,
    pub memory_id: String,
    pub entity_id: String,
    pub relationship: EntityRelationship,
    pub context_snippet: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRelationship {
    Supersedes,
    RelatedTo,
    CausedBy,
    Refines,
    Contradicts,
}

impl EdgeRelationship {
    pub fn as_db_str(self) -> &'static str {
        match self {
            EdgeRelationship::Supersedes => "supersedes",
            EdgeRelationship::RelatedTo => "related_to",
            EdgeRelationship::CausedBy => "caused_by",
            EdgeRelationship::Refines => "refines",
            EdgeRelationship::Contradicts => "contradicts",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "supersedes" => EdgeRelationship::Supersedes,
            "related_to" => EdgeRelationship::RelatedTo,
            "caused_by" => EdgeRelationship::CausedBy,
            "refines" => EdgeRelationship::Refines,
            "contradicts" => EdgeRelationship::Contradicts,
            _ => return None,
        })
    }
}

/// Typed directed relationship between two memories (§3 MemoryEdge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relationship: EdgeRelationship,
    pub confidence: Option<f32>,
    pub description: Option<String>,
}

/// A node set produced by Leiden over the graph (§3 Community, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub project: String,
    pub level: u32,
    pub parent_community_id: Option<String>,
    pub member_memory_ids: Vec<String>,
    pub key_entity_names: Vec<String>,
    pub summary: String,
}

/// A `(topic, timestamp)` counsel grant (§3 SessionState, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCheck {
    pub topic: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-project covenant/phase state (§3 SessionState).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub project: String,
    pub briefed: bool,
    pub context_checks: Vec<ContextCheck>,
    pub pending_decisions: Vec<String>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    FilePattern,
    TagMatch,
    EntityMatch,
}

/// (§3 ContextTrigger).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextTrigger {
    pub id: String,
    pub project: String,
    pub trigger_type: TriggerType,
    pub pattern: String,
    pub recall_topic: String,
    pub category_filter: Option<Category>,
    pub priority: i32,
    pub is_active: bool,
    pub trigger_count: u32,
    pub last_triggered: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// (§3 BackgroundTask, §4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub task_id: String,
    pub name: String,
    pub project: Option<String>,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DreamResultType {
    Revised,
    ConfirmedFailure,
    NeedsMoreData,
    AutoResolvedSuccess,
    AutoResolvedFailure,
    FlaggedForReview,
    InsufficientEvidence,
}

/// One strategy's verdict on one decision (§3 DreamResult).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DreamResult {
    pub source_decision_id: String,
    pub original_content: String,
    pub original_outcome: Option<String>,
    pub insight: String,
    pub result_type: DreamResultType,
    pub evidence_memory_ids: Vec<String>,
}

/// Full provenance for one autonomous idle session (§3 DreamSession).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DreamSession {
    pub session_id: String,
    pub project: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub strategies_run: Vec<String>,
    pub decisions_reviewed: u32,
    pub insights_generated: u32,
    pub interrupted: bool,
    pub results: Vec<DreamResult>,
}

impl DreamSession {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            project: project.into(),
            started_at: Utc::now(),
            ended_at: None,
            strategies_run: Vec::new(),
            decisions_reviewed: 0,
            insights_generated: 0,
            interrupted: false,
            results: Vec::new(),
        }
    }
}
