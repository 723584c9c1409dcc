//! Schema migrations for the relational store (C1).
//!
//! Migrations are applied in order inside `execute_batch`, each bumping
//! `schema_version`. Refusing to open a store whose recorded version is
//! newer than the highest version this build knows about is enforced by
//! the caller in [`super::store`]; this module only ever adds tables,
//! columns, and triggers — it never drops semantic data.

pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: memories, versions, rules, entities, graph, session state",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Communities, context triggers, background tasks, dream sessions",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "FTS5 porter tokenizer upgrade and page_size bump",
        up: MIGRATION_V3_UP,
    },
];

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    project TEXT NOT NULL,
    category TEXT NOT NULL,
    content TEXT NOT NULL,
    rationale TEXT,
    context TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    file_path TEXT,
    outcome TEXT,
    worked TEXT NOT NULL DEFAULT 'unknown',
    pinned INTEGER NOT NULL DEFAULT 0,
    archived INTEGER NOT NULL DEFAULT 0,
    importance_score REAL NOT NULL DEFAULT 0.0,
    surprise_score REAL NOT NULL DEFAULT 0.0,
    provenance TEXT,
    happened_at TEXT,
    embedding BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_project ON memories(project);
CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(project, category);
CREATE INDEX IF NOT EXISTS idx_memories_file_path ON memories(file_path);
CREATE INDEX IF NOT EXISTS idx_memories_worked ON memories(worked, archived);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);

CREATE TABLE IF NOT EXISTS memory_versions (
    id TEXT PRIMARY KEY,
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    version_number INTEGER NOT NULL,
    content TEXT NOT NULL,
    rationale TEXT,
    context TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    outcome TEXT,
    worked TEXT NOT NULL DEFAULT 'unknown',
    change_type TEXT NOT NULL,
    change_description TEXT,
    changed_at TEXT NOT NULL,
    valid_from TEXT NOT NULL,
    valid_to TEXT,
    invalidated_by_version_id TEXT,
    UNIQUE(memory_id, version_number)
);

CREATE INDEX IF NOT EXISTS idx_versions_memory ON memory_versions(memory_id);
CREATE INDEX IF NOT EXISTS idx_versions_current ON memory_versions(memory_id, valid_to);
CREATE INDEX IF NOT EXISTS idx_versions_valid_from ON memory_versions(valid_from);

CREATE TABLE IF NOT EXISTS rules (
    id TEXT PRIMARY KEY,
    project TEXT NOT NULL,
    trigger_phrase TEXT NOT NULL,
    must_do TEXT NOT NULL DEFAULT '[]',
    must_not TEXT NOT NULL DEFAULT '[]',
    ask_first TEXT NOT NULL DEFAULT '[]',
    warnings TEXT NOT NULL DEFAULT '[]',
    priority INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_rules_project ON rules(project, enabled);

CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    project TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    name TEXT NOT NULL,
    qualified_name TEXT,
    mention_count INTEGER NOT NULL DEFAULT 0,
    code_entity_id TEXT,
    UNIQUE(project, entity_type, name)
);

CREATE INDEX IF NOT EXISTS idx_entities_project ON entities(project);
CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(project, name);

CREATE TABLE IF NOT EXISTS memory_entity_refs (
    id TEXT PRIMARY KEY,
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    relationship TEXT NOT NULL,
    context_snippet TEXT,
    UNIQUE(memory_id, entity_id, relationship)
);

CREATE INDEX IF NOT EXISTS idx_refs_memory ON memory_entity_refs(memory_id);
CREATE INDEX IF NOT EXISTS idx_refs_entity ON memory_entity_refs(entity_id);

CREATE TABLE IF NOT EXISTS memory_edges (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    relationship TEXT NOT NULL,
    confidence REAL,
    description TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(source_id, target_id, relationship),
    CHECK (source_id != target_id)
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON memory_edges(source_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON memory_edges(target_id);

CREATE TABLE IF NOT EXISTS session_state (
    session_id TEXT PRIMARY KEY,
    project TEXT NOT NULL,
    briefed INTEGER NOT NULL DEFAULT 0,
    context_checks TEXT NOT NULL DEFAULT '[]',
    pending_decisions TEXT NOT NULL DEFAULT '[]',
    last_activity TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_project ON session_state(project);

-- Contentless FTS5 virtual table kept in sync with `memories` by trigger (C4).
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    id UNINDEXED,
    content,
    tags,
    content='memories',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS memories_fts_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, id, content, tags)
    VALUES (NEW.rowid, NEW.id, NEW.content, NEW.tags);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, id, content, tags)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.content, OLD.tags);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, id, content, tags)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.content, OLD.tags);
    INSERT INTO memories_fts(rowid, id, content, tags)
    VALUES (NEW.rowid, NEW.id, NEW.content, NEW.tags);
END;

-- "Last update time" change-feed per logical entity class (§4.1).
CREATE TABLE IF NOT EXISTS change_feed (
    entity_class TEXT PRIMARY KEY,
    last_updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS communities (
    id TEXT PRIMARY KEY,
    project TEXT NOT NULL,
    level INTEGER NOT NULL DEFAULT 0,
    parent_community_id TEXT REFERENCES communities(id) ON DELETE SET NULL,
    member_memory_ids TEXT NOT NULL DEFAULT '[]',
    key_entity_names TEXT NOT NULL DEFAULT '[]',
    summary TEXT NOT NULL DEFAULT '',
    built_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_communities_project ON communities(project, level);

CREATE TABLE IF NOT EXISTS context_triggers (
    id TEXT PRIMARY KEY,
    project TEXT NOT NULL,
    trigger_type TEXT NOT NULL,
    pattern TEXT NOT NULL,
    recall_topic TEXT NOT NULL,
    category_filter TEXT,
    priority INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    trigger_count INTEGER NOT NULL DEFAULT 0,
    last_triggered TEXT
);

CREATE INDEX IF NOT EXISTS idx_triggers_project ON context_triggers(project, is_active);

CREATE TABLE IF NOT EXISTS background_tasks (
    task_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    project TEXT,
    state TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    error TEXT,
    result TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_project ON background_tasks(project, state);

CREATE TABLE IF NOT EXISTS dream_sessions (
    session_id TEXT PRIMARY KEY,
    project TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    strategies_run TEXT NOT NULL DEFAULT '[]',
    decisions_reviewed INTEGER NOT NULL DEFAULT 0,
    insights_generated INTEGER NOT NULL DEFAULT 0,
    interrupted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_dream_sessions_project ON dream_sessions(project, started_at);

CREATE TABLE IF NOT EXISTS dream_results (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES dream_sessions(session_id) ON DELETE CASCADE,
    source_decision_id TEXT NOT NULL,
    original_content TEXT NOT NULL,
    original_outcome TEXT,
    insight TEXT NOT NULL,
    result_type TEXT NOT NULL,
    evidence_memory_ids TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_dream_results_session ON dream_results(session_id);
CREATE INDEX IF NOT EXISTS idx_dream_results_decision ON dream_results(source_decision_id);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (2, datetime('now'));
"#;

const MIGRATION_V3_UP: &str = r#"
DROP TABLE memories_fts;

CREATE VIRTUAL TABLE memories_fts USING fts5(
    id UNINDEXED,
    content,
    tags,
    content='memories',
    content_rowid='rowid',
    tokenize='porter ascii'
);

INSERT INTO memories_fts(rowid, id, content, tags)
SELECT rowid, id, content, tags FROM memories;

UPDATE schema_version SET version = 3, applied_at = datetime('now');
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (3, datetime('now'));
"#;

pub const LATEST_VERSION: u32 = 3;

pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply every migration newer than the recorded schema version, in order.
/// Returns the number of migrations applied (0 if already current).
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            conn.execute_batch(migration.up)?;

            if migration.version == 3 {
                conn.pragma_update(None, "page_size", 8192)?;
                conn.execute_batch("VACUUM;")?;
            }

            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let first = apply_migrations(&conn).unwrap();
        assert_eq!(first, MIGRATIONS.len() as u32);

        let second = apply_migrations(&conn).unwrap();
        assert_eq!(second, 0);

        assert_eq!(get_current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn fts_trigger_sync_is_transactional() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO memories (id, project, category, content, tags, created_at, updated_at)
             VALUES ('m1', 'proj', 'decision', 'use sessions for auth', '[]', datetime('now'), datetime('now'))",
            [],
        )
        .unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories_fts WHERE memories_fts MATCH 'sessions'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
