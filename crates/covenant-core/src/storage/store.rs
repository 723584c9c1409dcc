//! Relational store (C1).
//!
//! A single SQLite file per project, WAL-mode, with separate reader/writer
//! connections so every method takes `&self` — `Storage` is `Send + Sync`
//! and callers hold it behind `Arc<Storage>` rather than `Arc<Mutex<Storage>>`.
//! Every mutation runs inside a transaction, committed on success and rolled
//! back on error (§4.1 contract a).

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{CoreError, Result};
use crate::models::*;

use super::migrations;

/// Main storage struct. Mutations go through `writer`; reads that don't need
/// to observe a write made moments earlier on another connection go through
/// `reader`, keeping long scans off the write path.
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    project: String,
}

impl Storage {
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA mmap_size = 268435456;
             PRAGMA journal_size_limit = 67108864;
             PRAGMA optimize = 0x10002;",
        )?;
        Ok(())
    }

    /// Open (creating if absent) the store at `db_path` for `project`.
    /// Refuses to open a store whose schema version is newer than this
    /// build understands (§4.1).
    pub fn open(db_path: Option<PathBuf>, project: impl Into<String>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("dev", "covenant", "covenant-mcp")
                    .ok_or_else(|| CoreError::Init("could not determine project directories".into()))?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let _ = std::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(0o700));
                }
                data_dir.join("daem0nmcp.db")
            }
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer_conn = Connection::open(&path)?;
        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
        }
        Self::configure_connection(&writer_conn)?;

        let on_disk = migrations::get_current_version(&writer_conn)?;
        if on_disk > migrations::LATEST_VERSION {
            return Err(CoreError::SchemaTooNew {
                on_disk,
                supported: migrations::LATEST_VERSION,
            });
        }
        migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            project: project.into(),
        })
    }

    /// Open an in-memory store, for tests. A single connection is shared for
    /// both roles since SQLite's `:memory:` databases aren't visible across
    /// connections.
    #[cfg(test)]
    pub fn open_in_memory(project: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::apply_migrations(&conn)?;
        let project = project.into();
        // SQLite can share one in-memory database across connections opened
        // with a `file::memory:?cache=shared` URI, but the simpler and
        // sufficient approach for tests is a single connection reused as
        // both writer and reader.
        drop(conn);
        let uri = format!("file:covenant-test-{project}?mode=memory&cache=shared");
        let writer_conn = Connection::open(&uri)?;
        writer_conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::apply_migrations(&writer_conn)?;
        let reader_conn = Connection::open(&uri)?;
        reader_conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            project,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn bump_change_feed(conn: &Connection, entity_class: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO change_feed (entity_class, last_updated) VALUES (?1, ?2)
             ON CONFLICT(entity_class) DO UPDATE SET last_updated = excluded.last_updated",
            params![entity_class, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Last update time for a logical entity class, used by UI polling layers
    /// outside this core (§4.1 change-feed).
    pub fn last_updated(&self, entity_class: &str) -> Result<Option<DateTime<Utc>>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row(
                "SELECT last_updated FROM change_feed WHERE entity_class = ?1",
                params![entity_class],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|s| parse_rfc3339(&s).map_err(CoreError::from))
            .transpose()
    }

    // ------------------------------------------------------------------
    // Memories
    // ------------------------------------------------------------------

    pub fn insert_memory(&self, memory: &Memory) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO memories
                (id, project, category, content, rationale, context, tags, file_path,
                 outcome, worked, pinned, archived, importance_score, surprise_score,
                 provenance, happened_at, embedding, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                memory.id,
                memory.project,
                memory.category.as_db_str(),
                memory.content,
                memory.rationale,
                memory.context.as_ref().map(|c| c.to_string()),
                serde_json::to_string(&memory.tags).unwrap_or_else(|_| "[]".into()),
                memory.file_path,
                memory.outcome,
                memory.worked.as_db_str(),
                memory.pinned as i64,
                memory.archived as i64,
                memory.importance_score,
                memory.surprise_score,
                memory
                    .provenance
                    .as_ref()
                    .map(|p| serde_json::to_string(p).unwrap_or_default()),
                memory.happened_at.map(|t| t.to_rfc3339()),
                None::<Vec<u8>>,
                memory.created_at.to_rfc3339(),
                memory.updated_at.to_rfc3339(),
            ],
        )?;
        Self::bump_change_feed(&writer, "memories")?;
        Ok(())
    }

    /// Apply a content-bearing mutation to the denormalized `memories` row
    /// (the version engine is the source of truth; this keeps fast reads in sync).
    #[allow(clippy::too_many_arguments)]
    pub fn update_memory_snapshot(
        &self,
        memory_id: &str,
        content: &str,
        rationale: Option<&str>,
        context: Option<&serde_json::Value>,
        tags: &[String],
        outcome: Option<&str>,
        worked: Worked,
    ) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "UPDATE memories SET content = ?1, rationale = ?2, context = ?3, tags = ?4,
                outcome = ?5, worked = ?6, updated_at = ?7 WHERE id = ?8",
            params![
                content,
                rationale,
                context.map(|c| c.to_string()),
                serde_json::to_string(tags).unwrap_or_else(|_| "[]".into()),
                outcome,
                worked.as_db_str(),
                Utc::now().to_rfc3339(),
                memory_id,
            ],
        )?;
        Self::bump_change_feed(&writer, "memories")?;
        Ok(())
    }

    pub fn set_pinned(&self, memory_id: &str, pinned: bool) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "UPDATE memories SET pinned = ?1, updated_at = ?2 WHERE id = ?3",
            params![pinned as i64, Utc::now().to_rfc3339(), memory_id],
        )?;
        Ok(())
    }

    pub fn set_archived(&self, memory_id: &str) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "UPDATE memories SET archived = 1, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), memory_id],
        )?;
        Ok(())
    }

    pub fn set_surprise_score(&self, memory_id: &str, score: f32) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "UPDATE memories SET surprise_score = ?1 WHERE id = ?2",
            params![score, memory_id],
        )?;
        Ok(())
    }

    pub fn set_embedding(&self, memory_id: &str, bytes: &[u8]) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "UPDATE memories SET embedding = ?1 WHERE id = ?2",
            params![bytes, memory_id],
        )?;
        Ok(())
    }

    pub fn get_memory(&self, id: &str) -> Result<Option<Memory>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row(
                "SELECT id, project, category, content, rationale, context, tags, file_path,
                        outcome, worked, pinned, archived, importance_score, surprise_score,
                        provenance, happened_at, created_at, updated_at
                 FROM memories WHERE id = ?1",
                params![id],
                row_to_memory,
            )
            .optional()
            .map_err(CoreError::from)
    }

    pub fn get_memories(&self, ids: &[String]) -> Result<Vec<Memory>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let reader = self.reader.lock().expect("reader lock poisoned");
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id, project, category, content, rationale, context, tags, file_path,
                    outcome, worked, pinned, archived, importance_score, surprise_score,
                    provenance, happened_at, created_at, updated_at
             FROM memories WHERE id IN ({placeholders})"
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), row_to_memory)?;
        let mut out = Vec::with_capacity(ids.len());
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_embedding(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let row: Option<Option<Vec<u8>>> = reader
            .query_row(
                "SELECT embedding FROM memories WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.flatten())
    }

    pub fn all_embeddings(&self, project: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT id, embedding FROM memories WHERE project = ?1 AND embedding IS NOT NULL",
        )?;
        let rows = stmt.query_map(params![project], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// All non-archived memories for a project, for rebuilding the lexical index (C2).
    pub fn all_active_memories(&self, project: &str) -> Result<Vec<Memory>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT id, project, category, content, rationale, context, tags, file_path,
                    outcome, worked, pinned, archived, importance_score, surprise_score,
                    provenance, happened_at, created_at, updated_at
             FROM memories WHERE project = ?1 AND archived = 0",
        )?;
        let rows = stmt.query_map(params![project], row_to_memory)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn find_memories_by_file(&self, project: &str, file_path: &str) -> Result<Vec<Memory>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT id, project, category, content, rationale, context, tags, file_path,
                    outcome, worked, pinned, archived, importance_score, surprise_score,
                    provenance, happened_at, created_at, updated_at
             FROM memories WHERE project = ?1 AND file_path = ?2 AND archived = 0
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![project, file_path], row_to_memory)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Failed decisions older than `min_age_hours`, most recent first, for dreaming (C11).
    pub fn find_failed_decisions(
        &self,
        project: &str,
        min_age_hours: i64,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let cutoff = Utc::now() - chrono::Duration::hours(min_age_hours);
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT id, project, category, content, rationale, context, tags, file_path,
                    outcome, worked, pinned, archived, importance_score, surprise_score,
                    provenance, happened_at, created_at, updated_at
             FROM memories
             WHERE project = ?1 AND worked = 'false' AND archived = 0 AND created_at < ?2
             ORDER BY created_at DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![project, cutoff.to_rfc3339(), limit as i64],
            row_to_memory,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Decisions with no outcome yet, old enough to be reconsidered (C11 PendingOutcomeResolver).
    pub fn find_undecided_decisions(
        &self,
        project: &str,
        min_age_hours: i64,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let cutoff = Utc::now() - chrono::Duration::hours(min_age_hours);
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT id, project, category, content, rationale, context, tags, file_path,
                    outcome, worked, pinned, archived, importance_score, surprise_score,
                    provenance, happened_at, created_at, updated_at
             FROM memories
             WHERE project = ?1 AND category = 'decision' AND worked = 'unknown'
               AND archived = 0 AND created_at < ?2
             ORDER BY created_at ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![project, cutoff.to_rfc3339(), limit as i64],
            row_to_memory,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Versions (C7 storage primitives; temporal semantics live in `crate::temporal`)
    // ------------------------------------------------------------------

    pub fn insert_version(&self, version: &MemoryVersion) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO memory_versions
                (id, memory_id, version_number, content, rationale, context, tags, outcome,
                 worked, change_type, change_description, changed_at, valid_from, valid_to,
                 invalidated_by_version_id)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                version.id,
                version.memory_id,
                version.version_number,
                version.content,
                version.rationale,
                version.context.as_ref().map(|c| c.to_string()),
                serde_json::to_string(&version.tags).unwrap_or_else(|_| "[]".into()),
                version.outcome,
                version.worked.as_db_str(),
                version.change_type.as_db_str(),
                version.change_description,
                version.changed_at.to_rfc3339(),
                version.valid_from.to_rfc3339(),
                version.valid_to.map(|t| t.to_rfc3339()),
                version.invalidated_by_version_id,
            ],
        )?;
        Self::bump_change_feed(&writer, "memory_versions")?;
        Ok(())
    }

    pub fn max_version_number(&self, memory_id: &str) -> Result<u32> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row(
                "SELECT COALESCE(MAX(version_number), 0) FROM memory_versions WHERE memory_id = ?1",
                params![memory_id],
                |row| row.get(0),
            )
            .map_err(CoreError::from)
    }

    pub fn current_version(&self, memory_id: &str) -> Result<Option<MemoryVersion>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row(
                "SELECT id, memory_id, version_number, content, rationale, context, tags, outcome,
                        worked, change_type, change_description, changed_at, valid_from, valid_to,
                        invalidated_by_version_id
                 FROM memory_versions WHERE memory_id = ?1 AND valid_to IS NULL
                 ORDER BY version_number DESC LIMIT 1",
                params![memory_id],
                row_to_version,
            )
            .optional()
            .map_err(CoreError::from)
    }

    pub fn versions_for_memory(&self, memory_id: &str) -> Result<Vec<MemoryVersion>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT id, memory_id, version_number, content, rationale, context, tags, outcome,
                    worked, change_type, change_description, changed_at, valid_from, valid_to,
                    invalidated_by_version_id
             FROM memory_versions WHERE memory_id = ?1 ORDER BY version_number ASC",
        )?;
        let rows = stmt.query_map(params![memory_id], row_to_version)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn versions_for_memories(&self, memory_ids: &[String]) -> Result<Vec<MemoryVersion>> {
        if memory_ids.is_empty() {
            return Ok(Vec::new());
        }
        let reader = self.reader.lock().expect("reader lock poisoned");
        let placeholders = memory_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id, memory_id, version_number, content, rationale, context, tags, outcome,
                    worked, change_type, change_description, changed_at, valid_from, valid_to,
                    invalidated_by_version_id
             FROM memory_versions WHERE memory_id IN ({placeholders})
             ORDER BY valid_from ASC, changed_at ASC"
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(memory_ids.iter()), row_to_version)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Invalidate the currently-valid version, if any (§4.7). Idempotent: a
    /// version already invalidated is left untouched.
    pub fn invalidate_version(
        &self,
        version_id: &str,
        invalidated_by_version_id: &str,
        invalidation_time: DateTime<Utc>,
    ) -> Result<bool> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let changed = writer.execute(
            "UPDATE memory_versions SET valid_to = ?1, invalidated_by_version_id = ?2
             WHERE id = ?3 AND valid_to IS NULL",
            params![invalidation_time.to_rfc3339(), invalidated_by_version_id, version_id],
        )?;
        Ok(changed > 0)
    }

    pub fn versions_at_time(
        &self,
        memory_id: &str,
        as_of_valid_time: DateTime<Utc>,
        as_of_transaction_time: DateTime<Utc>,
    ) -> Result<Vec<MemoryVersion>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT id, memory_id, version_number, content, rationale, context, tags, outcome,
                    worked, change_type, change_description, changed_at, valid_from, valid_to,
                    invalidated_by_version_id
             FROM memory_versions
             WHERE memory_id = ?1
               AND valid_from <= ?2
               AND (valid_to IS NULL OR valid_to > ?2)
               AND changed_at <= ?3
             ORDER BY version_number DESC",
        )?;
        let rows = stmt.query_map(
            params![
                memory_id,
                as_of_valid_time.to_rfc3339(),
                as_of_transaction_time.to_rfc3339()
            ],
            row_to_version,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Entities & refs (C6)
    // ------------------------------------------------------------------

    pub fn upsert_entity(
        &self,
        project: &str,
        entity_type: EntityType,
        name: &str,
        qualified_name: Option<&str>,
    ) -> Result<Entity> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let existing: Option<(String, u32)> = writer
            .query_row(
                "SELECT id, mention_count FROM entities WHERE project = ?1 AND entity_type = ?2 AND name = ?3",
                params![project, entity_type.as_db_str(), name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (id, mention_count) = match existing {
            Some((id, count)) => {
                writer.execute(
                    "UPDATE entities SET mention_count = mention_count + 1 WHERE id = ?1",
                    params![id],
                )?;
                (id, count + 1)
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                writer.execute(
                    "INSERT INTO entities (id, project, entity_type, name, qualified_name, mention_count)
                     VALUES (?1,?2,?3,?4,?5,1)",
                    params![id, project, entity_type.as_db_str(), name, qualified_name],
                )?;
                (id, 1)
            }
        };

        Ok(Entity {
            id,
            project: project.to_string(),
            entity_type,
            name: name.to_string(),
            qualified_name: qualified_name.map(str::to_string),
            mention_count,
            code_entity_id: None,
        })
    }

    pub fn insert_entity_ref(
        &self,
        memory_id: &str,
        entity_id: &str,
        relationship: EntityRelationship,
        context_snippet: Option<&str>,
    ) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT OR IGNORE INTO memory_entity_refs (id, memory_id, entity_id, relationship, context_snippet)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                uuid::Uuid::new_v4().to_string(),
                memory_id,
                entity_id,
                relationship.as_db_str(),
                context_snippet,
            ],
        )?;
        Ok(())
    }

    pub fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row(
                "SELECT id, project, entity_type, name, qualified_name, mention_count, code_entity_id
                 FROM entities WHERE id = ?1",
                params![id],
                row_to_entity,
            )
            .optional()
            .map_err(CoreError::from)
    }

    pub fn find_entity_by_name(&self, project: &str, name: &str) -> Result<Option<Entity>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row(
                "SELECT id, project, entity_type, name, qualified_name, mention_count, code_entity_id
                 FROM entities WHERE project = ?1 AND name = ?2 LIMIT 1",
                params![project, name],
                row_to_entity,
            )
            .optional()
            .map_err(CoreError::from)
    }

    pub fn memory_ids_for_entity(&self, entity_id: &str) -> Result<Vec<String>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader
            .prepare("SELECT DISTINCT memory_id FROM memory_entity_refs WHERE entity_id = ?1")?;
        let rows = stmt.query_map(params![entity_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Entity names referenced by a set of memories, for community summaries.
    pub fn entity_names_for_memories(&self, memory_ids: &[String]) -> Result<Vec<String>> {
        if memory_ids.is_empty() {
            return Ok(Vec::new());
        }
        let reader = self.reader.lock().expect("reader lock poisoned");
        let placeholders = memory_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT DISTINCT e.name FROM entities e
             JOIN memory_entity_refs r ON r.entity_id = e.id
             WHERE r.memory_id IN ({placeholders})
             ORDER BY e.mention_count DESC"
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(memory_ids.iter()), |row| {
            row.get::<_, String>(0)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Entity ids referenced by a memory, used by ConnectionDiscovery overlap scoring.
    pub fn entity_ids_for_memory(&self, memory_id: &str) -> Result<Vec<String>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt =
            reader.prepare("SELECT entity_id FROM memory_entity_refs WHERE memory_id = ?1")?;
        let rows = stmt.query_map(params![memory_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Edges (C6)
    // ------------------------------------------------------------------

    pub fn insert_edge(&self, edge: &MemoryEdge) -> Result<()> {
        if edge.source_id == edge.target_id {
            return Err(CoreError::Invariant("self-links are forbidden".into()));
        }
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT OR IGNORE INTO memory_edges (id, source_id, target_id, relationship, confidence, description, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                edge.id,
                edge.source_id,
                edge.target_id,
                edge.relationship.as_db_str(),
                edge.confidence,
                edge.description,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Self::bump_change_feed(&writer, "memory_edges")?;
        Ok(())
    }

    pub fn delete_edge(
        &self,
        source_id: &str,
        target_id: &str,
        relationship: Option<EdgeRelationship>,
    ) -> Result<usize> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let affected = match relationship {
            Some(rel) => writer.execute(
                "DELETE FROM memory_edges WHERE source_id = ?1 AND target_id = ?2 AND relationship = ?3",
                params![source_id, target_id, rel.as_db_str()],
            )?,
            None => writer.execute(
                "DELETE FROM memory_edges WHERE source_id = ?1 AND target_id = ?2",
                params![source_id, target_id],
            )?,
        };
        Ok(affected)
    }

    pub fn edges_for_project(&self, project: &str) -> Result<Vec<MemoryEdge>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT e.id, e.source_id, e.target_id, e.relationship, e.confidence, e.description
             FROM memory_edges e
             JOIN memories m ON m.id = e.source_id
             WHERE m.project = ?1",
        )?;
        let rows = stmt.query_map(params![project], row_to_edge)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn edges_touching(&self, memory_id: &str) -> Result<Vec<MemoryEdge>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT id, source_id, target_id, relationship, confidence, description
             FROM memory_edges WHERE source_id = ?1 OR target_id = ?1",
        )?;
        let rows = stmt.query_map(params![memory_id], row_to_edge)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Full-text search (C4)
    // ------------------------------------------------------------------

    pub fn fts_search(&self, project: &str, query: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        let sanitized = sanitize_fts5_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT f.id, bm25(memories_fts) AS rank
             FROM memories_fts f
             JOIN memories m ON m.id = f.id
             WHERE memories_fts MATCH ?1 AND m.project = ?2 AND m.archived = 0
             ORDER BY rank LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![sanitized, project, limit as i64], |row| {
            // bm25() is negative and more negative is better; invert to a
            // positive score so it composes with the other retrievers.
            let rank: f64 = row.get(1)?;
            Ok((row.get::<_, String>(0)?, (-rank) as f32))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Snippet highlighting with caller-supplied delimiters (§4.4).
    pub fn fts_snippet(&self, id: &str, query: &str, pre: &str, post: &str) -> Result<Option<String>> {
        let sanitized = sanitize_fts5_query(query);
        if sanitized.is_empty() {
            return Ok(None);
        }
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row(
                "SELECT snippet(memories_fts, 1, ?1, ?2, '...', 32)
                 FROM memories_fts WHERE id = ?3 AND memories_fts MATCH ?4",
                params![pre, post, id, sanitized],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(CoreError::from)
    }

    // ------------------------------------------------------------------
    // Session state (C9)
    // ------------------------------------------------------------------

    pub fn get_session_state(&self, session_id: &str) -> Result<Option<SessionState>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row(
                "SELECT session_id, project, briefed, context_checks, pending_decisions, last_activity
                 FROM session_state WHERE session_id = ?1",
                params![session_id],
                row_to_session_state,
            )
            .optional()
            .map_err(CoreError::from)
    }

    pub fn put_session_state(&self, state: &SessionState) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO session_state (session_id, project, briefed, context_checks, pending_decisions, last_activity)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(session_id) DO UPDATE SET
                briefed = excluded.briefed,
                context_checks = excluded.context_checks,
                pending_decisions = excluded.pending_decisions,
                last_activity = excluded.last_activity",
            params![
                state.session_id,
                state.project,
                state.briefed as i64,
                serde_json::to_string(&state.context_checks).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&state.pending_decisions).unwrap_or_else(|_| "[]".into()),
                state.last_activity.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn clear_project_session_state(&self, project: &str) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute("DELETE FROM session_state WHERE project = ?1", params![project])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Communities (C6)
    // ------------------------------------------------------------------

    pub fn replace_communities(&self, project: &str, communities: &[Community]) -> Result<()> {
        let mut writer = self.writer.lock().expect("writer lock poisoned");
        let tx = writer.transaction()?;
        tx.execute("DELETE FROM communities WHERE project = ?1", params![project])?;
        for c in communities {
            tx.execute(
                "INSERT INTO communities (id, project, level, parent_community_id, member_memory_ids, key_entity_names, summary, built_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    c.id,
                    c.project,
                    c.level,
                    c.parent_community_id,
                    serde_json::to_string(&c.member_memory_ids).unwrap_or_else(|_| "[]".into()),
                    serde_json::to_string(&c.key_entity_names).unwrap_or_else(|_| "[]".into()),
                    c.summary,
                    Utc::now().to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn communities_for_project(&self, project: &str) -> Result<Vec<Community>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT id, project, level, parent_community_id, member_memory_ids, key_entity_names, summary
             FROM communities WHERE project = ?1 ORDER BY level, id",
        )?;
        let rows = stmt.query_map(params![project], row_to_community)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn communities_built_at(&self, project: &str) -> Result<Option<DateTime<Utc>>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let row: Option<Option<String>> = reader
            .query_row(
                "SELECT MAX(built_at) FROM communities WHERE project = ?1",
                params![project],
                |row| row.get(0),
            )
            .optional()?;
        row.flatten().map(|s| parse_rfc3339(&s).map_err(CoreError::from)).transpose()
    }

    // ------------------------------------------------------------------
    // Rules (C8 govern)
    // ------------------------------------------------------------------

    pub fn insert_rule(&self, rule: &Rule) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO rules (id, project, trigger_phrase, must_do, must_not, ask_first, warnings, priority, enabled)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                rule.id,
                rule.project,
                rule.trigger_phrase,
                serde_json::to_string(&rule.must_do).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&rule.must_not).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&rule.ask_first).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&rule.warnings).unwrap_or_else(|_| "[]".into()),
                rule.priority,
                rule.enabled as i64,
            ],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_rule(
        &self,
        rule_id: &str,
        trigger_phrase: Option<&str>,
        must_do: Option<&[String]>,
        must_not: Option<&[String]>,
        ask_first: Option<&[String]>,
        warnings: Option<&[String]>,
        priority: Option<i32>,
        enabled: Option<bool>,
    ) -> Result<bool> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let changed = writer.execute(
            "UPDATE rules SET
                trigger_phrase = COALESCE(?2, trigger_phrase),
                must_do = COALESCE(?3, must_do),
                must_not = COALESCE(?4, must_not),
                ask_first = COALESCE(?5, ask_first),
                warnings = COALESCE(?6, warnings),
                priority = COALESCE(?7, priority),
                enabled = COALESCE(?8, enabled)
             WHERE id = ?1",
            params![
                rule_id,
                trigger_phrase,
                must_do.map(|v| serde_json::to_string(v).unwrap_or_else(|_| "[]".into())),
                must_not.map(|v| serde_json::to_string(v).unwrap_or_else(|_| "[]".into())),
                ask_first.map(|v| serde_json::to_string(v).unwrap_or_else(|_| "[]".into())),
                warnings.map(|v| serde_json::to_string(v).unwrap_or_else(|_| "[]".into())),
                priority,
                enabled.map(|b| b as i64),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row(
                "SELECT id, project, trigger_phrase, must_do, must_not, ask_first, warnings, priority, enabled
                 FROM rules WHERE id = ?1",
                params![rule_id],
                row_to_rule,
            )
            .optional()
            .map_err(CoreError::from)
    }

    pub fn rules_for_project(&self, project: &str) -> Result<Vec<Rule>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT id, project, trigger_phrase, must_do, must_not, ask_first, warnings, priority, enabled
             FROM rules WHERE project = ?1 AND enabled = 1 ORDER BY priority DESC",
        )?;
        let rows = stmt.query_map(params![project], row_to_rule)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Background tasks (C12)
    // ------------------------------------------------------------------

    pub fn insert_task(&self, task: &BackgroundTask) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO background_tasks (task_id, name, project, state, created_at, started_at, completed_at, error, result)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                task.task_id,
                task.name,
                task.project,
                task_state_str(task.state),
                task.created_at.to_rfc3339(),
                task.started_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
                task.error,
                task.result.as_ref().map(|r| r.to_string()),
            ],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_task_state(
        &self,
        task_id: &str,
        state: TaskState,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        error: Option<&str>,
        result: Option<&serde_json::Value>,
    ) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "UPDATE background_tasks SET state = ?1, started_at = COALESCE(?2, started_at),
                completed_at = ?3, error = ?4, result = ?5 WHERE task_id = ?6",
            params![
                task_state_str(state),
                started_at.map(|t| t.to_rfc3339()),
                completed_at.map(|t| t.to_rfc3339()),
                error,
                result.map(|r| r.to_string()),
                task_id,
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<BackgroundTask>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row(
                "SELECT task_id, name, project, state, created_at, started_at, completed_at, error, result
                 FROM background_tasks WHERE task_id = ?1",
                params![task_id],
                row_to_task,
            )
            .optional()
            .map_err(CoreError::from)
    }

    // ------------------------------------------------------------------
    // Dream sessions & results (C11)
    // ------------------------------------------------------------------

    pub fn insert_dream_session(&self, session: &DreamSession) -> Result<()> {
        let mut writer = self.writer.lock().expect("writer lock poisoned");
        let tx = writer.transaction()?;
        tx.execute(
            "INSERT INTO dream_sessions (session_id, project, started_at, ended_at, strategies_run, decisions_reviewed, insights_generated, interrupted)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                session.session_id,
                session.project,
                session.started_at.to_rfc3339(),
                session.ended_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(&session.strategies_run).unwrap_or_else(|_| "[]".into()),
                session.decisions_reviewed,
                session.insights_generated,
                session.interrupted as i64,
            ],
        )?;
        for result in &session.results {
            tx.execute(
                "INSERT INTO dream_results (id, session_id, source_decision_id, original_content, original_outcome, insight, result_type, evidence_memory_ids)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    session.session_id,
                    result.source_decision_id,
                    result.original_content,
                    result.original_outcome,
                    result.insight,
                    dream_result_type_str(result.result_type),
                    serde_json::to_string(&result.evidence_memory_ids).unwrap_or_else(|_| "[]".into()),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Most recent dream session timestamp reviewing a decision, used by the
    /// review-cooldown guard in FailedDecisionReview.
    pub fn last_dream_review_time(&self, source_decision_id: &str) -> Result<Option<DateTime<Utc>>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let row: Option<String> = reader
            .query_row(
                "SELECT ds.started_at FROM dream_results dr
                 JOIN dream_sessions ds ON ds.session_id = dr.session_id
                 WHERE dr.source_decision_id = ?1
                 ORDER BY ds.started_at DESC LIMIT 1",
                params![source_decision_id],
                |row| row.get(0),
            )
            .optional()?;
        row.map(|s| parse_rfc3339(&s).map_err(CoreError::from)).transpose()
    }
}

/// Strip FTS5 operator characters a free-text query shouldn't accidentally
/// trigger, and quote each token so punctuation-heavy content never breaks
/// the MATCH grammar.
pub fn sanitize_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| {
            tok.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

fn task_state_str(state: TaskState) -> &'static str {
    match state {
        TaskState::Pending => "pending",
        TaskState::Running => "running",
        TaskState::Completed => "completed",
        TaskState::Failed => "failed",
        TaskState::Cancelled => "cancelled",
    }
}

fn task_state_from_str(s: &str) -> TaskState {
    match s {
        "running" => TaskState::Running,
        "completed" => TaskState::Completed,
        "failed" => TaskState::Failed,
        "cancelled" => TaskState::Cancelled,
        _ => TaskState::Pending,
    }
}

fn dream_result_type_str(t: DreamResultType) -> &'static str {
    match t {
        DreamResultType::Revised => "revised",
        DreamResultType::ConfirmedFailure => "confirmed_failure",
        DreamResultType::NeedsMoreData => "needs_more_data",
        DreamResultType::AutoResolvedSuccess => "auto_resolved_success",
        DreamResultType::AutoResolvedFailure => "auto_resolved_failure",
        DreamResultType::FlaggedForReview => "flagged_for_review",
        DreamResultType::InsufficientEvidence => "insufficient_evidence",
    }
}

fn parse_rfc3339(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let tags_json: String = row.get(6)?;
    let context_json: Option<String> = row.get(5)?;
    let provenance_json: Option<String> = row.get(14)?;
    let happened_at: Option<String> = row.get(15)?;
    Ok(Memory {
        id: row.get(0)?,
        project: row.get(1)?,
        category: Category::from_db_str(&row.get::<_, String>(2)?).unwrap_or(Category::Decision),
        content: row.get(3)?,
        rationale: row.get(4)?,
        context: context_json.and_then(|s| serde_json::from_str(&s).ok()),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        file_path: row.get(7)?,
        outcome: row.get(8)?,
        worked: Worked::from_db_str(&row.get::<_, String>(9)?),
        pinned: row.get::<_, i64>(10)? != 0,
        archived: row.get::<_, i64>(11)? != 0,
        importance_score: row.get(12)?,
        surprise_score: row.get(13)?,
        provenance: provenance_json.and_then(|s| serde_json::from_str(&s).ok()),
        happened_at: happened_at.map(|s| parse_rfc3339(&s)).transpose()?,
        created_at: parse_rfc3339(&row.get::<_, String>(16)?)?,
        updated_at: parse_rfc3339(&row.get::<_, String>(17)?)?,
    })
}

fn row_to_version(row: &rusqlite::Row) -> rusqlite::Result<MemoryVersion> {
    let tags_json: String = row.get(6)?;
    let context_json: Option<String> = row.get(5)?;
    let valid_to: Option<String> = row.get(13)?;
    Ok(MemoryVersion {
        id: row.get(0)?,
        memory_id: row.get(1)?,
        version_number: row.get(2)?,
        content: row.get(3)?,
        rationale: row.get(4)?,
        context: context_json.and_then(|s| serde_json::from_str(&s).ok()),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        outcome: row.get(7)?,
        worked: Worked::from_db_str(&row.get::<_, String>(8)?),
        change_type: ChangeType::from_db_str(&row.get::<_, String>(9)?),
        change_description: row.get(10)?,
        changed_at: parse_rfc3339(&row.get::<_, String>(11)?)?,
        valid_from: parse_rfc3339(&row.get::<_, String>(12)?)?,
        valid_to: valid_to.map(|s| parse_rfc3339(&s)).transpose()?,
        invalidated_by_version_id: row.get(14)?,
    })
}

fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        project: row.get(1)?,
        entity_type: EntityType::from_db_str(&row.get::<_, String>(2)?).unwrap_or(EntityType::Concept),
        name: row.get(3)?,
        qualified_name: row.get(4)?,
        mention_count: row.get(5)?,
        code_entity_id: row.get(6)?,
    })
}

fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<MemoryEdge> {
    Ok(MemoryEdge {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        relationship: EdgeRelationship::from_db_str(&row.get::<_, String>(3)?)
            .unwrap_or(EdgeRelationship::RelatedTo),
        confidence: row.get(4)?,
        description: row.get(5)?,
    })
}

fn row_to_session_state(row: &rusqlite::Row) -> rusqlite::Result<SessionState> {
    let checks_json: String = row.get(3)?;
    let pending_json: String = row.get(4)?;
    Ok(SessionState {
        session_id: row.get(0)?,
        project: row.get(1)?,
        briefed: row.get::<_, i64>(2)? != 0,
        context_checks: serde_json::from_str(&checks_json).unwrap_or_default(),
        pending_decisions: serde_json::from_str(&pending_json).unwrap_or_default(),
        last_activity: parse_rfc3339(&row.get::<_, String>(5)?)?,
    })
}

fn row_to_community(row: &rusqlite::Row) -> rusqlite::Result<Community> {
    let members_json: String = row.get(4)?;
    let entities_json: String = row.get(5)?;
    Ok(Community {
        id: row.get(0)?,
        project: row.get(1)?,
        level: row.get(2)?,
        parent_community_id: row.get(3)?,
        member_memory_ids: serde_json::from_str(&members_json).unwrap_or_default(),
        key_entity_names: serde_json::from_str(&entities_json).unwrap_or_default(),
        summary: row.get(6)?,
    })
}

fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<Rule> {
    let must_do: String = row.get(3)?;
    let must_not: String = row.get(4)?;
    let ask_first: String = row.get(5)?;
    let warnings: String = row.get(6)?;
    Ok(Rule {
        id: row.get(0)?,
        project: row.get(1)?,
        trigger_phrase: row.get(2)?,
        must_do: serde_json::from_str(&must_do).unwrap_or_default(),
        must_not: serde_json::from_str(&must_not).unwrap_or_default(),
        ask_first: serde_json::from_str(&ask_first).unwrap_or_default(),
        warnings: serde_json::from_str(&warnings).unwrap_or_default(),
        priority: row.get(7)?,
        enabled: row.get::<_, i64>(8)? != 0,
    })
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<BackgroundTask> {
    let started_at: Option<String> = row.get(5)?;
    let completed_at: Option<String> = row.get(6)?;
    let result_json: Option<String> = row.get(8)?;
    Ok(BackgroundTask {
        task_id: row.get(0)?,
        name: row.get(1)?,
        project: row.get(2)?,
        state: task_state_from_str(&row.get::<_, String>(3)?),
        created_at: parse_rfc3339(&row.get::<_, String>(4)?)?,
        started_at: started_at.map(|s| parse_rfc3339(&s)).transpose()?,
        completed_at: completed_at.map(|s| parse_rfc3339(&s)).transpose()?,
        error: row.get(7)?,
        result: result_json.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_memory(id: &str, content: &str) -> Memory {
        let now = Utc::now();
        Memory {
            id: id.to_string(),
            project: "proj".to_string(),
            category: Category::Decision,
            content: content.to_string(),
            rationale: None,
            context: None,
            tags: vec!["auth".to_string()],
            file_path: None,
            outcome: None,
            worked: Worked::Unknown,
            pinned: false,
            archived: false,
            importance_score: 0.0,
            surprise_score: 0.0,
            provenance: None,
            happened_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insert_and_get_memory_round_trips() {
        let storage = Storage::open_in_memory("proj1").unwrap();
        let mem = sample_memory("m1", "use sessions for auth");
        storage.insert_memory(&mem).unwrap();

        let fetched = storage.get_memory("m1").unwrap().unwrap();
        assert_eq!(fetched.content, "use sessions for auth");
        assert_eq!(fetched.tags, vec!["auth".to_string()]);
    }

    #[test]
    fn self_link_is_rejected() {
        let storage = Storage::open_in_memory("proj2").unwrap();
        let edge = MemoryEdge {
            id: "e1".into(),
            source_id: "m1".into(),
            target_id: "m1".into(),
            relationship: EdgeRelationship::RelatedTo,
            confidence: None,
            description: None,
        };
        assert!(storage.insert_edge(&edge).is_err());
    }

    #[test]
    fn fts_search_finds_inserted_content() {
        let storage = Storage::open_in_memory("proj3").unwrap();
        storage
            .insert_memory(&sample_memory("m1", "migrate auth sessions to redis"))
            .unwrap();

        let hits = storage.fts_search("proj", "redis", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "m1");
    }
}
