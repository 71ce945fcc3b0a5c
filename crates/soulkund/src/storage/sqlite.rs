//! SQLite storage backend.
//!
//! Single connection behind a mutex, accessed through `spawn_blocking`. WAL
//! mode keeps concurrent request pipelines from blocking each other on
//! reads. Session, confirmation, and mode rows use `ON CONFLICT` upserts
//! keyed by (org_id, room_id, user_id) so concurrent retries cannot produce
//! lost updates or duplicate rows.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use soulkun_shared::{
    BrainError, Commitment, ConversationMode, ConversationTurn, ExecutionResult, GoalMemory,
    PendingConfirmation, PersonMemory, Provenance, Scope, SessionRecord, TaskMemory, Teaching,
    TurnRole, ValueAxis,
};

use super::{DecisionRecord, FeedbackRecord, Reminder, SoftConflictRecord, Storage};

pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create the database, enabling WAL and foreign keys.
    pub async fn open(db_path: PathBuf) -> Result<Self, BrainError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BrainError::Storage(format!("create db dir: {e}")))?;
        }

        info!("Opening database at {}", db_path.display());

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, rusqlite::Error> {
            let conn = Connection::open(&db_path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(conn)
        })
        .await
        .map_err(|e| BrainError::Storage(format!("join: {e}")))?
        .map_err(|e| BrainError::Storage(e.to_string()))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema().await?;
        Ok(storage)
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self, BrainError> {
        let conn = tokio::task::spawn_blocking(|| Connection::open_in_memory())
            .await
            .map_err(|e| BrainError::Storage(format!("join: {e}")))?
            .map_err(|e| BrainError::Storage(e.to_string()))?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema().await?;
        Ok(storage)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, BrainError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(|e| BrainError::Storage(format!("join: {e}")))?
        .map_err(|e| BrainError::Storage(e.to_string()))
    }

    async fn initialize_schema(&self) -> Result<(), BrainError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS turns (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    org_id TEXT NOT NULL,
                    room_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    text TEXT NOT NULL,
                    at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_turns_scope
                    ON turns(org_id, room_id, user_id, id);

                CREATE TABLE IF NOT EXISTS people (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    org_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    relation TEXT NOT NULL DEFAULT '',
                    note TEXT NOT NULL DEFAULT '',
                    taught_by TEXT NOT NULL,
                    taught_at TEXT NOT NULL,
                    confidence REAL NOT NULL
                );

                CREATE TABLE IF NOT EXISTS teachings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    org_id TEXT NOT NULL,
                    content TEXT NOT NULL,
                    taught_by TEXT NOT NULL,
                    taught_at TEXT NOT NULL,
                    confidence REAL NOT NULL
                );

                CREATE TABLE IF NOT EXISTS value_axes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    org_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    statement TEXT NOT NULL,
                    hard_rules TEXT NOT NULL,
                    themes TEXT NOT NULL,
                    taught_by TEXT NOT NULL,
                    taught_at TEXT NOT NULL,
                    confidence REAL NOT NULL
                );

                CREATE TABLE IF NOT EXISTS commitments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    org_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    summary TEXT NOT NULL,
                    hard_rules TEXT NOT NULL,
                    themes TEXT NOT NULL,
                    decided_at TEXT NOT NULL,
                    taught_by TEXT NOT NULL,
                    taught_at TEXT NOT NULL,
                    confidence REAL NOT NULL
                );

                CREATE TABLE IF NOT EXISTS goals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    org_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    progress_pct INTEGER NOT NULL DEFAULT 0,
                    due TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    org_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    done INTEGER NOT NULL DEFAULT 0,
                    due TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    org_id TEXT NOT NULL,
                    room_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    record TEXT NOT NULL,
                    expires_at TEXT NOT NULL,
                    PRIMARY KEY (org_id, room_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS confirmations (
                    org_id TEXT NOT NULL,
                    room_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    record TEXT NOT NULL,
                    expires_at TEXT NOT NULL,
                    PRIMARY KEY (org_id, room_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS modes (
                    org_id TEXT NOT NULL,
                    room_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    mode TEXT NOT NULL,
                    until TEXT NOT NULL,
                    PRIMARY KEY (org_id, room_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS executions (
                    idempotency_key TEXT PRIMARY KEY,
                    org_id TEXT NOT NULL,
                    room_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    result TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS decisions (
                    id TEXT PRIMARY KEY,
                    org_id TEXT NOT NULL,
                    room_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    message_hash TEXT NOT NULL,
                    decision_kind TEXT NOT NULL,
                    tool_names TEXT NOT NULL,
                    confidence_overall REAL NOT NULL,
                    verdict TEXT NOT NULL,
                    reason TEXT NOT NULL,
                    success INTEGER,
                    latency_ms INTEGER NOT NULL,
                    rationale TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS soft_conflicts (
                    id TEXT PRIMARY KEY,
                    org_id TEXT NOT NULL,
                    room_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    source TEXT NOT NULL,
                    subject TEXT NOT NULL,
                    action_name TEXT NOT NULL,
                    message_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS feedback (
                    id TEXT PRIMARY KEY,
                    org_id TEXT NOT NULL,
                    room_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    polarity TEXT NOT NULL,
                    message_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS reminders (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    org_id TEXT NOT NULL,
                    room_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    text TEXT NOT NULL,
                    due_at TEXT NOT NULL,
                    sent_key TEXT
                );",
            )?;
            Ok(())
        })
        .await
    }
}

fn role_to_str(role: TurnRole) -> &'static str {
    match role {
        TurnRole::User => "user",
        TurnRole::Assistant => "assistant",
    }
}

fn role_from_str(s: &str) -> TurnRole {
    match s {
        "assistant" => TurnRole::Assistant,
        _ => TurnRole::User,
    }
}

fn mode_to_str(mode: ConversationMode) -> &'static str {
    match mode {
        ConversationMode::Normal => "normal",
        ConversationMode::Listening => "listening",
    }
}

fn mode_from_str(s: &str) -> ConversationMode {
    match s {
        "listening" => ConversationMode::Listening,
        _ => ConversationMode::Normal,
    }
}

fn json_vec(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn append_turn(
        &self,
        scope: &Scope,
        turn: &ConversationTurn,
    ) -> Result<(), BrainError> {
        let scope = scope.clone();
        let turn = turn.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO turns (org_id, room_id, user_id, role, text, at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    scope.org_id,
                    scope.room_id,
                    scope.user_id,
                    role_to_str(turn.role),
                    turn.text,
                    turn.at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn recent_turns(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT role, text, at FROM turns
                 WHERE org_id = ?1 AND room_id = ?2 AND user_id = ?3
                 ORDER BY id DESC LIMIT ?4",
            )?;
            let mut turns: Vec<ConversationTurn> = stmt
                .query_map(
                    params![scope.org_id, scope.room_id, scope.user_id, limit as i64],
                    |row| {
                        let role: String = row.get(0)?;
                        let text: String = row.get(1)?;
                        let at: String = row.get(2)?;
                        Ok(ConversationTurn {
                            role: role_from_str(&role),
                            text,
                            at: DateTime::parse_from_rfc3339(&at)
                                .map(|dt| dt.with_timezone(&Utc))
                                .unwrap_or_else(|_| Utc::now()),
                        })
                    },
                )?
                .collect::<Result<_, _>>()?;
            turns.reverse();
            Ok(turns)
        })
        .await
    }

    async fn load_people(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<PersonMemory>, BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT name, relation, note, taught_by, taught_at, confidence FROM people
                 WHERE org_id = ?1 AND user_id = ?2
                 ORDER BY id DESC LIMIT ?3",
            )?;
            let people = stmt
                .query_map(
                    params![scope.org_id, scope.user_id, limit as i64],
                    |row| {
                        Ok(PersonMemory {
                            name: row.get(0)?,
                            relation: row.get(1)?,
                            note: row.get(2)?,
                            provenance: provenance_from_row(row, 3, 4, 5)?,
                        })
                    },
                )?
                .collect::<Result<_, _>>()?;
            Ok(people)
        })
        .await
    }

    async fn load_teachings(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<Teaching>, BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content, taught_by, taught_at, confidence FROM teachings
                 WHERE org_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let teachings = stmt
                .query_map(params![scope.org_id, limit as i64], |row| {
                    Ok(Teaching {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        provenance: provenance_from_row(row, 2, 3, 4)?,
                    })
                })?
                .collect::<Result<_, _>>()?;
            Ok(teachings)
        })
        .await
    }

    async fn load_value_axes(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<ValueAxis>, BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT name, statement, hard_rules, themes, taught_by, taught_at, confidence
                 FROM value_axes
                 WHERE org_id = ?1 AND user_id = ?2 ORDER BY id DESC LIMIT ?3",
            )?;
            let axes = stmt
                .query_map(
                    params![scope.org_id, scope.user_id, limit as i64],
                    |row| {
                        let hard_rules: String = row.get(2)?;
                        let themes: String = row.get(3)?;
                        Ok(ValueAxis {
                            name: row.get(0)?,
                            statement: row.get(1)?,
                            hard_rules: json_vec(&hard_rules),
                            themes: json_vec(&themes),
                            provenance: provenance_from_row(row, 4, 5, 6)?,
                        })
                    },
                )?
                .collect::<Result<_, _>>()?;
            Ok(axes)
        })
        .await
    }

    async fn load_commitments(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<Commitment>, BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT summary, hard_rules, themes, decided_at, taught_by, taught_at, confidence
                 FROM commitments
                 WHERE org_id = ?1 AND user_id = ?2 ORDER BY id DESC LIMIT ?3",
            )?;
            let commitments = stmt
                .query_map(
                    params![scope.org_id, scope.user_id, limit as i64],
                    |row| {
                        let hard_rules: String = row.get(1)?;
                        let themes: String = row.get(2)?;
                        let decided_at: String = row.get(3)?;
                        Ok(Commitment {
                            summary: row.get(0)?,
                            hard_rules: json_vec(&hard_rules),
                            themes: json_vec(&themes),
                            decided_at: parse_utc(&decided_at),
                            provenance: provenance_from_row(row, 4, 5, 6)?,
                        })
                    },
                )?
                .collect::<Result<_, _>>()?;
            Ok(commitments)
        })
        .await
    }

    async fn search_teachings(
        &self,
        scope: &Scope,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Teaching>, BrainError> {
        let scope = scope.clone();
        let pattern = format!("%{}%", query);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content, taught_by, taught_at, confidence FROM teachings
                 WHERE org_id = ?1 AND content LIKE ?2 ORDER BY id DESC LIMIT ?3",
            )?;
            let teachings = stmt
                .query_map(params![scope.org_id, pattern, limit as i64], |row| {
                    Ok(Teaching {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        provenance: provenance_from_row(row, 2, 3, 4)?,
                    })
                })?
                .collect::<Result<_, _>>()?;
            Ok(teachings)
        })
        .await
    }

    async fn add_teaching(&self, scope: &Scope, content: &str) -> Result<i64, BrainError> {
        let scope = scope.clone();
        let content = content.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO teachings (org_id, content, taught_by, taught_at, confidence)
                 VALUES (?1, ?2, ?3, ?4, 1.0)",
                params![scope.org_id, content, scope.user_id, Utc::now().to_rfc3339()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn create_goal(
        &self,
        scope: &Scope,
        title: &str,
        due: Option<DateTime<Utc>>,
    ) -> Result<i64, BrainError> {
        let scope = scope.clone();
        let title = title.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO goals (org_id, user_id, title, progress_pct, due, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)",
                params![
                    scope.org_id,
                    scope.user_id,
                    title,
                    due.map(|d| d.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn list_goals(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<GoalMemory>, BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, progress_pct, due, user_id, created_at FROM goals
                 WHERE org_id = ?1 AND user_id = ?2 ORDER BY id LIMIT ?3",
            )?;
            let goals = stmt
                .query_map(
                    params![scope.org_id, scope.user_id, limit as i64],
                    |row| {
                        let due: Option<String> = row.get(3)?;
                        let taught_by: String = row.get(4)?;
                        let created_at: String = row.get(5)?;
                        Ok(GoalMemory {
                            id: row.get(0)?,
                            title: row.get(1)?,
                            progress_pct: row.get::<_, i64>(2)? as u8,
                            due: due.map(|d| parse_utc(&d)),
                            provenance: Provenance {
                                taught_by,
                                taught_at: parse_utc(&created_at),
                                confidence: 1.0,
                            },
                        })
                    },
                )?
                .collect::<Result<_, _>>()?;
            Ok(goals)
        })
        .await
    }

    async fn update_goal_progress(
        &self,
        scope: &Scope,
        goal_id: i64,
        pct: u8,
    ) -> Result<bool, BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE goals SET progress_pct = ?1
                 WHERE id = ?2 AND org_id = ?3 AND user_id = ?4",
                params![pct as i64, goal_id, scope.org_id, scope.user_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_goal(&self, scope: &Scope, goal_id: i64) -> Result<bool, BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM goals WHERE id = ?1 AND org_id = ?2 AND user_id = ?3",
                params![goal_id, scope.org_id, scope.user_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn create_task(
        &self,
        scope: &Scope,
        title: &str,
        due: Option<DateTime<Utc>>,
    ) -> Result<i64, BrainError> {
        let scope = scope.clone();
        let title = title.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tasks (org_id, user_id, title, done, due, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)",
                params![
                    scope.org_id,
                    scope.user_id,
                    title,
                    due.map(|d| d.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn complete_task(&self, scope: &Scope, task_id: i64) -> Result<bool, BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE tasks SET done = 1
                 WHERE id = ?1 AND org_id = ?2 AND user_id = ?3 AND done = 0",
                params![task_id, scope.org_id, scope.user_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn list_tasks(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<TaskMemory>, BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, done, due, user_id, created_at FROM tasks
                 WHERE org_id = ?1 AND user_id = ?2 ORDER BY id LIMIT ?3",
            )?;
            let tasks = stmt
                .query_map(
                    params![scope.org_id, scope.user_id, limit as i64],
                    |row| {
                        let due: Option<String> = row.get(3)?;
                        let taught_by: String = row.get(4)?;
                        let created_at: String = row.get(5)?;
                        Ok(TaskMemory {
                            id: row.get(0)?,
                            title: row.get(1)?,
                            done: row.get::<_, i64>(2)? != 0,
                            due: due.map(|d| parse_utc(&d)),
                            provenance: Provenance {
                                taught_by,
                                taught_at: parse_utc(&created_at),
                                confidence: 1.0,
                            },
                        })
                    },
                )?
                .collect::<Result<_, _>>()?;
            Ok(tasks)
        })
        .await
    }

    async fn active_session(&self, scope: &Scope) -> Result<Option<SessionRecord>, BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            let record: Option<String> = conn
                .query_row(
                    "SELECT record FROM sessions
                     WHERE org_id = ?1 AND room_id = ?2 AND user_id = ?3",
                    params![scope.org_id, scope.room_id, scope.user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(record.and_then(|r| serde_json::from_str(&r).ok()))
        })
        .await
    }

    async fn upsert_session(&self, session: &SessionRecord) -> Result<(), BrainError> {
        let scope = session.scope.clone();
        let record = serde_json::to_string(session)?;
        let expires_at = session.expires_at.to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (org_id, room_id, user_id, record, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(org_id, room_id, user_id)
                 DO UPDATE SET record = excluded.record, expires_at = excluded.expires_at",
                params![scope.org_id, scope.room_id, scope.user_id, record, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn clear_session(&self, scope: &Scope) -> Result<(), BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM sessions WHERE org_id = ?1 AND room_id = ?2 AND user_id = ?3",
                params![scope.org_id, scope.room_id, scope.user_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn pending_confirmation(
        &self,
        scope: &Scope,
    ) -> Result<Option<PendingConfirmation>, BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            let record: Option<String> = conn
                .query_row(
                    "SELECT record FROM confirmations
                     WHERE org_id = ?1 AND room_id = ?2 AND user_id = ?3",
                    params![scope.org_id, scope.room_id, scope.user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(record.and_then(|r| serde_json::from_str(&r).ok()))
        })
        .await
    }

    async fn upsert_confirmation(&self, pending: &PendingConfirmation) -> Result<(), BrainError> {
        let scope = pending.scope.clone();
        let record = serde_json::to_string(pending)?;
        let expires_at = pending.expires_at.to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO confirmations (org_id, room_id, user_id, record, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(org_id, room_id, user_id)
                 DO UPDATE SET record = excluded.record, expires_at = excluded.expires_at",
                params![scope.org_id, scope.room_id, scope.user_id, record, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_confirmation(&self, scope: &Scope) -> Result<(), BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM confirmations WHERE org_id = ?1 AND room_id = ?2 AND user_id = ?3",
                params![scope.org_id, scope.room_id, scope.user_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn conversation_mode(
        &self,
        scope: &Scope,
    ) -> Result<Option<(ConversationMode, DateTime<Utc>)>, BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT mode, until FROM modes
                     WHERE org_id = ?1 AND room_id = ?2 AND user_id = ?3",
                    params![scope.org_id, scope.room_id, scope.user_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(row.map(|(mode, until)| (mode_from_str(&mode), parse_utc(&until))))
        })
        .await
    }

    async fn set_conversation_mode(
        &self,
        scope: &Scope,
        mode: ConversationMode,
        until: DateTime<Utc>,
    ) -> Result<(), BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO modes (org_id, room_id, user_id, mode, until)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(org_id, room_id, user_id)
                 DO UPDATE SET mode = excluded.mode, until = excluded.until",
                params![
                    scope.org_id,
                    scope.room_id,
                    scope.user_id,
                    mode_to_str(mode),
                    until.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn clear_conversation_mode(&self, scope: &Scope) -> Result<(), BrainError> {
        let scope = scope.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM modes WHERE org_id = ?1 AND room_id = ?2 AND user_id = ?3",
                params![scope.org_id, scope.room_id, scope.user_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn executed_result(&self, key: &str) -> Result<Option<ExecutionResult>, BrainError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let result: Option<String> = conn
                .query_row(
                    "SELECT result FROM executions WHERE idempotency_key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(result.and_then(|r| serde_json::from_str(&r).ok()))
        })
        .await
    }

    async fn record_execution(
        &self,
        key: &str,
        scope: &Scope,
        result: &ExecutionResult,
    ) -> Result<(), BrainError> {
        let key = key.to_string();
        let scope = scope.clone();
        let result = serde_json::to_string(result)?;
        self.with_conn(move |conn| {
            // First write wins: a concurrent retry keeps the original result.
            conn.execute(
                "INSERT OR IGNORE INTO executions
                 (idempotency_key, org_id, room_id, user_id, result, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    key,
                    scope.org_id,
                    scope.room_id,
                    scope.user_id,
                    result,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_decision(&self, record: &DecisionRecord) -> Result<(), BrainError> {
        let record = record.clone();
        let tool_names = serde_json::to_string(&record.tool_names)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO decisions
                 (id, org_id, room_id, user_id, message_hash, decision_kind, tool_names,
                  confidence_overall, verdict, reason, success, latency_ms, rationale, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.id.to_string(),
                    record.scope.org_id,
                    record.scope.room_id,
                    record.scope.user_id,
                    record.message_hash,
                    record.decision_kind,
                    tool_names,
                    record.confidence_overall,
                    record.verdict,
                    record.reason,
                    record.success,
                    record.latency_ms as i64,
                    record.rationale,
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_soft_conflict(&self, record: &SoftConflictRecord) -> Result<(), BrainError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO soft_conflicts
                 (id, org_id, room_id, user_id, source, subject, action_name, message_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id.to_string(),
                    record.scope.org_id,
                    record.scope.room_id,
                    record.scope.user_id,
                    record.source,
                    record.subject,
                    record.action_name,
                    record.message_hash,
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_feedback(&self, record: &FeedbackRecord) -> Result<(), BrainError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO feedback
                 (id, org_id, room_id, user_id, polarity, message_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id.to_string(),
                    record.scope.org_id,
                    record.scope.room_id,
                    record.scope.user_id,
                    record.polarity,
                    record.message_hash,
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn recent_soft_conflicts(
        &self,
        org_id: &str,
        limit: usize,
    ) -> Result<Vec<SoftConflictRecord>, BrainError> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, org_id, room_id, user_id, source, subject, action_name,
                        message_hash, created_at
                 FROM soft_conflicts WHERE org_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let records = stmt
                .query_map(params![org_id, limit as i64], |row| {
                    let id: String = row.get(0)?;
                    let created_at: String = row.get(8)?;
                    Ok(SoftConflictRecord {
                        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
                        scope: Scope {
                            org_id: row.get(1)?,
                            room_id: row.get(2)?,
                            user_id: row.get(3)?,
                        },
                        source: row.get(4)?,
                        subject: row.get(5)?,
                        action_name: row.get(6)?,
                        message_hash: row.get(7)?,
                        created_at: parse_utc(&created_at),
                    })
                })?
                .collect::<Result<_, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn recent_decisions(
        &self,
        org_id: &str,
        limit: usize,
    ) -> Result<Vec<DecisionRecord>, BrainError> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, org_id, room_id, user_id, message_hash, decision_kind, tool_names,
                        confidence_overall, verdict, reason, success, latency_ms, rationale,
                        created_at
                 FROM decisions WHERE org_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let records = stmt
                .query_map(params![org_id, limit as i64], |row| {
                    let id: String = row.get(0)?;
                    let tool_names: String = row.get(6)?;
                    let created_at: String = row.get(13)?;
                    Ok(DecisionRecord {
                        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
                        scope: Scope {
                            org_id: row.get(1)?,
                            room_id: row.get(2)?,
                            user_id: row.get(3)?,
                        },
                        message_hash: row.get(4)?,
                        decision_kind: row.get(5)?,
                        tool_names: json_vec(&tool_names),
                        confidence_overall: row.get(7)?,
                        verdict: row.get(8)?,
                        reason: row.get(9)?,
                        success: row.get(10)?,
                        latency_ms: row.get::<_, i64>(11)? as u64,
                        rationale: row.get(12)?,
                        created_at: parse_utc(&created_at),
                    })
                })?
                .collect::<Result<_, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn add_reminder(
        &self,
        scope: &Scope,
        text: &str,
        due_at: DateTime<Utc>,
    ) -> Result<i64, BrainError> {
        let scope = scope.clone();
        let text = text.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO reminders (org_id, room_id, user_id, text, due_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    scope.org_id,
                    scope.room_id,
                    scope.user_id,
                    text,
                    due_at.to_rfc3339(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn due_reminders(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>, BrainError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, org_id, room_id, user_id, text, due_at FROM reminders
                 WHERE sent_key IS NULL AND due_at <= ?1 ORDER BY due_at LIMIT ?2",
            )?;
            let reminders = stmt
                .query_map(params![now.to_rfc3339(), limit as i64], |row| {
                    let due_at: String = row.get(5)?;
                    Ok(Reminder {
                        id: row.get(0)?,
                        scope: Scope {
                            org_id: row.get(1)?,
                            room_id: row.get(2)?,
                            user_id: row.get(3)?,
                        },
                        text: row.get(4)?,
                        due_at: parse_utc(&due_at),
                    })
                })?
                .collect::<Result<_, _>>()?;
            Ok(reminders)
        })
        .await
    }

    async fn claim_reminder(&self, id: i64, idempotency_key: &str) -> Result<bool, BrainError> {
        let key = idempotency_key.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE reminders SET sent_key = ?1 WHERE id = ?2 AND sent_key IS NULL",
                params![key, id],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

fn parse_utc(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn provenance_from_row(
    row: &rusqlite::Row<'_>,
    by_idx: usize,
    at_idx: usize,
    conf_idx: usize,
) -> rusqlite::Result<Provenance> {
    let taught_by: String = row.get(by_idx)?;
    let taught_at: String = row.get(at_idx)?;
    let confidence: f64 = row.get(conf_idx)?;
    Ok(Provenance {
        taught_by,
        taught_at: parse_utc(&taught_at),
        confidence,
    })
}
