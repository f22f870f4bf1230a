use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous}, Row};
use uuid::Uuid;

use crate::agent::tools::ToolInvocationRecord;
use crate::session::SessionSnapshot;

#[derive(Clone)]
pub struct SqliteSessionRepository {
    pool: Pool<Sqlite>,
}

/// Durable sink for session snapshots and tool logs, keyed by session id.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn save_session(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()>;
    async fn load_session(&self, id: Uuid) -> anyhow::Result<Option<SessionSnapshot>>;
    async fn list_sessions(&self) -> anyhow::Result<Vec<Uuid>>;
    async fn delete_session(&self, id: Uuid) -> anyhow::Result<bool>;
    /// Appends records not stored yet; returns how many were new.
    async fn save_tool_log(&self, session_id: Uuid, records: &[ToolInvocationRecord]) -> anyhow::Result<usize>;
    async fn load_tool_log(&self, session_id: Uuid) -> anyhow::Result<Vec<ToolInvocationRecord>>;
}

impl SqliteSessionRepository {
    pub async fn initialize(database_url: Option<String>) -> anyhow::Result<Self> {
        let url = match database_url {
            Some(u) => u,
            None => resolve_default_db_url()?,
        };
        let options = url.parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
        let pool = Pool::<Sqlite>::connect_with(options).await?;
        sqlx::query("PRAGMA busy_timeout = 5000;").execute(&pool).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!(%url, "session store ready");
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool<Sqlite> { &self.pool }
}

fn resolve_default_db_url() -> anyhow::Result<String> {
    let base = std::env::var("XDG_DATA_HOME").ok().map(PathBuf::from).unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local").join("share")
    });
    let dir = base.join("doc_assistant");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("assistant.db");
    Ok(format!("sqlite://{}", path.to_string_lossy()))
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn save_session(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        let json = serde_json::to_string(snapshot)?;
        sqlx::query(
            "INSERT INTO sessions (id, user_id, created_at, updated_at, snapshot_json) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at, snapshot_json = excluded.snapshot_json",
        )
        .bind(snapshot.session_id.to_string())
        .bind(&snapshot.user_id)
        .bind(snapshot.created_at.to_rfc3339())
        .bind(snapshot.updated_at.to_rfc3339())
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_session(&self, id: Uuid) -> anyhow::Result<Option<SessionSnapshot>> {
        let row = sqlx::query("SELECT snapshot_json FROM sessions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let Some(r) = row else { return Ok(None) };
        let json: String = r.get("snapshot_json");
        Ok(Some(serde_json::from_str(&json)?))
    }

    async fn list_sessions(&self) -> anyhow::Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM sessions ORDER BY updated_at DESC").fetch_all(&self.pool).await?;
        let ids = rows.into_iter().filter_map(|r| {
            let id_str: String = r.get::<String, _>("id");
            Uuid::parse_str(&id_str).ok()
        }).collect();
        Ok(ids)
    }

    async fn delete_session(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM tool_invocations WHERE session_id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(res.rows_affected() > 0)
    }

    async fn save_tool_log(&self, session_id: Uuid, records: &[ToolInvocationRecord]) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for rec in records {
            let res = sqlx::query(
                "INSERT OR IGNORE INTO tool_invocations (id, session_id, tool, input_json, output, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(rec.id.to_string())
            .bind(session_id.to_string())
            .bind(&rec.tool)
            .bind(serde_json::to_string(&rec.input)?)
            .bind(&rec.output)
            .bind(&rec.error)
            .bind(rec.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
            inserted += res.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn load_tool_log(&self, session_id: Uuid) -> anyhow::Result<Vec<ToolInvocationRecord>> {
        let rows = sqlx::query(
            "SELECT id, tool, input_json, output, error, created_at FROM tool_invocations WHERE session_id = ?1 ORDER BY seq ASC",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| {
            let id_str: String = r.get("id");
            let input_json: String = r.get("input_json");
            let created_at: String = r.get("created_at");
            Ok::<_, anyhow::Error>(ToolInvocationRecord {
                id: Uuid::parse_str(&id_str)?,
                session_id,
                tool: r.get("tool"),
                input: serde_json::from_str(&input_json)?,
                output: r.try_get("output").ok().flatten(),
                error: r.try_get("error").ok().flatten(),
                created_at: parse_time(&created_at),
            })
        }).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::{ToolError, ToolInvocation, ToolOutput};
    use crate::session::{Message, SessionState};
    use crate::settings::SessionSettings;
    use serde_json::json;
    use tempfile::tempdir;

    async fn repo(dir: &tempfile::TempDir) -> SqliteSessionRepository {
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}", path.to_string_lossy());
        SqliteSessionRepository::initialize(Some(url)).await.unwrap()
    }

    #[tokio::test]
    async fn save_load_list_delete_session_roundtrip() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir).await;

        let mut state = SessionState::new("client-1", SessionSettings::default());
        state.messages.push(Message::user("hello"));
        state.active_documents.insert("INV-001".into());
        repo.save_session(&state.snapshot()).await.unwrap();

        state.messages.push(Message::assistant("hi"));
        state.conversation_summary = "greeting".into();
        repo.save_session(&state.snapshot()).await.unwrap();

        assert_eq!(repo.list_sessions().await.unwrap(), vec![state.session_id]);
        let got = repo.load_session(state.session_id).await.unwrap().unwrap();
        assert_eq!(got.user_id, "client-1");
        assert_eq!(got.messages.len(), 2);
        assert_eq!(got.conversation_summary, "greeting");
        assert!(got.active_documents.contains("INV-001"));

        assert!(repo.delete_session(state.session_id).await.unwrap());
        assert!(repo.list_sessions().await.unwrap().is_empty());
        assert!(repo.load_session(state.session_id).await.unwrap().is_none());
        assert!(!repo.delete_session(state.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn tool_log_is_append_only_and_ordered() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir).await;
        let sid = Uuid::new_v4();

        let ok = ToolInvocation {
            tool: "calculator".into(),
            input: json!({"expression": "1 + 1"}),
            outcome: Ok(ToolOutput::text("2")),
        };
        let bad = ToolInvocation {
            tool: "shell".into(),
            input: json!({}),
            outcome: Err(ToolError::UnknownTool("shell".into())),
        };
        let first = vec![
            ToolInvocationRecord::from_invocation(sid, &ok),
            ToolInvocationRecord::from_invocation(sid, &bad),
        ];
        assert_eq!(repo.save_tool_log(sid, &first).await.unwrap(), 2);

        let mut second = first.clone();
        second.push(ToolInvocationRecord::from_invocation(sid, &ok));
        assert_eq!(repo.save_tool_log(sid, &second).await.unwrap(), 1);

        let log = repo.load_tool_log(sid).await.unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].output.as_deref(), Some("2"));
        assert_eq!(log[1].error.as_deref(), Some("unknown tool `shell`"));
        assert_eq!(log[1].output, None);
        assert_eq!(log[2].id, second[2].id);
        assert_eq!(log[0].input, json!({"expression": "1 + 1"}));
    }

    #[tokio::test]
    async fn pragmas_and_migrations_applied() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}", path.to_string_lossy());
        let repo = SqliteSessionRepository::initialize(Some(url.clone())).await.unwrap();

        let row = sqlx::query("PRAGMA journal_mode;").fetch_one(repo.pool()).await.unwrap();
        let mode: String = row.get(0);
        assert!(mode.eq_ignore_ascii_case("wal"), "journal_mode should be WAL, got {}", mode);

        let row = sqlx::query("PRAGMA busy_timeout;").fetch_one(repo.pool()).await.unwrap();
        let timeout: i64 = row.get(0);
        assert!(timeout >= 5000, "busy_timeout should be at least 5000, got {}", timeout);

        // migrations are idempotent
        let _again = SqliteSessionRepository::initialize(Some(url)).await.unwrap();
    }
}
