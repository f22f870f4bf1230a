use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ToolInvocation;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocationRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub tool: String,
    pub input: Value,
    pub output: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ToolInvocationRecord {
    pub fn from_invocation(session_id: Uuid, invocation: &ToolInvocation) -> Self {
        let (output, error) = match &invocation.outcome {
            Ok(out) => (Some(out.content.clone()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            id: Uuid::new_v4(),
            session_id,
            tool: invocation.tool.clone(),
            input: invocation.input.clone(),
            output,
            error,
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> &'static str {
        if self.error.is_some() { "error" } else { "ok" }
    }
}

/// Process-wide, append-only tool log keyed by session.
///
/// Records are built before the write lock is taken, so readers only ever
/// observe whole records. Nothing is removed or reordered.
#[derive(Clone, Default)]
pub struct ToolLogger {
    records: Arc<RwLock<HashMap<Uuid, Vec<ToolInvocationRecord>>>>,
}

impl ToolLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn log(&self, record: ToolInvocationRecord) {
        let mut records = self.records.write().await;
        records.entry(record.session_id).or_default().push(record);
    }

    pub async fn snapshot(&self, session_id: Uuid) -> Vec<ToolInvocationRecord> {
        self.records.read().await.get(&session_id).cloned().unwrap_or_default()
    }

    pub async fn len(&self, session_id: Uuid) -> usize {
        self.records.read().await.get(&session_id).map_or(0, Vec::len)
    }

    pub async fn export_json(&self, session_id: Uuid) -> serde_json::Result<String> {
        let snapshot = self.snapshot(session_id).await;
        serde_json::to_string_pretty(&snapshot)
    }
}
