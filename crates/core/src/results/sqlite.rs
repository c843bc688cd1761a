//! SQLite-backed result store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::store::ResultStore;
use super::types::{check_key, check_write, ResultError, ResultRecord, ResultStatus};

const COLUMNS: &str = "tenant_id, conversation_id, task_id, status, sentiment_score, summary, tags, error, created_at, updated_at, completed_at";

/// Result store persisted in SQLite.
///
/// Each put runs its read-check-write in one transaction.
pub struct SqliteResultStore {
    conn: Mutex<Connection>,
}

impl SqliteResultStore {
    /// Open the store in the given database file, creating tables if needed.
    pub fn new(path: &Path) -> Result<Self, ResultError> {
        let conn = Connection::open(path).map_err(|e| ResultError::Storage(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, ResultError> {
        let conn =
            Connection::open_in_memory().map_err(|e| ResultError::Storage(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ResultError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS results (
                tenant_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                status TEXT NOT NULL,
                sentiment_score REAL,
                summary TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                PRIMARY KEY (tenant_id, conversation_id)
            );

            CREATE INDEX IF NOT EXISTS idx_results_status ON results(status);
            "#,
        )
        .map_err(|e| ResultError::Storage(e.to_string()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ResultError> {
        self.conn
            .lock()
            .map_err(|e| ResultError::Storage(e.to_string()))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ResultRecord> {
        let status_str: String = row.get(3)?;
        let tags_json: String = row.get(6)?;
        let created_at_str: String = row.get(8)?;
        let updated_at_str: String = row.get(9)?;
        let completed_at_str: Option<String> = row.get(10)?;

        let status = ResultStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown status {}", status_str).into(),
            )
        })?;

        Ok(ResultRecord {
            tenant_id: row.get(0)?,
            conversation_id: row.get(1)?,
            task_id: row.get(2)?,
            status,
            sentiment_score: row.get(4)?,
            summary: row.get(5)?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            error: row.get(7)?,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
            completed_at: completed_at_str.as_deref().map(parse_timestamp),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl ResultStore for SqliteResultStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn get(
        &self,
        tenant_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ResultRecord>, ResultError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM results WHERE tenant_id = ? AND conversation_id = ?",
                COLUMNS
            ),
            params![tenant_id, conversation_id],
            Self::row_to_record,
        )
        .optional()
        .map_err(|e| ResultError::Storage(e.to_string()))
    }

    fn put(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        record: ResultRecord,
    ) -> Result<(), ResultError> {
        check_key(tenant_id, conversation_id, &record)?;

        let tags_json =
            serde_json::to_string(&record.tags).map_err(|e| ResultError::Storage(e.to_string()))?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| ResultError::Storage(e.to_string()))?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {} FROM results WHERE tenant_id = ? AND conversation_id = ?",
                    COLUMNS
                ),
                params![tenant_id, conversation_id],
                Self::row_to_record,
            )
            .optional()
            .map_err(|e| ResultError::Storage(e.to_string()))?;
        check_write(existing.as_ref(), &record)?;

        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO results ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                COLUMNS
            ),
            params![
                record.tenant_id,
                record.conversation_id,
                record.task_id,
                record.status.as_str(),
                record.sentiment_score,
                record.summary,
                tags_json,
                record.error,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.completed_at.map(|dt| dt.to_rfc3339()),
            ],
        )
        .map_err(|e| ResultError::Storage(e.to_string()))?;

        tx.commit().map_err(|e| ResultError::Storage(e.to_string()))
    }

    fn list(&self, tenant_id: &str) -> Result<Vec<ResultRecord>, ResultError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM results WHERE tenant_id = ? ORDER BY conversation_id",
                COLUMNS
            ))
            .map_err(|e| ResultError::Storage(e.to_string()))?;

        let records = stmt
            .query_map(params![tenant_id], Self::row_to_record)
            .map_err(|e| ResultError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ResultError::Storage(e.to_string()))?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_round_trip() {
        let store = SqliteResultStore::in_memory().unwrap();
        let pending = ResultRecord::pending("t1", "c1", "task-1");
        store.put("t1", "c1", pending.clone()).unwrap();

        let completed = pending.to_processing().to_completed(
            0.625,
            "Processed text length 10.".to_string(),
            vec!["finance".to_string(), "risk".to_string()],
        );
        store.put("t1", "c1", completed.clone()).unwrap();

        let stored = store.get("t1", "c1").unwrap().unwrap();
        assert_eq!(stored.status, ResultStatus::Completed);
        assert_eq!(stored.sentiment_score, Some(0.625));
        assert_eq!(stored.tags, vec!["finance", "risk"]);
        assert_eq!(stored.task_id, "task-1");
        assert!(stored.completed_at.is_some());
    }

    #[test]
    fn test_lifecycle_enforced() {
        let store = SqliteResultStore::in_memory().unwrap();
        let pending = ResultRecord::pending("t1", "c1", "task-1");
        store.put("t1", "c1", pending.clone()).unwrap();
        store.put("t1", "c1", pending.to_processing()).unwrap();

        assert!(matches!(
            store.put("t1", "c1", ResultRecord::pending("t1", "c1", "task-2")),
            Err(ResultError::InFlight { .. })
        ));

        store
            .put("t1", "c1", pending.to_processing().to_failed("boom"))
            .unwrap();
        assert!(matches!(
            store.put("t1", "c1", pending.to_processing()),
            Err(ResultError::InvalidTransition { .. })
        ));

        let stored = store.get("t1", "c1").unwrap().unwrap();
        assert_eq!(stored.status, ResultStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_list_scoped_to_tenant() {
        let store = SqliteResultStore::in_memory().unwrap();
        for (tenant, conv) in [("t1", "c2"), ("t1", "c1"), ("t2", "c1")] {
            store
                .put(
                    tenant,
                    conv,
                    ResultRecord::pending(tenant, conv, format!("{}-{}", tenant, conv)),
                )
                .unwrap();
        }

        let t1: Vec<_> = store
            .list("t1")
            .unwrap()
            .into_iter()
            .map(|r| r.conversation_id)
            .collect();
        assert_eq!(t1, vec!["c1", "c2"]);
        assert_eq!(store.list("t2").unwrap().len(), 1);
        assert!(store.list("t3").unwrap().is_empty());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.db");
        {
            let store = SqliteResultStore::new(&path).unwrap();
            store
                .put("t1", "c1", ResultRecord::pending("t1", "c1", "task-1"))
                .unwrap();
        }
        let store = SqliteResultStore::new(&path).unwrap();
        assert_eq!(
            store.get("t1", "c1").unwrap().unwrap().status,
            ResultStatus::Pending
        );
    }
}
