//! SQLite-backed work queue.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::QueueError;
use super::traits::WorkQueue;
use super::types::{DeadLetter, Delivery, Lease, ProcessingTask, QueueStats};

/// Work queue stored in SQLite.
///
/// Tasks survive restarts. Leases are wall-clock deadlines stored with the
/// row; consumers poll, and in-process enqueues wake them early.
pub struct SqliteWorkQueue {
    conn: Mutex<Connection>,
    visibility_timeout: Duration,
    poll_interval: Duration,
    notify: Notify,
}

impl SqliteWorkQueue {
    /// Open the queue in the given database file, creating tables if needed.
    pub fn new(
        path: &Path,
        visibility_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, QueueError> {
        let conn = Connection::open(path).map_err(|e| QueueError::Storage(e.to_string()))?;
        Self::from_connection(conn, visibility_timeout, poll_interval)
    }

    /// Create an in-memory queue (useful for testing).
    pub fn in_memory(
        visibility_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, QueueError> {
        let conn =
            Connection::open_in_memory().map_err(|e| QueueError::Storage(e.to_string()))?;
        Self::from_connection(conn, visibility_timeout, poll_interval)
    }

    fn from_connection(
        conn: Connection,
        visibility_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, QueueError> {
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            visibility_timeout,
            poll_interval,
            notify: Notify::new(),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), QueueError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_tasks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL UNIQUE,
                body TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                lease_id TEXT,
                lease_expires_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_queue_tasks_lease ON queue_tasks(lease_expires_at);

            CREATE TABLE IF NOT EXISTS queue_dead_letters (
                task_id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                attempt_count INTEGER NOT NULL,
                reason TEXT NOT NULL,
                dead_lettered_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| QueueError::Storage(e.to_string()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, QueueError> {
        self.conn
            .lock()
            .map_err(|e| QueueError::Storage(e.to_string()))
    }

    fn decode_task(body: &str, attempt_count: u32) -> Result<ProcessingTask, QueueError> {
        let mut task: ProcessingTask =
            serde_json::from_str(body).map_err(|e| QueueError::Serialization(e.to_string()))?;
        task.attempt_count = attempt_count;
        Ok(task)
    }

    /// Reclaim expired leases and lease the oldest visible task, in one transaction.
    fn try_receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        let now = Utc::now().timestamp_millis();

        let reclaimed = tx
            .execute(
                "UPDATE queue_tasks SET lease_id = NULL, lease_expires_at = NULL, attempt_count = attempt_count + 1 WHERE lease_expires_at IS NOT NULL AND lease_expires_at <= ?",
                params![now],
            )
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        if reclaimed > 0 {
            debug!(count = reclaimed, "Expired leases reclaimed");
        }

        let delivery = loop {
            let row: Option<(i64, String, String, u32)> = tx
                .query_row(
                    "SELECT seq, task_id, body, attempt_count FROM queue_tasks WHERE lease_id IS NULL ORDER BY seq LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            let Some((seq, task_id, body, attempt_count)) = row else {
                break None;
            };

            // An unreadable row must not block the rows behind it.
            let task = match Self::decode_task(&body, attempt_count) {
                Ok(task) => task,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Quarantining undecodable task");
                    Self::quarantine(&tx, seq, &task_id, &body, attempt_count, &e.to_string())?;
                    continue;
                }
            };

            let lease_id = uuid::Uuid::new_v4().to_string();
            let expires_at = now + self.visibility_timeout.as_millis() as i64;
            tx.execute(
                "UPDATE queue_tasks SET lease_id = ?, lease_expires_at = ? WHERE seq = ?",
                params![lease_id, expires_at, seq],
            )
            .map_err(|e| QueueError::Storage(e.to_string()))?;

            break Some(Delivery {
                task,
                lease: Lease {
                    id: lease_id,
                    task_id,
                },
            });
        };

        tx.commit().map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(delivery)
    }

    /// Move a row to the dead-letter table inside `tx`.
    fn quarantine(
        tx: &Transaction<'_>,
        seq: i64,
        task_id: &str,
        body: &str,
        attempt_count: u32,
        reason: &str,
    ) -> Result<(), QueueError> {
        tx.execute(
            "INSERT OR REPLACE INTO queue_dead_letters (task_id, body, attempt_count, reason, dead_lettered_at) VALUES (?, ?, ?, ?, ?)",
            params![task_id, body, attempt_count, reason, Utc::now().to_rfc3339()],
        )
        .map_err(|e| QueueError::Storage(e.to_string()))?;
        tx.execute("DELETE FROM queue_tasks WHERE seq = ?", params![seq])
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(())
    }

    fn lost(lease: &Lease) -> QueueError {
        QueueError::LeaseLost {
            lease_id: lease.id.clone(),
        }
    }
}

#[async_trait]
impl WorkQueue for SqliteWorkQueue {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn enqueue(&self, task: ProcessingTask) -> Result<(), QueueError> {
        let body =
            serde_json::to_string(&task).map_err(|e| QueueError::Serialization(e.to_string()))?;
        {
            let conn = self.lock()?;
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO queue_tasks (task_id, body, attempt_count) VALUES (?, ?, ?)",
                    params![task.task_id, body, task.attempt_count],
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            if inserted == 0 {
                return Err(QueueError::Duplicate {
                    task_id: task.task_id,
                });
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(delivery) = self.try_receive()? {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wake_at = (now + self.poll_interval).min(deadline);
            let _ = tokio::time::timeout_at(wake_at, self.notify.notified()).await;
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM queue_tasks WHERE task_id = ? AND lease_id = ?",
                params![lease.task_id, lease.id],
            )
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        if removed == 0 {
            return Err(Self::lost(lease));
        }
        Ok(())
    }

    async fn nack(&self, lease: &Lease) -> Result<(), QueueError> {
        {
            let conn = self.lock()?;
            let updated = conn
                .execute(
                    "UPDATE queue_tasks SET lease_id = NULL, lease_expires_at = NULL, attempt_count = attempt_count + 1 WHERE task_id = ? AND lease_id = ?",
                    params![lease.task_id, lease.id],
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            if updated == 0 {
                return Err(Self::lost(lease));
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn dead_letter(&self, lease: &Lease, reason: &str) -> Result<(), QueueError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        let row: Option<(String, u32)> = tx
            .query_row(
                "SELECT body, attempt_count FROM queue_tasks WHERE task_id = ? AND lease_id = ?",
                params![lease.task_id, lease.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        let Some((body, attempt_count)) = row else {
            return Err(Self::lost(lease));
        };

        tx.execute(
            "INSERT OR REPLACE INTO queue_dead_letters (task_id, body, attempt_count, reason, dead_lettered_at) VALUES (?, ?, ?, ?, ?)",
            params![lease.task_id, body, attempt_count, reason, Utc::now().to_rfc3339()],
        )
        .map_err(|e| QueueError::Storage(e.to_string()))?;
        tx.execute(
            "DELETE FROM queue_tasks WHERE task_id = ?",
            params![lease.task_id],
        )
        .map_err(|e| QueueError::Storage(e.to_string()))?;

        tx.commit().map_err(|e| QueueError::Storage(e.to_string()))
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp_millis();

        let (total, leased): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN lease_expires_at > ? THEN 1 ELSE 0 END), 0) FROM queue_tasks",
                params![now],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        let dead: i64 = conn
            .query_row("SELECT COUNT(*) FROM queue_dead_letters", [], |row| {
                row.get(0)
            })
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        Ok(QueueStats {
            ready: (total - leased) as usize,
            leased: leased as usize,
            dead_lettered: dead as usize,
        })
    }

    async fn in_flight_by_tenant(&self) -> Result<BTreeMap<String, usize>, QueueError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT task_id, body, attempt_count FROM queue_tasks")
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                ))
            })
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (task_id, body, attempt_count) =
                row.map_err(|e| QueueError::Storage(e.to_string()))?;
            // Undecodable rows are quarantined on receive and never hold a slot.
            match Self::decode_task(&body, attempt_count) {
                Ok(task) => *counts.entry(task.tenant_id).or_insert(0) += 1,
                Err(e) => debug!(task_id = %task_id, error = %e, "Skipping undecodable task"),
            }
        }
        Ok(counts)
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT body, attempt_count, reason, dead_lettered_at FROM queue_dead_letters ORDER BY dead_lettered_at",
            )
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        let mut dead = Vec::new();
        for row in rows {
            let (body, attempt_count, reason, at) =
                row.map_err(|e| QueueError::Storage(e.to_string()))?;
            let dead_lettered_at = DateTime::parse_from_rfc3339(&at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| QueueError::Serialization(e.to_string()))?;
            match Self::decode_task(&body, attempt_count) {
                Ok(task) => dead.push(DeadLetter {
                    task,
                    reason,
                    dead_lettered_at,
                }),
                Err(e) => debug!(error = %e, "Skipping undecodable dead letter"),
            }
        }
        Ok(dead)
    }
}
