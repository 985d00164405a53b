//! libSQL backend: async `EmailRepository` implementation.
//!
//! Supports local file and in-memory databases. Writes run inside a
//! transaction so an email, its labels and its tasks commit together.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{EmailFilter, EmailRepository, StoredEmail, StoredTask};
use crate::triage::types::{Category, ClassifiedEmail, Priority, TaskStatus};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// Serializes write transactions on the shared connection.
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn labels_for(&self, email_id: &str) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT label FROM email_labels WHERE email_id = ?1 ORDER BY label",
                params![email_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("labels_for: {e}")))?;

        let mut labels = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("labels_for: {e}")))?
        {
            labels.push(
                row.get::<String>(0)
                    .map_err(|e| DatabaseError::Query(format!("labels_for row parse: {e}")))?,
            );
        }
        Ok(labels)
    }

    /// Run an email query and attach labels to every row.
    async fn query_emails(
        &self,
        sql: &str,
        values: Vec<libsql::Value>,
    ) -> Result<Vec<StoredEmail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("query_emails: {e}")))?;

        let mut emails = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_email(&row) {
                Ok(email) => emails.push(email),
                Err(e) => warn!("Skipping email row: {e}"),
            }
        }
        for email in &mut emails {
            email.labels = self.labels_for(&email.id).await?;
        }
        Ok(emails)
    }

    async fn query_tasks(
        &self,
        sql: &str,
        values: Vec<libsql::Value>,
    ) -> Result<Vec<StoredTask>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("query_tasks: {e}")))?;

        let mut tasks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_task(&row) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!("Skipping task row: {e}"),
            }
        }
        Ok(tasks)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format: fixed-width RFC 3339 in UTC, so text order is time order.
fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn tx_err(op: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Transaction(format!("{op}: {e}"))
}

const EMAIL_COLUMNS: &str = "id, external_id, message_id, subject, sender, recipient, content, priority, category, confidence, received_at, processed_at, created_at, updated_at";

const TASK_COLUMNS: &str =
    "id, email_id, description, due_date, priority, status, created_at, updated_at";

/// Map a libsql Row to a StoredEmail (labels are attached separately).
fn row_to_email(row: &libsql::Row) -> Result<StoredEmail, libsql::Error> {
    let priority: String = row.get(7)?;
    let category: String = row.get(8)?;
    let received: String = row.get(10)?;
    let processed: String = row.get(11)?;
    let created: String = row.get(12)?;
    let updated: String = row.get(13)?;

    Ok(StoredEmail {
        id: row.get(0)?,
        external_id: row.get(1)?,
        message_id: row.get::<Option<String>>(2)?,
        subject: row.get(3)?,
        from: row.get(4)?,
        to: row.get(5)?,
        content: row.get(6)?,
        priority: priority.parse().unwrap_or(Priority::Low),
        category: category.parse().unwrap_or(Category::Other),
        labels: Vec::new(),
        confidence: row.get(9)?,
        received_at: parse_datetime(&received),
        processed_at: parse_datetime(&processed),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Map a libsql Row to a StoredTask. Column order matches TASK_COLUMNS.
fn row_to_task(row: &libsql::Row) -> Result<StoredTask, libsql::Error> {
    let due: String = row.get(3)?;
    let priority: String = row.get(4)?;
    let status: String = row.get(5)?;
    let created: String = row.get(6)?;
    let updated: String = row.get(7)?;

    Ok(StoredTask {
        id: row.get(0)?,
        email_id: row.get(1)?,
        description: row.get(2)?,
        due_date: parse_datetime(&due),
        priority: priority.parse().unwrap_or(Priority::Medium),
        status: status.parse().unwrap_or(TaskStatus::Pending),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl EmailRepository for LibSqlBackend {
    async fn save(&self, email: &ClassifiedEmail) -> Result<String, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let now = fmt_datetime(&Utc::now());

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(tx_err("save: begin"))?;

        let existing: Option<String> = {
            let mut rows = tx
                .query(
                    "SELECT id FROM emails WHERE external_id = ?1",
                    params![email.external_id.as_str()],
                )
                .await
                .map_err(tx_err("save: lookup"))?;
            match rows.next().await.map_err(tx_err("save: lookup"))? {
                Some(row) => Some(row.get(0).map_err(tx_err("save: lookup"))?),
                None => None,
            }
        };

        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE emails SET message_id = ?1, subject = ?2, sender = ?3, recipient = ?4,
                        content = ?5, priority = ?6, category = ?7, confidence = ?8,
                        received_at = ?9, processed_at = ?10, updated_at = ?11
                     WHERE id = ?12",
                    params![
                        opt_text(email.message_id.as_deref()),
                        email.subject.as_str(),
                        email.from.as_str(),
                        email.to.as_str(),
                        email.content.as_str(),
                        email.priority.as_str(),
                        email.category.as_str(),
                        email.confidence,
                        fmt_datetime(&email.received_at),
                        fmt_datetime(&email.processed_at),
                        now.as_str(),
                        id.as_str(),
                    ],
                )
                .await
                .map_err(tx_err("save: update email"))?;

                tx.execute("DELETE FROM email_labels WHERE email_id = ?1", params![id.as_str()])
                    .await
                    .map_err(tx_err("save: clear labels"))?;
                tx.execute("DELETE FROM tasks WHERE email_id = ?1", params![id.as_str()])
                    .await
                    .map_err(tx_err("save: clear tasks"))?;
                debug!(id = %id, external_id = %email.external_id, "Email updated");
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO emails (id, external_id, message_id, subject, sender, recipient,
                        content, priority, category, confidence, received_at, processed_at,
                        created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                    params![
                        id.as_str(),
                        email.external_id.as_str(),
                        opt_text(email.message_id.as_deref()),
                        email.subject.as_str(),
                        email.from.as_str(),
                        email.to.as_str(),
                        email.content.as_str(),
                        email.priority.as_str(),
                        email.category.as_str(),
                        email.confidence,
                        fmt_datetime(&email.received_at),
                        fmt_datetime(&email.processed_at),
                        now.as_str(),
                    ],
                )
                .await
                .map_err(tx_err("save: insert email"))?;
                debug!(id = %id, external_id = %email.external_id, "Email inserted");
                id
            }
        };

        for label in &email.labels {
            tx.execute(
                "INSERT OR IGNORE INTO email_labels (email_id, label) VALUES (?1, ?2)",
                params![id.as_str(), label.as_str()],
            )
            .await
            .map_err(tx_err("save: insert label"))?;
        }

        for (position, task) in email.tasks.iter().enumerate() {
            tx.execute(
                "INSERT INTO tasks (id, email_id, position, description, due_date, priority,
                    status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    Uuid::new_v4().to_string(),
                    id.as_str(),
                    position as i64,
                    task.description.as_str(),
                    fmt_datetime(&task.due_date),
                    task.priority.as_str(),
                    task.status.as_str(),
                    fmt_datetime(&task.created_at),
                    fmt_datetime(&task.updated_at),
                ],
            )
            .await
            .map_err(tx_err("save: insert task"))?;
        }

        tx.commit().await.map_err(tx_err("save: commit"))?;
        Ok(id)
    }

    async fn get_email(&self, id: &str) -> Result<Option<StoredEmail>, DatabaseError> {
        let emails = self
            .query_emails(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                vec![libsql::Value::Text(id.to_string())],
            )
            .await?;
        Ok(emails.into_iter().next())
    }

    async fn get_email_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<StoredEmail>, DatabaseError> {
        let emails = self
            .query_emails(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE external_id = ?1"),
                vec![libsql::Value::Text(external_id.to_string())],
            )
            .await?;
        Ok(emails.into_iter().next())
    }

    async fn list_emails(&self, filter: &EmailFilter) -> Result<Vec<StoredEmail>, DatabaseError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<libsql::Value> = Vec::new();

        if let Some(category) = filter.category {
            values.push(libsql::Value::Text(category.as_str().into()));
            clauses.push("category = ?");
        }
        if let Some(priority) = filter.priority {
            values.push(libsql::Value::Text(priority.as_str().into()));
            clauses.push("priority = ?");
        }
        if let Some(after) = &filter.received_after {
            values.push(libsql::Value::Text(fmt_datetime(after)));
            clauses.push("received_at >= ?");
        }
        if let Some(before) = &filter.received_before {
            values.push(libsql::Value::Text(fmt_datetime(before)));
            clauses.push("received_at < ?");
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        values.push(libsql::Value::Integer(i64::from(filter.limit())));
        values.push(libsql::Value::Integer(filter.offset() as i64));

        self.query_emails(
            &format!(
                "SELECT {EMAIL_COLUMNS} FROM emails {where_sql}
                 ORDER BY received_at DESC, id ASC LIMIT ? OFFSET ?"
            ),
            values,
        )
        .await
    }

    async fn delete_email(&self, id: &str) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(tx_err("delete_email: begin"))?;

        tx.execute("DELETE FROM email_labels WHERE email_id = ?1", params![id])
            .await
            .map_err(tx_err("delete_email: labels"))?;
        tx.execute("DELETE FROM tasks WHERE email_id = ?1", params![id])
            .await
            .map_err(tx_err("delete_email: tasks"))?;
        let deleted = tx
            .execute("DELETE FROM emails WHERE id = ?1", params![id])
            .await
            .map_err(tx_err("delete_email: email"))?;

        tx.commit().await.map_err(tx_err("delete_email: commit"))?;
        if deleted > 0 {
            debug!(id, "Email deleted");
        }
        Ok(deleted > 0)
    }

    async fn list_tasks_for_email(&self, email_id: &str) -> Result<Vec<StoredTask>, DatabaseError> {
        self.query_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE email_id = ?1 ORDER BY position ASC"),
            vec![libsql::Value::Text(email_id.to_string())],
        )
        .await
    }

    async fn list_pending_tasks(&self, limit: u32) -> Result<Vec<StoredTask>, DatabaseError> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 'pending'
                 ORDER BY due_date ASC, id ASC LIMIT ?1"
            ),
            vec![libsql::Value::Integer(i64::from(limit))],
        )
        .await
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let now = fmt_datetime(&Utc::now());
        let updated = self
            .conn()
            .execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_task_status: {e}")))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "task".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }
}
