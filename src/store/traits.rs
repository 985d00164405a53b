//! `EmailRepository` trait: the persistence collaborator of the ingestion loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::triage::types::{Category, ClassifiedEmail, Priority, TaskStatus};

/// A persisted, classified email.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmail {
    pub id: String,
    pub external_id: String,
    pub message_id: Option<String>,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub content: String,
    pub priority: Priority,
    pub category: Category,
    /// Sorted lexically.
    pub labels: Vec<String>,
    pub confidence: f64,
    pub received_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted task derived from an email.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTask {
    pub id: String,
    pub email_id: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Query options for `list_emails`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailFilter {
    pub category: Option<Category>,
    pub priority: Option<Priority>,
    /// Inclusive lower bound on `received_at`.
    pub received_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `received_at`.
    pub received_before: Option<DateTime<Utc>>,
    /// 1-based; 0 is treated as 1.
    pub page: u32,
    /// 0 means the default; otherwise clamped to `1..=MAX_PAGE_SIZE`.
    pub page_size: u32,
}

impl EmailFilter {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn received_between(mut self, after: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        self.received_after = Some(after);
        self.received_before = Some(before);
        self
    }

    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    /// Effective page size.
    pub fn limit(&self) -> u32 {
        if self.page_size == 0 {
            Self::DEFAULT_PAGE_SIZE
        } else {
            self.page_size.min(Self::MAX_PAGE_SIZE)
        }
    }

    /// Rows skipped before the current page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit())
    }
}

/// Storage for classified emails, their labels and tasks.
#[async_trait]
pub trait EmailRepository: Send + Sync {
    /// Persist an email with its labels and tasks as one atomic unit.
    ///
    /// Keyed by `external_id`: saving the same message again updates the
    /// existing row and replaces its labels and tasks. Returns the email id.
    async fn save(&self, email: &ClassifiedEmail) -> Result<String, DatabaseError>;

    async fn get_email(&self, id: &str) -> Result<Option<StoredEmail>, DatabaseError>;

    async fn get_email_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<StoredEmail>, DatabaseError>;

    /// Newest first.
    async fn list_emails(&self, filter: &EmailFilter) -> Result<Vec<StoredEmail>, DatabaseError>;

    /// Delete an email with its labels and tasks. Returns whether it existed.
    async fn delete_email(&self, id: &str) -> Result<bool, DatabaseError>;

    /// Tasks of one email, in extraction order.
    async fn list_tasks_for_email(&self, email_id: &str) -> Result<Vec<StoredTask>, DatabaseError>;

    /// Pending tasks across all emails, earliest due first.
    async fn list_pending_tasks(&self, limit: u32) -> Result<Vec<StoredTask>, DatabaseError>;

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<(), DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_page_defaults() {
        let filter = EmailFilter::default();
        assert_eq!(filter.limit(), 20);
        assert_eq!(filter.offset(), 0);
    }

    #[test]
    fn filter_page_size_is_clamped() {
        assert_eq!(EmailFilter::default().page(1, 500).limit(), 100);
        assert_eq!(EmailFilter::default().page(1, 1).limit(), 1);
    }

    #[test]
    fn filter_offset_is_one_based() {
        assert_eq!(EmailFilter::default().page(3, 10).offset(), 20);
        assert_eq!(EmailFilter::default().page(0, 10).offset(), 0);
    }
}
