//! Ingestion loop integration tests.
//!
//! Drives `IngestionLoop` with a scripted in-memory mailbox and a libSQL
//! in-memory store, optionally wrapped to fail saves on demand.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use inbox_triage::error::{DatabaseError, Error, MailboxError};
use inbox_triage::ingest::{IngestStats, IngestionLoop, spawn_ingestion_loop};
use inbox_triage::mailbox::{FetchedMessage, Mailbox, WatchEvent};
use inbox_triage::store::{EmailFilter, EmailRepository, LibSqlBackend, StoredEmail, StoredTask};
use inbox_triage::triage::{
    Category, ClassifiedEmail, Language, Priority, RuleAnalyzer, TaskStatus, TextAnalyzer,
};

const HANG_GUARD: Duration = Duration::from_secs(5);

// ── Scripted mailbox ────────────────────────────────────────────────

#[derive(Default)]
struct MailboxState {
    messages: BTreeMap<u32, Vec<u8>>,
    seen: BTreeSet<u32>,
    events: VecDeque<WatchEvent>,
    fetched: Vec<u32>,
    marked: Vec<u32>,
    fail_connect: bool,
    fail_select: bool,
    fail_search_once: bool,
    fail_mark_seen_once: bool,
    /// When the event script runs out: block until cancelled instead of
    /// reporting cancellation straight away.
    block_when_idle: bool,
    searches: usize,
    waits: usize,
    closed: bool,
}

#[derive(Clone, Default)]
struct ScriptedMailbox {
    state: Arc<Mutex<MailboxState>>,
}

impl ScriptedMailbox {
    fn with_messages(messages: &[(u32, Vec<u8>)]) -> Self {
        let mailbox = Self::default();
        mailbox.state.lock().unwrap().messages = messages.iter().cloned().collect();
        mailbox
    }

    fn push_events(&self, events: &[WatchEvent]) {
        self.state.lock().unwrap().events.extend(events.iter().copied());
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Mailbox for ScriptedMailbox {
    async fn connect(&mut self) -> Result<(), MailboxError> {
        if self.state().fail_connect {
            return Err(MailboxError::Connect {
                host: "imap.example.com".into(),
                port: 993,
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }

    async fn select_folder(&mut self) -> Result<(), MailboxError> {
        if self.state().fail_select {
            return Err(MailboxError::SelectFolder {
                folder: "INBOX".into(),
                reason: "NO no such mailbox".into(),
            });
        }
        Ok(())
    }

    async fn search_unseen(&mut self) -> Result<Vec<u32>, MailboxError> {
        let mut state = self.state();
        state.searches += 1;
        if std::mem::take(&mut state.fail_search_once) {
            return Err(MailboxError::Command {
                command: "UID SEARCH".into(),
                reason: "BAD".into(),
            });
        }
        Ok(state
            .messages
            .keys()
            .filter(|uid| !state.seen.contains(*uid))
            .copied()
            .collect())
    }

    async fn fetch(&mut self, uid: u32) -> Result<FetchedMessage, MailboxError> {
        let mut state = self.state();
        state.fetched.push(uid);
        let raw = state
            .messages
            .get(&uid)
            .cloned()
            .ok_or_else(|| MailboxError::Protocol(format!("no message {uid}")))?;
        Ok(FetchedMessage {
            uid,
            external_id: format!("INBOX:1:{uid}"),
            raw,
        })
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), MailboxError> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_mark_seen_once) {
            return Err(MailboxError::Command {
                command: "UID STORE".into(),
                reason: "NO read-only".into(),
            });
        }
        state.seen.insert(uid);
        state.marked.push(uid);
        Ok(())
    }

    async fn wait_for_change(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<WatchEvent, MailboxError> {
        let (next, block) = {
            let mut state = self.state();
            state.waits += 1;
            (state.events.pop_front(), state.block_when_idle)
        };
        match next {
            Some(event) => Ok(event),
            None if block => {
                cancel.cancelled().await;
                Ok(WatchEvent::Cancelled)
            }
            None => Ok(WatchEvent::Cancelled),
        }
    }

    async fn close(&mut self) -> Result<(), MailboxError> {
        self.state().closed = true;
        Ok(())
    }
}

// ── Repository wrapper ──────────────────────────────────────────────

/// libSQL store that records save order and can fail the next N saves.
struct FlakyRepository {
    inner: LibSqlBackend,
    fail_next: AtomicUsize,
    saved: Mutex<Vec<String>>,
}

impl FlakyRepository {
    async fn new(fail_next: usize) -> Self {
        Self {
            inner: LibSqlBackend::new_memory().await.unwrap(),
            fail_next: AtomicUsize::new(fail_next),
            saved: Mutex::new(Vec::new()),
        }
    }

    fn saved(&self) -> Vec<String> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailRepository for FlakyRepository {
    async fn save(&self, email: &ClassifiedEmail) -> Result<String, DatabaseError> {
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DatabaseError::Transaction("disk I/O error".into()));
        }
        let id = self.inner.save(email).await?;
        self.saved.lock().unwrap().push(email.external_id.clone());
        Ok(id)
    }

    async fn get_email(&self, id: &str) -> Result<Option<StoredEmail>, DatabaseError> {
        self.inner.get_email(id).await
    }

    async fn get_email_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<StoredEmail>, DatabaseError> {
        self.inner.get_email_by_external_id(external_id).await
    }

    async fn list_emails(&self, filter: &EmailFilter) -> Result<Vec<StoredEmail>, DatabaseError> {
        self.inner.list_emails(filter).await
    }

    async fn delete_email(&self, id: &str) -> Result<bool, DatabaseError> {
        self.inner.delete_email(id).await
    }

    async fn list_tasks_for_email(&self, email_id: &str) -> Result<Vec<StoredTask>, DatabaseError> {
        self.inner.list_tasks_for_email(email_id).await
    }

    async fn list_pending_tasks(&self, limit: u32) -> Result<Vec<StoredTask>, DatabaseError> {
        self.inner.list_pending_tasks(limit).await
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<(), DatabaseError> {
        self.inner.update_task_status(id, status).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn raw_email(subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: Alice <alice@example.com>\r\n\
         To: Triage <triage@example.com>\r\n\
         Subject: {subject}\r\n\
         Date: Tue, 10 Mar 2026 14:30:00 +0000\r\n\
         \r\n\
         {body}\r\n"
    )
    .into_bytes()
}

fn analyzer() -> Arc<dyn TextAnalyzer> {
    Arc::new(RuleAnalyzer::default())
}

/// Run until the mailbox's event script is exhausted.
async fn run_script(
    mailbox: ScriptedMailbox,
    repository: Arc<dyn EmailRepository>,
    analyzer: Arc<dyn TextAnalyzer>,
    batch: usize,
) -> Result<IngestStats, Error> {
    let cancel = CancellationToken::new();
    let ingestion = IngestionLoop::new(mailbox, repository, analyzer, batch);
    tokio::time::timeout(HANG_GUARD, ingestion.run(cancel))
        .await
        .expect("ingestion loop hung")
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn drains_backlog_in_uid_order_and_marks_seen() {
    let mailbox = ScriptedMailbox::with_messages(&[
        (7, raw_email("Fatura", "Por favor pague a fatura.")),
        (3, raw_email("Reunião", "Urgente: preciso do relatório até amanhã")),
        (5, raw_email("oi", "")),
    ]);
    let repo = Arc::new(FlakyRepository::new(0).await);

    let stats = run_script(mailbox.clone(), repo.clone(), analyzer(), 2)
        .await
        .unwrap();

    assert_eq!(stats.processed, 3);
    assert_eq!(stats.cycles, 1);
    assert_eq!(repo.saved(), vec!["INBOX:1:3", "INBOX:1:5", "INBOX:1:7"]);

    let state = mailbox.state();
    assert_eq!(state.fetched, vec![3, 5, 7]);
    assert_eq!(state.marked, vec![3, 5, 7]);
    assert!(state.closed);
}

#[tokio::test]
async fn stored_record_carries_classification() {
    let mailbox = ScriptedMailbox::with_messages(&[(
        1,
        raw_email("Reunião", "Urgente: preciso do relatório até amanhã"),
    )]);
    let repo = Arc::new(FlakyRepository::new(0).await);

    run_script(mailbox, repo.clone(), analyzer(), 10)
        .await
        .unwrap();

    let stored = repo
        .get_email_by_external_id("INBOX:1:1")
        .await
        .unwrap()
        .expect("email saved");
    assert_eq!(stored.priority, Priority::High);
    assert_eq!(stored.category, Category::Sales);
    assert_eq!(stored.from, "alice@example.com");
    assert!(stored.processed_at >= stored.received_at);

    let tasks = repo.list_tasks_for_email(&stored.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Pending);
}

#[tokio::test]
async fn failed_save_leaves_message_unseen_until_retry() {
    let mailbox = ScriptedMailbox::with_messages(&[
        (1, raw_email("Fatura", "Por favor pague a fatura.")),
        (2, raw_email("Suporte", "O sistema apresentou um erro.")),
    ]);
    mailbox.push_events(&[WatchEvent::Changed]);
    let repo = Arc::new(FlakyRepository::new(1).await);

    let stats = run_script(mailbox.clone(), repo.clone(), analyzer(), 10)
        .await
        .unwrap();

    assert_eq!(stats.save_failures, 1);
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.cycles, 2);

    let state = mailbox.state();
    // First pass: uid 1 fails to save and is not marked; uid 2 succeeds.
    // Second pass retries uid 1 only.
    assert_eq!(state.fetched, vec![1, 2, 1]);
    assert_eq!(state.marked, vec![2, 1]);
    assert_eq!(repo.saved(), vec!["INBOX:1:2", "INBOX:1:1"]);
}

#[tokio::test]
async fn mark_seen_failure_reprocesses_without_duplicates() {
    let mailbox =
        ScriptedMailbox::with_messages(&[(4, raw_email("Fatura", "Por favor pague a fatura."))]);
    mailbox.state().fail_mark_seen_once = true;
    mailbox.push_events(&[WatchEvent::TimedOut]);
    let repo = Arc::new(FlakyRepository::new(0).await);

    let stats = run_script(mailbox.clone(), repo.clone(), analyzer(), 10)
        .await
        .unwrap();

    assert_eq!(stats.mark_seen_failures, 1);
    assert_eq!(stats.processed, 2);
    assert_eq!(repo.saved(), vec!["INBOX:1:4", "INBOX:1:4"]);

    let all = repo.list_emails(&EmailFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(mailbox.state().marked, vec![4]);
}

#[tokio::test]
async fn unparseable_message_is_skipped_and_left_unseen() {
    let mailbox = ScriptedMailbox::with_messages(&[
        (1, Vec::new()),
        (2, raw_email("Fatura", "Por favor pague a fatura.")),
    ]);
    let repo = Arc::new(FlakyRepository::new(0).await);

    let stats = run_script(mailbox.clone(), repo.clone(), analyzer(), 10)
        .await
        .unwrap();

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.processed, 1);
    assert_eq!(mailbox.state().marked, vec![2]);
    assert_eq!(repo.saved(), vec!["INBOX:1:2"]);
}

#[tokio::test]
async fn normalization_failure_skips_message() {
    let mailbox = ScriptedMailbox::with_messages(&[(
        1,
        raw_email("Relatório", "Este corpo é longo demais para o limite configurado."),
    )]);
    let repo = Arc::new(FlakyRepository::new(0).await);
    let tiny: Arc<dyn TextAnalyzer> = Arc::new(RuleAnalyzer::new(Language::Portuguese, 8));

    let stats = run_script(mailbox.clone(), repo.clone(), tiny, 10)
        .await
        .unwrap();

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.processed, 0);
    assert!(mailbox.state().marked.is_empty());
    assert!(repo.saved().is_empty());
}

#[tokio::test]
async fn search_failure_waits_for_next_change() {
    let mailbox =
        ScriptedMailbox::with_messages(&[(9, raw_email("Fatura", "Por favor pague a fatura."))]);
    mailbox.state().fail_search_once = true;
    mailbox.push_events(&[WatchEvent::Changed]);
    let repo = Arc::new(FlakyRepository::new(0).await);

    let stats = run_script(mailbox.clone(), repo.clone(), analyzer(), 10)
        .await
        .unwrap();

    assert_eq!(stats.processed, 1);
    assert_eq!(mailbox.state().searches, 2);
}

#[tokio::test]
async fn connect_failure_is_fatal() {
    let mailbox = ScriptedMailbox::default();
    mailbox.state().fail_connect = true;
    let repo = Arc::new(FlakyRepository::new(0).await);

    let err = run_script(mailbox.clone(), repo, analyzer(), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Mailbox(MailboxError::Connect { .. })));
    assert_eq!(mailbox.state().searches, 0);
}

#[tokio::test]
async fn select_failure_is_fatal_and_closes_session() {
    let mailbox = ScriptedMailbox::default();
    mailbox.state().fail_select = true;
    let repo = Arc::new(FlakyRepository::new(0).await);

    let err = run_script(mailbox.clone(), repo, analyzer(), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Mailbox(MailboxError::SelectFolder { .. })));
    assert!(mailbox.state().closed);
}

#[tokio::test]
async fn spawned_loop_stops_on_cancel() {
    let mailbox =
        ScriptedMailbox::with_messages(&[(1, raw_email("Fatura", "Por favor pague a fatura."))]);
    mailbox.state().block_when_idle = true;
    let repo = Arc::new(FlakyRepository::new(0).await);
    let cancel = CancellationToken::new();

    let ingestion = IngestionLoop::new(mailbox.clone(), repo.clone(), analyzer(), 10);
    let handle = spawn_ingestion_loop(ingestion, cancel.clone());

    // Wait for the backlog to drain; the loop then blocks in the watch.
    tokio::time::timeout(HANG_GUARD, async {
        while mailbox.state().marked.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("backlog never drained");
    assert!(!handle.is_finished());

    cancel.cancel();
    let stats = tokio::time::timeout(HANG_GUARD, handle)
        .await
        .expect("loop ignored cancellation")
        .unwrap()
        .unwrap();

    assert_eq!(stats.processed, 1);
    assert!(mailbox.state().closed);
}

#[tokio::test]
async fn cancel_before_watch_finishes_backlog_then_stops() {
    let mailbox = ScriptedMailbox::with_messages(&[
        (1, raw_email("Fatura", "Por favor pague a fatura.")),
        (2, raw_email("oi", "")),
    ]);
    mailbox.push_events(&[WatchEvent::Changed]);
    let repo = Arc::new(FlakyRepository::new(0).await);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let ingestion = IngestionLoop::new(mailbox.clone(), repo.clone(), analyzer(), 1);
    let stats = tokio::time::timeout(HANG_GUARD, ingestion.run(cancel))
        .await
        .expect("ingestion loop hung")
        .unwrap();

    assert_eq!(stats.processed, 2);
    assert_eq!(stats.cycles, 1);
    let state = mailbox.state();
    assert_eq!(state.waits, 0);
    assert_eq!(state.events.len(), 1);
    assert!(state.closed);
}
