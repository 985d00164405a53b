//! Ingestion loop: watches the mailbox and runs each unseen message through
//! parse → normalize → classify → save → mark seen.
//!
//! The loop is an explicit state machine:
//!
//! ```text
//! Connecting → SelectingFolder → DrainingBacklog → Watching ─┐
//!                                      ▲                     │ change / timeout
//!                                      └─────────────────────┘
//!                                  Watching ── cancel ──► Stopped
//! ```
//!
//! Cancellation is only observed before and during `Watching`; a message
//! already in the pipeline always runs to completion.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, PipelineError};
use crate::mailbox::{FetchedMessage, Mailbox, WatchEvent, parse_message};
use crate::store::EmailRepository;
use crate::triage::{ClassificationEngine, ClassifiedEmail, TextAnalyzer};

/// States of the ingestion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Connecting,
    SelectingFolder,
    DrainingBacklog,
    Watching,
    Stopped,
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Saved successfully.
    pub processed: u64,
    /// Dropped before the save step (fetch, parse or normalize failure).
    pub skipped: u64,
    /// Save failed; the message stays unseen.
    pub save_failures: u64,
    /// Saved, but the `\Seen` flag could not be set.
    pub mark_seen_failures: u64,
    /// Completed backlog drains.
    pub cycles: u64,
}

/// Outcome of one message through the pipeline.
enum Outcome {
    Saved { id: String },
    Skipped(PipelineError),
    SaveFailed(PipelineError),
}

/// The long-running mailbox watcher.
pub struct IngestionLoop<M: Mailbox> {
    mailbox: M,
    repository: Arc<dyn EmailRepository>,
    analyzer: Arc<dyn TextAnalyzer>,
    engine: ClassificationEngine,
    fetch_batch_size: usize,
    stats: IngestStats,
}

impl<M: Mailbox> IngestionLoop<M> {
    pub fn new(
        mailbox: M,
        repository: Arc<dyn EmailRepository>,
        analyzer: Arc<dyn TextAnalyzer>,
        fetch_batch_size: usize,
    ) -> Self {
        Self {
            mailbox,
            repository,
            analyzer,
            engine: ClassificationEngine::new(),
            fetch_batch_size: fetch_batch_size.max(1),
            stats: IngestStats::default(),
        }
    }

    /// Run until cancelled or a fatal transport error occurs.
    ///
    /// Connect and folder-selection failures are returned as errors; the
    /// loop does not reconnect on its own.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<IngestStats, Error> {
        let mut state = LoopState::Connecting;

        loop {
            debug!(?state, "Ingestion loop state");
            state = match state {
                LoopState::Connecting => {
                    self.mailbox.connect().await.inspect_err(|e| {
                        error!(error = %e, "Mailbox connection failed");
                    })?;
                    info!("Mailbox connected");
                    LoopState::SelectingFolder
                }
                LoopState::SelectingFolder => {
                    if let Err(e) = self.mailbox.select_folder().await {
                        error!(error = %e, "Folder selection failed");
                        self.close_mailbox().await;
                        return Err(e.into());
                    }
                    LoopState::DrainingBacklog
                }
                LoopState::DrainingBacklog => {
                    self.drain_backlog().await;
                    self.stats.cycles += 1;
                    LoopState::Watching
                }
                LoopState::Watching => self.watch(&cancel).await?,
                LoopState::Stopped => {
                    self.close_mailbox().await;
                    info!(
                        processed = self.stats.processed,
                        skipped = self.stats.skipped,
                        save_failures = self.stats.save_failures,
                        cycles = self.stats.cycles,
                        "Ingestion loop stopped"
                    );
                    return Ok(self.stats);
                }
            };
        }
    }

    async fn watch(&mut self, cancel: &CancellationToken) -> Result<LoopState, Error> {
        if cancel.is_cancelled() {
            return Ok(LoopState::Stopped);
        }

        match self.mailbox.wait_for_change(cancel).await {
            Ok(WatchEvent::Changed) => {
                debug!("Mailbox changed");
                Ok(LoopState::DrainingBacklog)
            }
            Ok(WatchEvent::TimedOut) => {
                debug!("Watch timed out, re-checking backlog");
                Ok(LoopState::DrainingBacklog)
            }
            Ok(WatchEvent::Cancelled) => Ok(LoopState::Stopped),
            Err(e) => {
                error!(error = %e, "Mailbox watch failed");
                self.close_mailbox().await;
                Err(e.into())
            }
        }
    }

    /// Process every unseen message, one at a time, in UID order.
    async fn drain_backlog(&mut self) {
        let uids = match self.mailbox.search_unseen().await {
            Ok(uids) => uids,
            Err(e) => {
                warn!(error = %e, "Unseen search failed, waiting for next change");
                return;
            }
        };

        if uids.is_empty() {
            debug!("No unseen messages");
            return;
        }
        info!(count = uids.len(), "Draining unseen messages");

        for window in uids.chunks(self.fetch_batch_size) {
            let mut fetched = Vec::with_capacity(window.len());
            for &uid in window {
                match self.mailbox.fetch(uid).await {
                    Ok(message) => fetched.push(message),
                    Err(e) => {
                        let err = PipelineError::Fetch(e);
                        warn!(uid, error = %err, "Skipping message");
                        self.stats.skipped += 1;
                    }
                }
            }

            for message in &fetched {
                self.handle_message(message).await;
            }
        }
    }

    async fn handle_message(&mut self, fetched: &FetchedMessage) {
        let uid = fetched.uid;
        match self.process_message(fetched).await {
            Outcome::Saved { id } => {
                self.stats.processed += 1;
                info!(uid, id = %id, external_id = %fetched.external_id, "Email triaged");
                if let Err(e) = self.mailbox.mark_seen(uid).await {
                    self.stats.mark_seen_failures += 1;
                    warn!(uid, error = %e, "Failed to mark message seen");
                }
            }
            Outcome::Skipped(e) => {
                self.stats.skipped += 1;
                warn!(uid, error = %e, "Skipping message");
            }
            Outcome::SaveFailed(e) => {
                self.stats.save_failures += 1;
                error!(uid, error = %e, "Failed to save email, leaving it unseen");
            }
        }
    }

    async fn process_message(&mut self, fetched: &FetchedMessage) -> Outcome {
        let message = match parse_message(fetched) {
            Ok(message) => message,
            Err(e) => return Outcome::Skipped(e),
        };
        let doc = match self.analyzer.normalize(&message.analysis_text()) {
            Ok(doc) => doc,
            Err(e) => return Outcome::Skipped(e.into()),
        };

        let result = self.engine.classify(&message, &doc);
        debug!(
            uid = message.uid,
            priority = %result.priority,
            category = %result.category,
            tasks = result.tasks.len(),
            "Message classified"
        );

        let email = ClassifiedEmail::merge(message, result, Utc::now());
        match self.repository.save(&email).await {
            Ok(id) => Outcome::Saved { id },
            Err(e) => Outcome::SaveFailed(e.into()),
        }
    }

    async fn close_mailbox(&mut self) {
        if let Err(e) = self.mailbox.close().await {
            warn!(error = %e, "Failed to close mailbox session");
        }
    }
}

/// Spawn the ingestion loop as a background task.
///
/// Cancel `cancel` to stop it; the handle resolves to the final stats.
pub fn spawn_ingestion_loop<M>(
    ingestion: IngestionLoop<M>,
    cancel: CancellationToken,
) -> JoinHandle<Result<IngestStats, Error>>
where
    M: Mailbox + 'static,
{
    tokio::spawn(async move {
        info!("Ingestion loop started");
        ingestion.run(cancel).await
    })
}
