use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use inbox_triage::config::{MailboxConfig, StoreConfig, TriageConfig};
use inbox_triage::ingest::{IngestionLoop, spawn_ingestion_loop};
use inbox_triage::mailbox::ImapMailbox;
use inbox_triage::store::{EmailRepository, LibSqlBackend};
use inbox_triage::triage::{RuleAnalyzer, TextAnalyzer};

/// Initialize tracing. Logs go to a daily-rolling file when `TRIAGE_LOG_DIR`
/// is set, otherwise to stderr. The returned guard must outlive `main`.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match std::env::var("TRIAGE_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "inbox-triage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let _log_guard = init_tracing();

    let mailbox_config = MailboxConfig::from_env().context("invalid mailbox configuration")?;
    let triage_config = TriageConfig::from_env().context("invalid triage configuration")?;
    let store_config = StoreConfig::from_env();

    eprintln!("📬 Inbox Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Mailbox: {}:{} ({})",
        mailbox_config.host, mailbox_config.port, mailbox_config.folder
    );
    eprintln!("   Database: {}", store_config.db_path.display());
    eprintln!("   Language: {}", triage_config.language.code());

    // ── Database ─────────────────────────────────────────────────────────
    let repository: Arc<dyn EmailRepository> = Arc::new(
        LibSqlBackend::new_local(&store_config.db_path)
            .await
            .with_context(|| {
                format!(
                    "failed to open database at {}",
                    store_config.db_path.display()
                )
            })?,
    );

    // ── Analysis ─────────────────────────────────────────────────────────
    let analyzer: Arc<dyn TextAnalyzer> = Arc::new(RuleAnalyzer::new(
        triage_config.language,
        triage_config.max_input_chars,
    ));

    // ── Ingestion loop ───────────────────────────────────────────────────
    let fetch_batch_size = mailbox_config.fetch_batch_size;
    let mailbox = ImapMailbox::new(mailbox_config);
    let ingestion = IngestionLoop::new(mailbox, repository, analyzer, fetch_batch_size);

    let cancel = CancellationToken::new();
    let handle = spawn_ingestion_loop(ingestion, cancel.clone());

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, stopping ingestion");
            shutdown.cancel();
        }
    });

    match handle.await.context("ingestion task panicked")? {
        Ok(stats) => {
            info!(
                processed = stats.processed,
                skipped = stats.skipped,
                save_failures = stats.save_failures,
                mark_seen_failures = stats.mark_seen_failures,
                "Shut down cleanly"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Ingestion loop failed");
            Err(e).context("ingestion loop failed")
        }
    }
}
