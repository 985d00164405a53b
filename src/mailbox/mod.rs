//! Mailbox transport: the ingestion loop's only view of the mail server.
//!
//! `Mailbox` is the contract; `ImapMailbox` the production implementation.
//! `mime` turns fetched RFC 822 bytes into a `RawMessage`.

pub mod imap;
pub mod mime;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::MailboxError;

pub use imap::ImapMailbox;
pub use mime::parse_message;

/// A message as returned by the transport, before MIME extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub uid: u32,
    /// Stable transport identifier, used to de-duplicate persistence.
    pub external_id: String,
    /// Raw RFC 822 bytes.
    pub raw: Vec<u8>,
}

/// Outcome of waiting on the selected folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// The server reported a change (new mail, flag change, expunge).
    Changed,
    /// The bounded wait expired. Treated like a change.
    TimedOut,
    /// The cancellation token fired.
    Cancelled,
}

/// Mail transport used by the ingestion loop.
///
/// A session is owned by exactly one loop; methods take `&mut self`.
#[async_trait]
pub trait Mailbox: Send {
    /// Establish the session and authenticate.
    async fn connect(&mut self) -> Result<(), MailboxError>;

    /// Select the configured folder.
    async fn select_folder(&mut self) -> Result<(), MailboxError>;

    /// UIDs of messages without the `\Seen` flag, ascending.
    async fn search_unseen(&mut self) -> Result<Vec<u32>, MailboxError>;

    /// Fetch one message without marking it seen.
    async fn fetch(&mut self, uid: u32) -> Result<FetchedMessage, MailboxError>;

    /// Set the `\Seen` flag.
    async fn mark_seen(&mut self, uid: u32) -> Result<(), MailboxError>;

    /// Block until the folder changes, the wait times out, or `cancel` fires.
    async fn wait_for_change(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<WatchEvent, MailboxError>;

    /// Log out and drop the session.
    async fn close(&mut self) -> Result<(), MailboxError>;
}
