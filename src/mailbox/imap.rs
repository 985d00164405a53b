//! IMAP4rev1 mailbox over raw TCP, optionally wrapped in rustls.
//!
//! The protocol session is blocking and is driven on `spawn_blocking`;
//! `ImapMailbox` moves it into the blocking task and back for every call.
//! Messages are fetched with `BODY.PEEK[]` so the server never sets `\Seen`
//! on its own; only `mark_seen` does.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MailboxConfig;
use crate::error::MailboxError;
use crate::mailbox::{FetchedMessage, Mailbox, WatchEvent};

/// Socket read timeout while idling, so cancellation is seen promptly.
const IDLE_TICK: Duration = Duration::from_millis(250);

/// Upper bound on a single server literal.
pub const MAX_LITERAL_LEN: usize = 50 * 1024 * 1024;

// ── Stream ──────────────────────────────────────────────────────────

/// Byte stream an IMAP session runs over.
pub trait ImapStream: Read + Write + Send {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl ImapStream for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

impl ImapStream for rustls::StreamOwned<rustls::ClientConnection, TcpStream> {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.sock.set_read_timeout(timeout)
    }
}

// ── Responses ───────────────────────────────────────────────────────

/// One server response. Literal payloads are kept out of `text` byte-exact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

// ── Session ─────────────────────────────────────────────────────────

/// A blocking IMAP session.
pub struct ImapSession {
    stream: Box<dyn ImapStream>,
    /// Bytes read from the stream but not yet consumed.
    pending: Vec<u8>,
    tag_counter: u32,
    io_timeout: Duration,
    capabilities: Vec<String>,
    /// A size change (EXISTS, RECENT, EXPUNGE) arrived inside a command response.
    pending_change: bool,
}

impl ImapSession {
    /// Wrap an established stream. The greeting has not been read yet.
    pub fn new(stream: Box<dyn ImapStream>, io_timeout: Duration) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            tag_counter: 0,
            io_timeout,
            capabilities: Vec::new(),
            pending_change: false,
        }
    }

    /// Open TCP (+TLS) to the configured server and read the greeting.
    pub fn open(config: &MailboxConfig) -> Result<Self, MailboxError> {
        let connect_err = |reason: String| MailboxError::Connect {
            host: config.host.clone(),
            port: config.port,
            reason,
        };

        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .map_err(|e| connect_err(e.to_string()))?;
        tcp.set_read_timeout(Some(config.io_timeout))
            .and_then(|()| tcp.set_write_timeout(Some(config.io_timeout)))
            .map_err(|e| connect_err(e.to_string()))?;

        let stream: Box<dyn ImapStream> = if config.tls {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(
                rustls::crypto::ring::default_provider(),
            ))
            .with_safe_default_protocol_versions()
            .map_err(|e| connect_err(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();
            let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
                .map_err(|e| connect_err(e.to_string()))?;
            let conn = rustls::ClientConnection::new(Arc::new(tls_config), server_name)
                .map_err(|e| connect_err(e.to_string()))?;
            Box::new(rustls::StreamOwned::new(conn, tcp))
        } else {
            Box::new(tcp)
        };

        let mut session = Self::new(stream, config.io_timeout);
        let greeting = session
            .read_response()
            .map_err(|e| connect_err(format!("no greeting: {e}")))?;
        if !(greeting.text.starts_with("* OK") || greeting.text.starts_with("* PREAUTH")) {
            return Err(connect_err(format!("unexpected greeting: {}", greeting.text)));
        }
        debug!(host = %config.host, "IMAP greeting received");
        Ok(session)
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    /// Whether the folder changed since the last wait, clearing the flag.
    pub fn take_pending_change(&mut self) -> bool {
        std::mem::take(&mut self.pending_change)
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{}", self.tag_counter)
    }

    /// Read one CRLF-terminated line. Partial data survives read timeouts.
    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        loop {
            if let Some(pos) = self.pending.windows(2).position(|w| w == b"\r\n") {
                let line: Vec<u8> = self.pending.drain(..pos + 2).collect();
                return Ok(line[..pos].to_vec());
            }
            self.fill()?;
        }
    }

    fn read_exact_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        while self.pending.len() < len {
            self.fill()?;
        }
        Ok(self.pending.drain(..len).collect())
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "IMAP connection closed",
            ));
        }
        self.pending.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    /// Read one response, following `{n}` literals.
    fn read_response(&mut self) -> Result<Response, MailboxError> {
        let mut response = Response::default();
        loop {
            let line = String::from_utf8_lossy(&self.read_line()?).into_owned();
            let literal = literal_len(&line);
            response.text.push_str(&line);
            match literal {
                Some(len) if len > MAX_LITERAL_LEN => {
                    return Err(MailboxError::Protocol(format!(
                        "literal of {len} bytes exceeds {MAX_LITERAL_LEN}"
                    )));
                }
                Some(len) => {
                    let bytes = self.read_exact_bytes(len)?;
                    response.literals.push(bytes);
                }
                None => return Ok(response),
            }
        }
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()
    }

    /// Send a tagged command and collect untagged responses until completion.
    pub fn command(&mut self, cmd: &str) -> Result<Vec<Response>, MailboxError> {
        let tag = self.next_tag();
        self.write_line(&format!("{tag} {cmd}"))?;

        let mut untagged = Vec::new();
        loop {
            let response = self.read_response()?;
            if let Some(rest) = response.text.strip_prefix(&format!("{tag} ")) {
                return match rest.split_once(' ').map_or((rest, ""), |p| p) {
                    (status, _) if status.eq_ignore_ascii_case("OK") => Ok(untagged),
                    (_, reason) => Err(MailboxError::Command {
                        command: command_name(cmd),
                        reason: if reason.is_empty() { rest.to_string() } else { reason.to_string() },
                    }),
                };
            }
            if is_size_change(&response.text) {
                debug!(notification = %response.text, "Folder changed during command");
                self.pending_change = true;
            }
            untagged.push(response);
        }
    }

    pub fn login(&mut self, username: &str, password: &SecretString) -> Result<(), MailboxError> {
        let cmd = format!(
            "LOGIN {} {}",
            quote(username),
            quote(password.expose_secret())
        );
        self.command(&cmd).map_err(|e| MailboxError::Login {
            username: username.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    pub fn refresh_capabilities(&mut self) -> Result<(), MailboxError> {
        let responses = self.command("CAPABILITY")?;
        self.capabilities = responses
            .iter()
            .flat_map(|r| parse_capabilities(&r.text))
            .collect();
        Ok(())
    }

    /// Select `folder`, returning its UIDVALIDITY.
    pub fn select(&mut self, folder: &str) -> Result<u32, MailboxError> {
        let responses = self
            .command(&format!("SELECT {}", quote(folder)))
            .map_err(|e| MailboxError::SelectFolder {
                folder: folder.to_string(),
                reason: e.to_string(),
            })?;
        // The drain that follows a select covers whatever the select reported.
        self.pending_change = false;
        let uid_validity = responses
            .iter()
            .find_map(|r| parse_uid_validity(&r.text))
            .unwrap_or_else(|| {
                warn!(folder, "Server did not report UIDVALIDITY");
                0
            });
        Ok(uid_validity)
    }

    pub fn uid_search_unseen(&mut self) -> Result<Vec<u32>, MailboxError> {
        let responses = self.command("UID SEARCH UNSEEN")?;
        let mut uids: Vec<u32> = responses.iter().flat_map(|r| parse_search(&r.text)).collect();
        uids.sort_unstable();
        uids.dedup();
        Ok(uids)
    }

    /// Fetch the full message without touching its flags.
    pub fn uid_fetch(&mut self, uid: u32) -> Result<Vec<u8>, MailboxError> {
        let responses = self.command(&format!("UID FETCH {uid} (BODY.PEEK[])"))?;
        let uid_marker = format!("UID {uid}");

        let with_body = |r: &&Response| r.text.contains(" FETCH ") && !r.literals.is_empty();
        responses
            .iter()
            .filter(with_body)
            .find(|r| r.text.contains(&uid_marker))
            .or_else(|| responses.iter().find(with_body))
            .and_then(|r| r.literals.first().cloned())
            .ok_or_else(|| MailboxError::Protocol(format!("no body returned for UID {uid}")))
    }

    pub fn uid_store_seen(&mut self, uid: u32) -> Result<(), MailboxError> {
        self.command(&format!("UID STORE {uid} +FLAGS.SILENT (\\Seen)"))?;
        Ok(())
    }

    /// Enter IDLE until a change, `timeout`, or cancellation, then send DONE.
    pub fn idle(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WatchEvent, MailboxError> {
        if self.take_pending_change() {
            debug!("Change seen before IDLE");
            return Ok(WatchEvent::Changed);
        }

        let tag = self.next_tag();
        self.write_line(&format!("{tag} IDLE"))?;

        loop {
            let response = self.read_response()?;
            if response.text.starts_with('+') {
                break;
            }
            if response.text.starts_with(&format!("{tag} ")) {
                return Err(MailboxError::Command {
                    command: "IDLE".into(),
                    reason: response.text,
                });
            }
            if is_change_notification(&response.text) {
                self.pending_change = true;
            }
        }

        let event = if self.take_pending_change() {
            WatchEvent::Changed
        } else {
            self.stream.set_read_timeout(Some(IDLE_TICK))?;
            let deadline = Instant::now() + timeout;
            let outcome = self.idle_until(deadline, cancel);
            self.stream.set_read_timeout(Some(self.io_timeout))?;
            outcome?
        };

        self.write_line("DONE")?;
        loop {
            let response = self.read_response()?;
            if response.text.starts_with(&format!("{tag} ")) {
                break;
            }
            if event != WatchEvent::Changed && is_size_change(&response.text) {
                self.pending_change = true;
            }
        }
        Ok(event)
    }

    fn idle_until(
        &mut self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<WatchEvent, MailboxError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(WatchEvent::Cancelled);
            }
            if Instant::now() >= deadline {
                return Ok(WatchEvent::TimedOut);
            }
            match self.read_line() {
                Ok(line) => {
                    let line = String::from_utf8_lossy(&line);
                    if is_change_notification(&line) {
                        debug!(notification = %line, "IDLE change");
                        return Ok(WatchEvent::Changed);
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn logout(&mut self) -> Result<(), MailboxError> {
        self.command("LOGOUT")?;
        Ok(())
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// `Mailbox` backed by an IMAP server.
pub struct ImapMailbox {
    config: MailboxConfig,
    session: Option<ImapSession>,
    uid_validity: u32,
}

impl ImapMailbox {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            config,
            session: None,
            uid_validity: 0,
        }
    }

    /// Stable identifier for `uid` in the selected folder.
    pub fn external_id(&self, uid: u32) -> String {
        format!("{}:{}:{}", self.config.folder, self.uid_validity, uid)
    }

    /// Run `f` against the session on the blocking pool.
    async fn with_session<T, F>(&mut self, f: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<T, MailboxError> + Send + 'static,
    {
        let mut session = self.session.take().ok_or(MailboxError::NotConnected)?;
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut session);
            (session, result)
        })
        .await
        .map_err(|e| MailboxError::Protocol(format!("IMAP task failed: {e}")))?;
        self.session = Some(session);
        result
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn connect(&mut self) -> Result<(), MailboxError> {
        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || {
            let mut session = ImapSession::open(&config)?;
            session.login(&config.username, &config.password)?;
            session.refresh_capabilities()?;
            Ok::<_, MailboxError>(session)
        })
        .await
        .map_err(|e| MailboxError::Connect {
            host: self.config.host.clone(),
            port: self.config.port,
            reason: format!("connect task failed: {e}"),
        })??;

        info!(
            host = %self.config.host,
            port = self.config.port,
            idle = session.has_capability("IDLE"),
            "IMAP session established"
        );
        self.session = Some(session);
        Ok(())
    }

    async fn select_folder(&mut self) -> Result<(), MailboxError> {
        let folder = self.config.folder.clone();
        self.uid_validity = self.with_session(move |s| s.select(&folder)).await?;
        info!(folder = %self.config.folder, uid_validity = self.uid_validity, "Folder selected");
        Ok(())
    }

    async fn search_unseen(&mut self) -> Result<Vec<u32>, MailboxError> {
        self.with_session(|s| s.uid_search_unseen()).await
    }

    async fn fetch(&mut self, uid: u32) -> Result<FetchedMessage, MailboxError> {
        let raw = self.with_session(move |s| s.uid_fetch(uid)).await?;
        Ok(FetchedMessage {
            uid,
            external_id: self.external_id(uid),
            raw,
        })
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), MailboxError> {
        self.with_session(move |s| s.uid_store_seen(uid)).await
    }

    async fn wait_for_change(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<WatchEvent, MailboxError> {
        if cancel.is_cancelled() {
            return Ok(WatchEvent::Cancelled);
        }

        let session = self.session.as_mut().ok_or(MailboxError::NotConnected)?;
        if session.take_pending_change() {
            return Ok(WatchEvent::Changed);
        }
        let supports_idle = session.has_capability("IDLE");

        if supports_idle {
            let timeout = self.config.idle_timeout;
            let cancel = cancel.clone();
            return self.with_session(move |s| s.idle(timeout, &cancel)).await;
        }

        tokio::select! {
            () = cancel.cancelled() => Ok(WatchEvent::Cancelled),
            () = tokio::time::sleep(self.config.poll_interval) => Ok(WatchEvent::TimedOut),
        }
    }

    async fn close(&mut self) -> Result<(), MailboxError> {
        if self.session.is_none() {
            return Ok(());
        }
        let result = self.with_session(|s| s.logout()).await;
        self.session = None;
        result
    }
}

// ── Parsing helpers (public for testing) ────────────────────────────

/// Length of a trailing `{n}` / `{n+}` literal marker.
pub fn literal_len(line: &str) -> Option<usize> {
    let body = line.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].trim_end_matches('+').parse().ok()
}

/// UIDs from a `* SEARCH ...` response.
pub fn parse_search(text: &str) -> Vec<u32> {
    text.strip_prefix("* SEARCH")
        .map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()).collect())
        .unwrap_or_default()
}

/// `UIDVALIDITY` from a `* OK [UIDVALIDITY n]` response.
pub fn parse_uid_validity(text: &str) -> Option<u32> {
    let start = text.find("[UIDVALIDITY ")? + "[UIDVALIDITY ".len();
    let rest = &text[start..];
    let end = rest.find(']')?;
    rest[..end].trim().parse().ok()
}

/// Capability names from a `* CAPABILITY ...` response.
pub fn parse_capabilities(text: &str) -> Vec<String> {
    text.strip_prefix("* CAPABILITY")
        .map(|rest| rest.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Untagged responses that mean the folder changed while idling.
pub fn is_change_notification(line: &str) -> bool {
    numbered_response_is(line, &["EXISTS", "RECENT", "EXPUNGE", "FETCH"])
}

/// Unsolicited size changes. Unlike `FETCH`, these never answer our own
/// commands, so they are meaningful inside any response.
pub fn is_size_change(line: &str) -> bool {
    numbered_response_is(line, &["EXISTS", "RECENT", "EXPUNGE"])
}

fn numbered_response_is(line: &str, kinds: &[&str]) -> bool {
    let Some(rest) = line.strip_prefix("* ") else {
        return false;
    };
    let mut words = rest.split_whitespace();
    match (words.next(), words.next()) {
        (Some(n), Some(kind)) if n.parse::<u32>().is_ok() => {
            kinds.iter().any(|k| kind.eq_ignore_ascii_case(k))
        }
        _ => false,
    }
}

/// IMAP quoted string.
pub fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Command name used in errors. Never includes arguments (LOGIN carries a password).
fn command_name(cmd: &str) -> String {
    let mut words = cmd.split_whitespace();
    match (words.next(), words.next()) {
        (Some(uid), Some(verb)) if uid.eq_ignore_ascii_case("UID") => format!("UID {verb}"),
        (Some(verb), _) => verb.to_string(),
        _ => String::new(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
