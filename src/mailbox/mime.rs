//! MIME extraction: raw RFC 822 bytes to a plain-text `RawMessage`.

use chrono::{DateTime, Utc};
use mail_parser::{Address, MessageParser, MimeHeaders, PartType};

use crate::error::PipelineError;
use crate::mailbox::FetchedMessage;
use crate::triage::types::RawMessage;

/// Parse a fetched message. A message without a `text/plain` part gets an
/// empty body; only unparseable bytes are an error.
pub fn parse_message(fetched: &FetchedMessage) -> Result<RawMessage, PipelineError> {
    let parsed = MessageParser::default()
        .parse(&fetched.raw)
        .ok_or(PipelineError::Parse { uid: fetched.uid })?;

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    Ok(RawMessage {
        uid: fetched.uid,
        external_id: fetched.external_id.clone(),
        message_id: parsed.message_id().map(str::to_string),
        subject: parsed.subject().unwrap_or_default().to_string(),
        from: first_address(parsed.from()),
        to: first_address(parsed.to()),
        body: first_plain_text(&parsed),
        received_at,
    })
}

fn first_address(addr: Option<&Address<'_>>) -> String {
    addr.and_then(|a| a.first())
        .and_then(|a| a.address())
        .map(str::to_string)
        .unwrap_or_default()
}

/// First part that is `text/plain` (or untyped text), in MIME order.
fn first_plain_text(parsed: &mail_parser::Message<'_>) -> String {
    parsed
        .parts
        .iter()
        .find_map(|part| {
            let PartType::Text(text) = &part.body else {
                return None;
            };
            let is_plain = match MimeHeaders::content_type(part) {
                None => true,
                Some(ct) => {
                    ct.ctype().eq_ignore_ascii_case("text")
                        && ct.subtype().is_none_or(|s| s.eq_ignore_ascii_case("plain"))
                }
            };
            is_plain.then(|| text.to_string())
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn fetched(raw: &str) -> FetchedMessage {
        FetchedMessage {
            uid: 42,
            external_id: "INBOX:7:42".into(),
            raw: raw.as_bytes().to_vec(),
        }
    }

    #[test]
    fn plain_message_headers_and_body() {
        let raw = "From: Alice <alice@example.com>\r\n\
                   To: Triage <triage@example.com>\r\n\
                   Subject: Fatura de março\r\n\
                   Message-ID: <abc123@example.com>\r\n\
                   Date: Tue, 10 Mar 2026 14:30:00 +0000\r\n\
                   \r\n\
                   Por favor pague a fatura.\r\n";
        let msg = parse_message(&fetched(raw)).unwrap();

        assert_eq!(msg.uid, 42);
        assert_eq!(msg.external_id, "INBOX:7:42");
        assert_eq!(msg.from, "alice@example.com");
        assert_eq!(msg.to, "triage@example.com");
        assert_eq!(msg.subject, "Fatura de março");
        assert_eq!(msg.message_id.as_deref(), Some("abc123@example.com"));
        assert_eq!(msg.body.trim(), "Por favor pague a fatura.");
        assert_eq!(
            msg.received_at,
            Utc.with_ymd_and_hms(2026, 3, 10, 14, 30, 0).unwrap()
        );
    }

    #[test]
    fn prefers_plain_part_over_html() {
        let raw = "From: bob@example.com\r\n\
                   Subject: Reunião\r\n\
                   MIME-Version: 1.0\r\n\
                   Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
                   \r\n\
                   --b1\r\n\
                   Content-Type: text/html; charset=utf-8\r\n\
                   \r\n\
                   <p>Olá</p>\r\n\
                   --b1\r\n\
                   Content-Type: text/plain; charset=utf-8\r\n\
                   \r\n\
                   Preciso da pauta.\r\n\
                   --b1--\r\n";
        let msg = parse_message(&fetched(raw)).unwrap();
        assert_eq!(msg.body.trim(), "Preciso da pauta.");
    }

    #[test]
    fn html_only_message_has_empty_body() {
        let raw = "From: bob@example.com\r\n\
                   Subject: Newsletter\r\n\
                   MIME-Version: 1.0\r\n\
                   Content-Type: text/html; charset=utf-8\r\n\
                   \r\n\
                   <p>Only html</p>\r\n";
        let msg = parse_message(&fetched(raw)).unwrap();
        assert_eq!(msg.subject, "Newsletter");
        assert!(msg.body.is_empty());
    }

    #[test]
    fn missing_headers_default_to_empty() {
        let raw = "X-Custom: 1\r\n\r\nhello\r\n";
        let msg = parse_message(&fetched(raw)).unwrap();
        assert!(msg.subject.is_empty());
        assert!(msg.from.is_empty());
        assert!(msg.to.is_empty());
        assert!(msg.message_id.is_none());
    }

    #[test]
    fn empty_bytes_are_a_parse_error() {
        let err = parse_message(&fetched("")).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { uid: 42 }));
    }
}
