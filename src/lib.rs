//! Inbox Triage: watches a mailbox and classifies every new message.

pub mod config;
pub mod error;
pub mod ingest;
pub mod mailbox;
pub mod store;
pub mod triage;
