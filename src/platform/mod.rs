pub mod poller;
pub mod socket_mode;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::approver::Approver;

/// A direct message received from Slack, by either source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Conversation (channel) ID the message was posted in
    pub conversation_id: String,
    /// Slack user ID of the author
    pub user_id: String,
    /// The message text
    pub text: String,
    /// Slack message timestamp ("1712345678.000200")
    pub ts: String,
    /// Thread to reply into, if replies should be threaded
    pub thread_ts: Option<String>,
}

/// Split a Slack `ts` ("1712345678.000200") into (seconds, microseconds).
/// The tuple orders the same way the messages were posted.
pub fn ts_key(ts: &str) -> Option<(i64, u32)> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs.parse().ok()?;
    if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let micros: u32 = format!("{:0<6}", frac).get(..6)?.parse().ok()?;
    Some((secs, micros))
}

impl IncomingMessage {
    /// Wall-clock time encoded in the Slack `ts`, if it parses.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        let (secs, micros) = ts_key(&self.ts)?;
        DateTime::from_timestamp(secs, micros * 1_000)
    }
}

/// Where messages come from. Each variant feeds every message it sees into
/// the same [`Approver`] until the process is stopped.
#[async_trait]
pub trait MessageSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(self: Arc<Self>, approver: Arc<Approver>) -> Result<()>;
}
