use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::approver::{Approver, Outcome};
use crate::platform::{ts_key, IncomingMessage, MessageSource};
use crate::scheduler::Scheduler;
use crate::slack::{Conversation, HistoryMessage};

/// The read side of the Slack Web API the poller needs
#[async_trait]
pub trait DirectMessageApi: Send + Sync {
    async fn list_direct_conversations(&self) -> Result<Vec<Conversation>>;

    async fn latest_message(&self, conversation_id: &str) -> Result<Option<HistoryMessage>>;
}

/// Timestamp of the last processed message, per conversation.
/// Lives as long as the process; nothing is written to disk.
#[derive(Default)]
pub struct LastSeen {
    markers: Mutex<HashMap<String, ((i64, u32), String)>>,
}

impl LastSeen {
    /// Claim `ts` for the conversation. Only a timestamp strictly newer than
    /// the recorded one is claimed, and the marker never moves backwards.
    /// Check and update happen under one lock, so overlapping passes cannot
    /// both claim the same message.
    pub async fn observe(&self, conversation_id: &str, ts: &str) -> bool {
        let Some(key) = ts_key(ts) else {
            warn!("Ignoring message with unreadable ts {:?} in {}", ts, conversation_id);
            return false;
        };

        let mut markers = self.markers.lock().await;
        if let Some((seen, _)) = markers.get(conversation_id) {
            if key <= *seen {
                return false;
            }
        }
        markers.insert(conversation_id.to_string(), (key, ts.to_string()));
        true
    }

    #[cfg(test)]
    pub async fn get(&self, conversation_id: &str) -> Option<String> {
        self.markers
            .lock()
            .await
            .get(conversation_id)
            .map(|(_, ts)| ts.clone())
    }
}

/// Polls every DM conversation on a fixed interval and looks only at the
/// newest message of each. Anything posted between two polls except the
/// last message is never seen.
pub struct Poller {
    api: Arc<dyn DirectMessageApi>,
    last_seen: LastSeen,
    interval: Duration,
}

impl Poller {
    pub fn new(api: Arc<dyn DirectMessageApi>, interval: Duration) -> Self {
        Self {
            api,
            last_seen: LastSeen::default(),
            interval,
        }
    }

    #[cfg(test)]
    pub fn last_seen(&self) -> &LastSeen {
        &self.last_seen
    }

    /// One pass over all DM conversations, serially. Returns the number of
    /// new messages handed to the approver.
    ///
    /// The first failing call ends the pass; conversations after it wait for
    /// the next one.
    pub async fn poll_once(&self, approver: &Approver) -> Result<usize> {
        let conversations = self
            .api
            .list_direct_conversations()
            .await
            .context("Failed to list direct message conversations")?;

        let mut processed = 0;
        for conversation in conversations {
            let latest = self
                .api
                .latest_message(&conversation.id)
                .await
                .with_context(|| format!("Failed to fetch history of {}", conversation.id))?;

            let Some(latest) = latest else {
                continue;
            };

            if !self.last_seen.observe(&conversation.id, &latest.ts).await {
                continue;
            }

            let Some(user_id) = latest.user.or(conversation.user) else {
                debug!("Message {} in {} has no author", latest.ts, conversation.id);
                continue;
            };

            let msg = IncomingMessage {
                conversation_id: conversation.id,
                user_id,
                text: latest.text.unwrap_or_default(),
                ts: latest.ts,
                thread_ts: None,
            };

            processed += 1;
            if let Outcome::Approved(request) = approver.process_message(&msg).await? {
                debug!("Poll pass approved {}", request);
            }
        }

        Ok(processed)
    }
}

#[async_trait]
impl MessageSource for Poller {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn run(self: Arc<Self>, approver: Arc<Approver>) -> Result<()> {
        let mut scheduler = Scheduler::new().await?;

        let poller = Arc::clone(&self);
        scheduler
            .add_repeated_job(self.interval, "slack-poll", move || {
                let poller = Arc::clone(&poller);
                let approver = Arc::clone(&approver);
                Box::pin(async move {
                    match poller.poll_once(&approver).await {
                        Ok(0) => {}
                        Ok(n) => debug!("Poll pass handled {} new message(s)", n),
                        Err(e) => error!("Slack poll pass failed: {:#}", e),
                    }
                })
            })
            .await?;

        scheduler.start().await?;
        println!(
            "Listening to your DMs every {}s...",
            self.interval.as_secs()
        );

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutting down poller");
        scheduler.shutdown().await
    }
}
