//! Slack Socket Mode: a long-lived websocket that pushes events to us.
//!
//! Every envelope carrying an `envelope_id` is acknowledged straight away.
//! Message events are handed to the approver on their own task, so a slow
//! GitHub call never holds up the socket. Nothing is de-duplicated here;
//! Slack's delivery is trusted as-is.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tracing::{debug, error, info, warn};

use crate::approver::Approver;
use crate::platform::{IncomingMessage, MessageSource};
use crate::slack::SlackClient;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub envelope_id: Option<String>,
    #[serde(default)]
    pub payload: Option<EventsApiPayload>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventsApiPayload {
    #[serde(default)]
    pub event: Option<MessageEvent>,
}

#[derive(Debug, Deserialize)]
pub struct MessageEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

impl Envelope {
    pub fn parse(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).context("Failed to parse Socket Mode envelope")
    }

    /// The direct message carried by an `events_api` envelope, if any.
    /// Plain posts, posts with attachments and thread broadcasts count;
    /// edits, deletions, joins, bot posts and non-DM channels are skipped.
    pub fn message(&self) -> Option<IncomingMessage> {
        if self.kind != "events_api" {
            return None;
        }
        let event = self.payload.as_ref()?.event.as_ref()?;
        if event.kind != "message" || event.bot_id.is_some() {
            return None;
        }
        if !matches!(
            event.subtype.as_deref(),
            None | Some("file_share") | Some("thread_broadcast")
        ) {
            return None;
        }
        if event.channel_type.as_deref().is_some_and(|t| t != "im") {
            return None;
        }

        let ts = event.ts.clone()?;
        Some(IncomingMessage {
            conversation_id: event.channel.clone()?,
            user_id: event.user.clone()?,
            text: event.text.clone().unwrap_or_default(),
            thread_ts: Some(event.thread_ts.clone().unwrap_or_else(|| ts.clone())),
            ts,
        })
    }
}

fn ack_frame(envelope_id: &str) -> String {
    serde_json::json!({ "envelope_id": envelope_id }).to_string()
}

/// Handler boundary: failures are logged and go no further.
async fn handle_event(approver: Arc<Approver>, msg: IncomingMessage) {
    if let Err(e) = approver.process_message(&msg).await {
        error!(
            conversation = %msg.conversation_id,
            ts = %msg.ts,
            "Failed to handle message: {:#}",
            e
        );
    }
}

/// Read envelopes until Slack closes the socket or asks us to reconnect.
async fn read_loop<S>(mut ws: S, approver: &Arc<Approver>) -> Result<()>
where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    while let Some(frame) = ws.next().await {
        let text = match frame.context("Socket Mode read failed")? {
            Message::Text(text) => text,
            Message::Close(close) => {
                info!("Socket Mode connection closed: {:?}", close);
                return Ok(());
            }
            _ => continue,
        };

        let envelope = match Envelope::parse(text.as_str()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("{:#}", e);
                continue;
            }
        };

        if let Some(id) = &envelope.envelope_id {
            ws.send(Message::text(ack_frame(id)))
                .await
                .context("Failed to acknowledge Socket Mode envelope")?;
        }

        match envelope.kind.as_str() {
            "hello" => info!("Socket Mode connection ready"),
            "disconnect" => {
                info!(
                    "Slack requested reconnect: {}",
                    envelope.reason.as_deref().unwrap_or("unknown")
                );
                return Ok(());
            }
            "events_api" => {
                if let Some(msg) = envelope.message() {
                    debug!("Message event in {} at {}", msg.conversation_id, msg.ts);
                    tokio::spawn(handle_event(Arc::clone(approver), msg));
                }
            }
            other => debug!("Ignoring Socket Mode envelope: {}", other),
        }
    }

    Ok(())
}

pub struct SocketModeSource {
    slack: Arc<SlackClient>,
    app_token: String,
    reconnect_delay: Duration,
}

impl SocketModeSource {
    pub fn new(slack: Arc<SlackClient>, app_token: String) -> Self {
        Self {
            slack,
            app_token,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    #[cfg(test)]
    fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    async fn connection_loop(&self, approver: Arc<Approver>) -> Result<()> {
        loop {
            let url = match self.slack.open_socket_connection(&self.app_token).await {
                Ok(url) => url,
                Err(e) => {
                    error!("Failed to open Socket Mode connection: {:#}", e);
                    tokio::time::sleep(self.reconnect_delay).await;
                    continue;
                }
            };

            let ws = match connect_async(url.as_str()).await {
                Ok((ws, _)) => ws,
                Err(e) => {
                    error!("Socket Mode connect error: {}", e);
                    tokio::time::sleep(self.reconnect_delay).await;
                    continue;
                }
            };

            info!("Socket Mode connected");
            if let Err(e) = read_loop(ws, &approver).await {
                warn!("Socket Mode connection lost: {:#}", e);
                tokio::time::sleep(self.reconnect_delay).await;
            }
        }
    }
}

#[async_trait]
impl MessageSource for SocketModeSource {
    fn name(&self) -> &'static str {
        "socket"
    }

    async fn run(self: Arc<Self>, approver: Arc<Approver>) -> Result<()> {
        println!("Listening to your DMs over Socket Mode...");

        tokio::select! {
            result = self.connection_loop(approver) => result,
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for shutdown signal")?;
                info!("Shutting down Socket Mode listener");
                Ok(())
            }
        }
    }
}
