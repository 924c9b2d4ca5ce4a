use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::approver::Notifier;
use crate::config::SlackConfig;
use crate::platform::poller::DirectMessageApi;

/// Direct message conversations are listed in a single page of this size.
const CONVERSATION_PAGE_SIZE: &str = "100";

/// A conversation as returned by `conversations.list`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    /// The other party of a direct message conversation
    #[serde(default)]
    pub user: Option<String>,
}

/// A message as returned by `conversations.history`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HistoryMessage {
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Every Web API response carries `ok`, and `error` when `ok` is false.
#[derive(Debug, Deserialize)]
struct ApiStatus {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationsList {
    #[serde(default)]
    channels: Vec<Conversation>,
}

#[derive(Debug, Deserialize)]
struct ConversationsHistory {
    #[serde(default)]
    messages: Vec<HistoryMessage>,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpen {
    url: String,
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
}

/// Minimal Slack Web API client
pub struct SlackClient {
    client: reqwest::Client,
    token: String,
    api_base_url: String,
}

impl SlackClient {
    pub fn new(config: &SlackConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: config.token.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base_url, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        debug!("Calling Slack API: {}", method);

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send request to Slack ({})", method))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read Slack response ({})", method))?;

        if !status.is_success() {
            anyhow::bail!("Slack API error ({} {}): {}", method, status, body);
        }

        let api_status: ApiStatus = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse Slack response ({})", method))?;
        if !api_status.ok {
            anyhow::bail!(
                "Slack API error ({}): {}",
                method,
                api_status.error.as_deref().unwrap_or("unknown_error")
            );
        }

        serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse Slack response ({})", method))
    }

    /// List direct message conversations (first page only).
    pub async fn list_direct_conversations(&self) -> Result<Vec<Conversation>> {
        let request = self
            .client
            .get(self.url("conversations.list"))
            .bearer_auth(&self.token)
            .query(&[("types", "im"), ("limit", CONVERSATION_PAGE_SIZE)]);

        let list: ConversationsList = self.call("conversations.list", request).await?;
        Ok(list.channels)
    }

    /// Fetch the most recent message of a conversation, if any.
    pub async fn latest_message(&self, conversation_id: &str) -> Result<Option<HistoryMessage>> {
        let request = self
            .client
            .get(self.url("conversations.history"))
            .bearer_auth(&self.token)
            .query(&[("channel", conversation_id), ("limit", "1")]);

        let history: ConversationsHistory = self.call("conversations.history", request).await?;
        Ok(history.messages.into_iter().next())
    }

    pub async fn post_message(
        &self,
        conversation_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<()> {
        let request = self
            .client
            .post(self.url("chat.postMessage"))
            .bearer_auth(&self.token)
            .json(&PostMessageRequest {
                channel: conversation_id,
                text,
                thread_ts,
            });

        let _: serde_json::Value = self.call("chat.postMessage", request).await?;
        Ok(())
    }

    /// Ask for a Socket Mode websocket URL using the app-level token.
    pub async fn open_socket_connection(&self, app_token: &str) -> Result<String> {
        let request = self
            .client
            .post(self.url("apps.connections.open"))
            .bearer_auth(app_token);

        let opened: ConnectionsOpen = self.call("apps.connections.open", request).await?;
        Ok(opened.url)
    }
}

#[async_trait]
impl Notifier for SlackClient {
    async fn post_message(
        &self,
        conversation_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<()> {
        SlackClient::post_message(self, conversation_id, text, thread_ts).await
    }
}

#[async_trait]
impl DirectMessageApi for SlackClient {
    async fn list_direct_conversations(&self) -> Result<Vec<Conversation>> {
        SlackClient::list_direct_conversations(self).await
    }

    async fn latest_message(&self, conversation_id: &str) -> Result<Option<HistoryMessage>> {
        SlackClient::latest_message(self, conversation_id).await
    }
}
