//! In-memory fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::approver::{ApprovalDispatcher, Approver, Notifier};
use crate::command::{ApprovalRequest, CommandParser};
use crate::platform::poller::DirectMessageApi;
use crate::platform::IncomingMessage;
use crate::slack::{Conversation, HistoryMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Post {
        conversation_id: String,
        text: String,
        thread_ts: Option<String>,
    },
    Approve(ApprovalRequest),
}

#[derive(Default)]
struct LogState {
    calls: Vec<Call>,
    fail_posts: bool,
    fail_approvals: bool,
}

/// Records every outbound call, in order, across notifier and dispatcher.
#[derive(Clone, Default)]
pub struct CallLog {
    state: Arc<Mutex<LogState>>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn fail_posts(&self) {
        self.state.lock().unwrap().fail_posts = true;
    }

    pub fn fail_approvals(&self) {
        self.state.lock().unwrap().fail_approvals = true;
    }

    pub fn approvals(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Approve(_)))
            .count()
    }
}

#[async_trait]
impl Notifier for CallLog {
    async fn post_message(
        &self,
        conversation_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Post {
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
            thread_ts: thread_ts.map(String::from),
        });
        if state.fail_posts {
            anyhow::bail!("Slack API error (chat.postMessage): channel_not_found");
        }
        Ok(())
    }
}

#[async_trait]
impl ApprovalDispatcher for CallLog {
    async fn approve(&self, request: &ApprovalRequest) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Approve(request.clone()));
        if state.fail_approvals {
            anyhow::bail!("GitHub API error (404 Not Found): {{\"message\":\"Not Found\"}}");
        }
        Ok(())
    }
}

/// An approver that only trusts `U_OK` and records into `log`.
pub fn approver(log: &CallLog, notify_on_failure: bool) -> Approver {
    let parser = CommandParser::new("github.com", vec!["U_OK".to_string()]).unwrap();
    Approver::new(
        parser,
        Arc::new(log.clone()),
        Arc::new(log.clone()),
        notify_on_failure,
    )
}

pub fn message(conversation_id: &str, user_id: &str, text: &str, ts: &str) -> IncomingMessage {
    IncomingMessage {
        conversation_id: conversation_id.into(),
        user_id: user_id.into(),
        text: text.into(),
        ts: ts.into(),
        thread_ts: None,
    }
}

/// Fake DM inbox. Only the newest message per conversation is visible,
/// the way `conversations.history` with `limit=1` behaves.
#[derive(Clone, Default)]
pub struct FakeInbox {
    state: Arc<Mutex<InboxState>>,
}

#[derive(Default)]
struct InboxState {
    conversations: Vec<Conversation>,
    history: HashMap<String, Vec<HistoryMessage>>,
    history_fetches: usize,
}

impl FakeInbox {
    pub fn add_conversation(&self, id: &str, user: &str) {
        self.state.lock().unwrap().conversations.push(Conversation {
            id: id.into(),
            user: Some(user.into()),
        });
    }

    pub fn receive(&self, conversation_id: &str, user: Option<&str>, text: &str, ts: &str) {
        self.state
            .lock()
            .unwrap()
            .history
            .entry(conversation_id.to_string())
            .or_default()
            .push(HistoryMessage {
                ts: ts.into(),
                user: user.map(String::from),
                text: Some(text.into()),
            });
    }

    pub fn delete_latest(&self, conversation_id: &str) {
        if let Some(messages) = self.state.lock().unwrap().history.get_mut(conversation_id) {
            messages.pop();
        }
    }

    pub fn history_fetches(&self) -> usize {
        self.state.lock().unwrap().history_fetches
    }
}

#[async_trait]
impl DirectMessageApi for FakeInbox {
    async fn list_direct_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self.state.lock().unwrap().conversations.clone())
    }

    async fn latest_message(&self, conversation_id: &str) -> Result<Option<HistoryMessage>> {
        let mut state = self.state.lock().unwrap();
        state.history_fetches += 1;
        Ok(state
            .history
            .get(conversation_id)
            .and_then(|messages| messages.last().cloned()))
    }
}
