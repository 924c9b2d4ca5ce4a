use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::command::{ApprovalRequest, CommandParser};
use crate::platform::IncomingMessage;

/// Posts text back into a conversation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post_message(
        &self,
        conversation_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<()>;
}

/// Submits an approval review for a pull request.
#[async_trait]
pub trait ApprovalDispatcher: Send + Sync {
    async fn approve(&self, request: &ApprovalRequest) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not a command, or not from an allowed user
    Ignored,
    Approved(ApprovalRequest),
}

/// The command pipeline shared by both message sources.
/// Platform-agnostic: receives an IncomingMessage, acknowledges, approves,
/// confirms.
pub struct Approver {
    parser: CommandParser,
    notifier: Arc<dyn Notifier>,
    dispatcher: Arc<dyn ApprovalDispatcher>,
    notify_on_failure: bool,
}

impl Approver {
    pub fn new(
        parser: CommandParser,
        notifier: Arc<dyn Notifier>,
        dispatcher: Arc<dyn ApprovalDispatcher>,
        notify_on_failure: bool,
    ) -> Self {
        Self {
            parser,
            notifier,
            dispatcher,
            notify_on_failure,
        }
    }

    /// Run one message through the pipeline.
    ///
    /// Errors from the acknowledgment, the review call or the confirmation
    /// are returned as-is; nothing is retried. A failed review leaves the
    /// acknowledgment in place without a confirmation.
    pub async fn process_message(&self, msg: &IncomingMessage) -> Result<Outcome> {
        let Some(request) = self.parser.parse(msg) else {
            return Ok(Outcome::Ignored);
        };

        info!(
            user = %msg.user_id,
            conversation = %msg.conversation_id,
            sent_at = ?msg.sent_at(),
            "Approve command for {}",
            request
        );

        let thread_ts = msg.thread_ts.as_deref();

        self.notifier
            .post_message(
                &msg.conversation_id,
                &format!(
                    "Approving PR #{} in {}/{}...",
                    request.number, request.owner, request.repo
                ),
                thread_ts,
            )
            .await
            .context("Failed to send acknowledgment")?;

        if let Err(e) = self.dispatcher.approve(&request).await {
            if self.notify_on_failure {
                let notice = format!(
                    "Failed to approve PR #{} in {}/{}: {:#}",
                    request.number, request.owner, request.repo, e
                );
                if let Err(notify_err) = self
                    .notifier
                    .post_message(&msg.conversation_id, &notice, thread_ts)
                    .await
                {
                    warn!("Failed to send failure notice: {:#}", notify_err);
                }
            }
            return Err(e.context(format!("Failed to approve {}", request)));
        }

        self.notifier
            .post_message(
                &msg.conversation_id,
                &format!("PR #{} approved successfully!", request.number),
                thread_ts,
            )
            .await
            .context("Failed to send confirmation")?;

        info!("Approved {}", request);
        Ok(Outcome::Approved(request))
    }
}
