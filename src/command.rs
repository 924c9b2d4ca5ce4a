use std::collections::HashSet;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::warn;

use crate::platform::IncomingMessage;

/// The only command the bot understands.
pub const APPROVE_COMMAND: &str = "!approve";

/// A pull request to approve, as captured from the message text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl std::fmt::Display for ApprovalRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Turns message text into an [`ApprovalRequest`] for authorized authors.
pub struct CommandParser {
    allowed_user_ids: HashSet<String>,
    pr_url: Regex,
}

impl CommandParser {
    pub fn new<I>(host: &str, allowed_user_ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let pattern = format!(
            r"https://{}/([^/]+)/([^/]+)/pull/(\d+)",
            regex::escape(host)
        );
        let pr_url = Regex::new(&pattern)
            .with_context(|| format!("Failed to build pull request pattern for host {}", host))?;

        Ok(Self {
            allowed_user_ids: allowed_user_ids.into_iter().collect(),
            pr_url,
        })
    }

    pub fn is_authorized(&self, user_id: &str) -> bool {
        self.allowed_user_ids.contains(user_id)
    }

    /// A `!approve` from someone outside the allow-list. These get logged.
    pub fn is_unauthorized_attempt(&self, msg: &IncomingMessage) -> bool {
        !self.is_authorized(&msg.user_id) && msg.text.trim().starts_with(APPROVE_COMMAND)
    }

    /// Returns `None` unless the author is allowed, the text is non-empty,
    /// contains a pull request link and starts with `!approve`.
    pub fn parse(&self, msg: &IncomingMessage) -> Option<ApprovalRequest> {
        let text = msg.text.trim();

        if !self.is_authorized(&msg.user_id) {
            if self.is_unauthorized_attempt(msg) {
                warn!(
                    user = %msg.user_id,
                    conversation = %msg.conversation_id,
                    "Unauthorized approve attempt"
                );
            }
            return None;
        }

        if text.is_empty() {
            return None;
        }

        let caps = self.pr_url.captures(text)?;
        if !text.starts_with(APPROVE_COMMAND) {
            return None;
        }

        // \d+ can still overflow u64; such a link is treated as no match.
        let number = caps[3].parse().ok()?;

        Some(ApprovalRequest {
            owner: caps[1].to_string(),
            repo: caps[2].to_string(),
            number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> CommandParser {
        CommandParser::new("github.com", vec!["U_OK".to_string()]).unwrap()
    }

    fn msg(user: &str, text: &str) -> IncomingMessage {
        IncomingMessage {
            conversation_id: "D1".into(),
            user_id: user.into(),
            text: text.into(),
            ts: "1.0".into(),
            thread_ts: None,
        }
    }

    #[test]
    fn test_parses_approve_command() {
        let req = parser()
            .parse(&msg("U_OK", "!approve https://github.com/acme/widgets/pull/42"))
            .unwrap();
        assert_eq!(
            req,
            ApprovalRequest {
                owner: "acme".into(),
                repo: "widgets".into(),
                number: 42,
            }
        );
        assert_eq!(req.to_string(), "acme/widgets#42");
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        let req = parser().parse(&msg(
            "U_OK",
            "  \n!approve please https://github.com/acme/widgets/pull/7/files  ",
        ));
        assert_eq!(req.map(|r| r.number), Some(7));
    }

    #[test]
    fn test_unauthorized_user_is_ignored() {
        assert!(parser()
            .parse(&msg("U_OTHER", "!approve https://github.com/acme/widgets/pull/42"))
            .is_none());
        assert!(parser().parse(&msg("U_OTHER", "hello")).is_none());
    }

    #[test]
    fn test_unauthorized_attempt_detection() {
        let parser = parser();
        assert!(parser.is_unauthorized_attempt(&msg(
            "U_OTHER",
            "  !approve https://github.com/acme/widgets/pull/42"
        )));
        assert!(parser.is_unauthorized_attempt(&msg("U_OTHER", "!approve")));
        assert!(!parser.is_unauthorized_attempt(&msg("U_OTHER", "hello !approve")));
        assert!(!parser.is_unauthorized_attempt(&msg(
            "U_OK",
            "!approve https://github.com/acme/widgets/pull/42"
        )));
    }

    #[test]
    fn test_missing_url_is_ignored() {
        assert!(parser().parse(&msg("U_OK", "!approve")).is_none());
        assert!(parser()
            .parse(&msg("U_OK", "!approve https://github.com/acme/widgets/issues/42"))
            .is_none());
    }

    #[test]
    fn test_command_must_lead() {
        assert!(parser()
            .parse(&msg("U_OK", "please !approve https://github.com/acme/widgets/pull/42"))
            .is_none());
        assert!(parser()
            .parse(&msg("U_OK", "https://github.com/acme/widgets/pull/42"))
            .is_none());
    }

    #[test]
    fn test_empty_text_is_ignored() {
        assert!(parser().parse(&msg("U_OK", "   ")).is_none());
    }

    #[test]
    fn test_other_host_is_ignored() {
        assert!(parser()
            .parse(&msg("U_OK", "!approve https://gitlab.com/acme/widgets/pull/42"))
            .is_none());
        assert!(parser()
            .parse(&msg("U_OK", "!approve https://githubXcom/acme/widgets/pull/42"))
            .is_none());
    }

    #[test]
    fn test_custom_host() {
        let parser =
            CommandParser::new("git.example.com", vec!["U_OK".to_string()]).unwrap();
        let req = parser
            .parse(&msg("U_OK", "!approve https://git.example.com/team/api/pull/3"))
            .unwrap();
        assert_eq!(req.owner, "team");
        assert_eq!(req.number, 3);
    }

    #[test]
    fn test_owner_and_repo_are_not_decoded() {
        let req = parser()
            .parse(&msg("U_OK", "!approve https://github.com/ac%2Fme/wid%20gets/pull/1"))
            .unwrap();
        assert_eq!(req.owner, "ac%2Fme");
        assert_eq!(req.repo, "wid%20gets");
    }

    #[test]
    fn test_overflowing_number_is_ignored() {
        assert!(parser()
            .parse(&msg(
                "U_OK",
                "!approve https://github.com/acme/widgets/pull/99999999999999999999999"
            ))
            .is_none());
    }
}
