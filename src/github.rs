use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::approver::ApprovalDispatcher;
use crate::command::ApprovalRequest;
use crate::config::GitHubConfig;

const USER_AGENT: &str = concat!("approvebot/", env!("CARGO_PKG_VERSION"));
const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Serialize)]
struct CreateReviewRequest<'a> {
    event: &'static str,
    body: &'a str,
}

/// Submits pull request reviews through the GitHub REST API
pub struct GitHubClient {
    client: reqwest::Client,
    token: String,
    api_base_url: String,
    review_body: String,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build GitHub HTTP client")?;

        Ok(Self {
            client,
            token: config.token.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            review_body: config.review_body.clone(),
        })
    }

    /// Owner and repo go into the path exactly as captured.
    fn reviews_url(&self, request: &ApprovalRequest) -> String {
        format!(
            "{}/repos/{}/{}/pulls/{}/reviews",
            self.api_base_url, request.owner, request.repo, request.number
        )
    }

    pub async fn submit_approval(&self, request: &ApprovalRequest) -> Result<()> {
        let url = self.reviews_url(request);

        debug!("Sending approval review to GitHub: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION)
            .json(&CreateReviewRequest {
                event: "APPROVE",
                body: &self.review_body,
            })
            .send()
            .await
            .context("Failed to send review request to GitHub")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error ({}): {}", status, error_body);
        }

        Ok(())
    }
}

#[async_trait]
impl ApprovalDispatcher for GitHubClient {
    async fn approve(&self, request: &ApprovalRequest) -> Result<()> {
        self.submit_approval(request).await
    }
}
