use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    #[default]
    Poll,
    Socket,
}

impl std::fmt::Display for SourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceMode::Poll => write!(f, "poll"),
            SourceMode::Socket => write!(f, "socket"),
        }
    }
}

impl std::str::FromStr for SourceMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" => Ok(SourceMode::Poll),
            "socket" => Ok(SourceMode::Socket),
            other => anyhow::bail!("Unknown source mode '{}' (expected 'poll' or 'socket')", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    /// User token used for the Web API (conversations.*, chat.postMessage)
    #[serde(default)]
    pub token: String,
    /// App-level token (xapp-...), only needed in socket mode
    #[serde(default)]
    pub app_token: Option<String>,
    #[serde(default = "default_slack_api_base_url")]
    pub api_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_github_api_base_url")]
    pub api_base_url: String,
    /// Host that pull request links must point at
    #[serde(default = "default_github_host")]
    pub host: String,
    #[serde(default = "default_review_body")]
    pub review_body: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub allowed_user_ids: Vec<String>,
    /// Post an error notice when the review call fails after the acknowledgment
    #[serde(default)]
    pub notify_on_failure: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default)]
    pub mode: SourceMode,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_slack_api_base_url() -> String {
    "https://slack.com/api".to_string()
}

fn default_github_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_github_host() -> String {
    "github.com".to_string()
}

fn default_review_body() -> String {
    "Approved automatically via automation".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            app_token: None,
            api_base_url: default_slack_api_base_url(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base_url: default_github_api_base_url(),
            host: default_github_host(),
            review_body: default_review_body(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::default(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Split a comma-separated id list, trimming entries and dropping empty ones.
pub fn parse_user_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    /// Load from a TOML file (if present), then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read the TOML file alone. A missing file yields the defaults.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Config file {} not found, using defaults and environment only",
                path.display()
            );
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Override file values with whatever `lookup` returns for the known keys.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("SLACK_USER_TOKEN") {
            self.slack.token = token;
        }
        if let Some(token) = lookup("SLACK_APP_TOKEN") {
            self.slack.app_token = Some(token);
        }
        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.github.token = token;
        }
        if let Some(ids) = lookup("ALLOWED_USER_IDS") {
            self.approval.allowed_user_ids = parse_user_ids(&ids);
        }
        if let Some(mode) = lookup("APPROVEBOT_SOURCE") {
            self.source.mode = mode.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.slack.token.trim().is_empty() {
            anyhow::bail!("Slack token is not set ([slack] token or SLACK_USER_TOKEN)");
        }
        if self.github.token.trim().is_empty() {
            anyhow::bail!("GitHub token is not set ([github] token or GITHUB_TOKEN)");
        }
        if self.source.mode == SourceMode::Socket
            && self.slack.app_token.as_deref().map_or(true, |t| t.trim().is_empty())
        {
            anyhow::bail!("Socket mode needs an app-level token ([slack] app_token or SLACK_APP_TOKEN)");
        }
        if self.source.poll_interval_secs == 0 {
            anyhow::bail!("[source] poll_interval_secs must be greater than zero");
        }
        Ok(())
    }
}
