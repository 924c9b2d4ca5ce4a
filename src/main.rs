mod approver;
mod command;
mod config;
mod github;
mod platform;
mod scheduler;
mod slack;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::approver::Approver;
use crate::command::CommandParser;
use crate::config::{Config, SourceMode};
use crate::github::GitHubClient;
use crate::platform::poller::Poller;
use crate::platform::socket_mode::SocketModeSource;
use crate::platform::MessageSource;
use crate::slack::SlackClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,approvebot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Source: {}", config.source.mode);
    info!("  GitHub host: {}", config.github.host);
    info!("  Allowed users: {:?}", config.approval.allowed_user_ids);
    if config.approval.allowed_user_ids.is_empty() {
        warn!("No allowed users configured; every command will be ignored");
    }

    let slack = Arc::new(SlackClient::new(&config.slack));
    let github = Arc::new(GitHubClient::new(&config.github)?);
    let parser = CommandParser::new(
        &config.github.host,
        config.approval.allowed_user_ids.iter().cloned(),
    )?;
    let approver = Arc::new(Approver::new(
        parser,
        slack.clone(),
        github,
        config.approval.notify_on_failure,
    ));

    let source: Arc<dyn MessageSource> = match config.source.mode {
        SourceMode::Poll => Arc::new(Poller::new(
            slack,
            Duration::from_secs(config.source.poll_interval_secs),
        )),
        SourceMode::Socket => {
            let app_token = config.slack.app_token.clone().unwrap_or_default();
            Arc::new(SocketModeSource::new(slack, app_token))
        }
    };

    info!("Bot is starting ({} source)...", source.name());
    source.run(approver).await?;

    Ok(())
}
