use crate::{
    admin::AdminExecutor,
    api::{self, AppState},
    cli::commands::{egress, webhook},
    config::SiteConfig,
    egress::safe_client,
    redirect::RedirectResolver,
    storage::Backend,
    webhook::WebhookNotifier,
    APP_USER_AGENT,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub config: SiteConfig,
    pub egress: egress::Options,
    pub webhook: Option<webhook::Options>,
}

/// Wire the store, resolver, egress guard and webhook notifier, then serve.
///
/// # Errors
/// Returns an error if the store is unreachable, the allow list holds an
/// invalid pattern, or the listener fails.
pub async fn execute(args: Args) -> Result<()> {
    let Args {
        port,
        dsn,
        config,
        egress,
        webhook,
    } = args;

    if dsn.starts_with("memory://") {
        warn!("Using the in-memory store, users and audit entries are lost on restart");
    }

    let store = Backend::connect(&dsn).await?;

    let redirect = RedirectResolver::from_config(&config)
        .context("Invalid redirect allow list pattern")?;

    let blocklist = Arc::new(egress.blocklist());

    let notifier = match webhook {
        Some(options) => {
            let transport = safe_client(
                reqwest::Client::builder()
                    .user_agent(APP_USER_AGENT)
                    .timeout(options.timeout),
                Arc::clone(&blocklist),
            )
            .context("Failed to build webhook client")?;

            info!("Admin events will be delivered to {}", options.url);

            Some(Arc::new(
                WebhookNotifier::new(options.url, transport).with_secret(options.secret),
            ))
        }
        None => None,
    };

    let config = Arc::new(config);
    let admin = AdminExecutor::new(store, Arc::clone(&config));
    let state = AppState::new(admin, config, Arc::new(redirect)).with_webhook(notifier);

    api::new(port, state).await
}
