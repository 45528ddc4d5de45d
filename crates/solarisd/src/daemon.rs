//! Wiring - builds the dispatcher from a config and its collaborators.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::engine::ProgressionEngine;
use crate::events::VerificationGate;
use crate::handler::{EventHandler, HandlerSettings};
use crate::notifier::Notifier;
use crate::platform::Platform;
use crate::retry::RetryPolicy;
use crate::synchronizer::RoleSynchronizer;
use anyhow::{Context, Result};
use solaris_common::store::{ProgressionStore, VERIFICATION_MESSAGE_KEY};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub async fn assemble(
    config: &Config,
    store: Arc<dyn ProgressionStore>,
    platform: Arc<dyn Platform>,
    notifier: Arc<dyn Notifier>,
) -> Result<Dispatcher> {
    let table = Arc::new(config.validate()?);
    info!(
        "Clearance ladder: {} levels, top threshold {}",
        table.len(),
        table.threshold(table.max_level())?
    );

    let prompt_id = match store
        .get_setting(VERIFICATION_MESSAGE_KEY)
        .await
        .context("reading verification prompt id")?
    {
        Some(raw) => match raw.parse::<u64>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Stored verification message id '{}' is not a number", raw);
                None
            }
        },
        None => None,
    };

    let retry = RetryPolicy::new(
        config.daemon.retry_attempts,
        Duration::from_millis(config.daemon.retry_base_ms),
    );
    let engine = Arc::new(ProgressionEngine::new(store, Arc::clone(&table), retry));
    let sync = RoleSynchronizer::new(platform, table, config.daemon.platform_timeout());
    let gate = Arc::new(VerificationGate::new(
        &config.onboarding.verification_emoji,
        prompt_id,
    ));
    let handler = EventHandler::new(
        engine,
        sync,
        notifier,
        gate,
        HandlerSettings::from_config(config),
    );

    Ok(Dispatcher::new(
        Arc::new(handler),
        config.daemon.actor_idle(),
    ))
}
