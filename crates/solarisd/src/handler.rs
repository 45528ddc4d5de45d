//! Event handler - one progression event, start to finish.
//!
//! Commit the progression change, sync roles to the committed level, record
//! the level as synced, then announce. The synced level is stored before the
//! announcement goes out, so a crash in between loses the announcement
//! instead of repeating it. A sync that keeps failing leaves the record
//! behind its level; the next event for that member or a reconcile sweep
//! picks it up.

use crate::config::{AnnounceConfig, Config};
use crate::engine::ProgressionEngine;
use crate::events::{Event, VerificationGate};
use crate::notifier::{Notifier, NotifyError};
use crate::retry::RetryPolicy;
use crate::synchronizer::{RoleSynchronizer, SyncError};
use solaris_common::error::StoreError;
use solaris_common::levels::Level;
use solaris_common::member::{MemberId, MemberRecord};
use solaris_common::progression::LevelChange;
use solaris_common::store::VERIFICATION_MESSAGE_KEY;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("role sync: {0}")]
    Sync(#[from] SyncError),

    #[error("notify: {0}")]
    Notify(#[from] NotifyError),

    #[error("member queue for {0} closed")]
    QueueClosed(MemberId),
}

impl HandlerError {
    /// Retrying the member's reconciliation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::Store(e) => e.is_transient(),
            HandlerError::Sync(e) => e.is_transient(),
            HandlerError::Notify(_) => false,
            HandlerError::QueueClosed(_) => true,
        }
    }
}

/// Result of handling one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub event: Event,
    pub change: LevelChange,
    /// Level announced by this event, if any
    pub announced: Option<Level>,
    /// Roles were synced by this event
    pub synced: bool,
}

/// Handler settings taken from the config
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub points_per_message: i64,
    pub welcome_message: String,
    pub verification_prompt: String,
    pub announce: AnnounceConfig,
    pub sync_retry: RetryPolicy,
}

impl HandlerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            points_per_message: config.daemon.points_per_message,
            welcome_message: config.onboarding.welcome_message.clone(),
            verification_prompt: config.onboarding.verification_prompt.clone(),
            announce: config.announce.clone(),
            sync_retry: RetryPolicy::new(
                config.daemon.retry_attempts,
                std::time::Duration::from_millis(config.daemon.retry_base_ms),
            ),
        }
    }
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct EventHandler {
    engine: Arc<ProgressionEngine>,
    sync: RoleSynchronizer,
    notifier: Arc<dyn Notifier>,
    gate: Arc<VerificationGate>,
    settings: HandlerSettings,
}

impl EventHandler {
    pub fn new(
        engine: Arc<ProgressionEngine>,
        sync: RoleSynchronizer,
        notifier: Arc<dyn Notifier>,
        gate: Arc<VerificationGate>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            engine,
            sync,
            notifier,
            gate,
            settings,
        }
    }

    pub fn engine(&self) -> &Arc<ProgressionEngine> {
        &self.engine
    }

    pub fn gate(&self) -> &Arc<VerificationGate> {
        &self.gate
    }

    /// Handle one event. Callers serialize events per member.
    pub async fn handle(&self, event: Event) -> Result<Outcome, HandlerError> {
        debug!("Handling {} for member {}", event.kind(), event.member());
        match event {
            Event::MemberJoined(member) => self.on_join(event, member).await,
            Event::Verified(member) => {
                let commit = self.engine.verify(member).await?;
                self.finish(event, &commit.before, &commit.after, false).await
            }
            Event::ActivityMessage(member) => {
                let commit = self
                    .engine
                    .award(member, self.settings.points_per_message)
                    .await?;
                self.finish(event, &commit.before, &commit.after, false).await
            }
            Event::Reconcile(member) => {
                let record = self
                    .engine
                    .record(member)
                    .await?
                    .unwrap_or_else(|| MemberRecord::new(member));
                self.finish(event, &record, &record, false).await
            }
        }
    }

    async fn on_join(&self, event: Event, member: MemberId) -> Result<Outcome, HandlerError> {
        let commit = self.engine.ensure_member(member).await?;
        if !commit.created {
            info!(
                "Member {} rejoined at level {}",
                member, commit.after.level
            );
        }

        if let Err(e) = self.ensure_verification_prompt().await {
            warn!("Could not post verification prompt: {}", e);
        }

        // a join always re-applies roles, the platform may have dropped them
        let outcome = self.finish(event, &commit.before, &commit.after, true).await?;

        if let Err(e) = self
            .notifier
            .onboarded(member, &self.settings.welcome_message)
            .await
        {
            warn!("Welcome message to member {} not delivered: {}", member, e);
        }
        Ok(outcome)
    }

    /// Sync and announce whatever `after` still owes
    async fn finish(
        &self,
        event: Event,
        before: &MemberRecord,
        after: &MemberRecord,
        force_sync: bool,
    ) -> Result<Outcome, HandlerError> {
        let change = LevelChange::between(before, after);
        let mut outcome = Outcome {
            event,
            change,
            announced: None,
            synced: false,
        };

        if !force_sync && !after.needs_sync() {
            return Ok(outcome);
        }

        let member = after.member_id;
        let level = after.level;
        self.settings
            .sync_retry
            .run("role sync", SyncError::is_transient, || {
                self.sync.sync(member, level)
            })
            .await?;
        outcome.synced = true;

        let owed = match after.synced_level {
            Some(synced) => level > synced,
            None => level > 0,
        };
        if after.synced_level != Some(level) {
            self.engine.mark_synced(member, level).await?;
        }

        if owed {
            self.announce(member, level).await;
            outcome.announced = Some(level);
        }
        Ok(outcome)
    }

    async fn announce(&self, member: MemberId, level: Level) {
        let rank = self.engine.table().name(level).unwrap_or("Unknown");
        let text = self
            .settings
            .announce
            .render(&format!("<@{}>", member), rank);
        info!("Member {} promoted to {}", member, rank);
        if let Err(e) = self.notifier.promoted(member, level, &text).await {
            warn!("Promotion announcement for member {} not delivered: {}", member, e);
        }
    }

    /// Post the verification prompt once and persist its id
    pub async fn ensure_verification_prompt(&self) -> Result<u64, HandlerError> {
        let mut slot = self.gate.slot().lock().await;
        if let Some(id) = *slot {
            return Ok(id);
        }

        let store = self.engine.store();
        if let Some(stored) = store.get_setting(VERIFICATION_MESSAGE_KEY).await? {
            if let Ok(id) = stored.parse::<u64>() {
                *slot = Some(id);
                return Ok(id);
            }
            warn!("Ignoring unparsable verification message id '{}'", stored);
        }

        let id = self
            .notifier
            .publish_verification_prompt(&self.settings.verification_prompt, self.gate.emoji())
            .await?;
        store
            .put_setting(VERIFICATION_MESSAGE_KEY, &id.to_string())
            .await?;
        *slot = Some(id);
        info!("Verification prompt is message {}", id);
        Ok(id)
    }
}
