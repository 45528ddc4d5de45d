//! Notification sink - promotion announcements and onboarding messages
//!
//! Notifications are side effects only. Failures are logged by the caller
//! and never retried, so a notification is delivered at most once.

use async_trait::async_trait;
use solaris_common::levels::Level;
use solaris_common::member::MemberId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Recipient does not accept messages (DMs disabled, channel missing)
    #[error("delivery refused: {0}")]
    Refused(String),

    #[error("delivery failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce a promotion to `level`
    async fn promoted(&self, member: MemberId, level: Level, announcement: &str)
        -> Result<(), NotifyError>;

    /// Welcome a member who just joined
    async fn onboarded(&self, member: MemberId, welcome: &str) -> Result<(), NotifyError>;

    /// Post the verification prompt, returning its message id
    async fn publish_verification_prompt(&self, prompt: &str, emoji: &str)
        -> Result<u64, NotifyError>;
}

// ============================================================================
// Log Notifier (offline replay)
// ============================================================================

/// Writes notifications to the log and stdout
pub struct LogNotifier {
    channel: String,
    next_message_id: AtomicU64,
}

impl LogNotifier {
    pub fn new(channel: &str) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            channel: channel.to_string(),
            next_message_id: AtomicU64::new(seed),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn promoted(
        &self,
        member: MemberId,
        level: Level,
        announcement: &str,
    ) -> Result<(), NotifyError> {
        info!("Promotion: member {} -> level {}", member, level);
        println!("#{} {}", self.channel, announcement);
        Ok(())
    }

    async fn onboarded(&self, member: MemberId, welcome: &str) -> Result<(), NotifyError> {
        info!("Onboarded member {}", member);
        println!("DM {}: {}", member, welcome);
        Ok(())
    }

    async fn publish_verification_prompt(
        &self,
        prompt: &str,
        emoji: &str,
    ) -> Result<u64, NotifyError> {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        info!("Posted verification prompt as message {}", id);
        println!("#verification [{}] {} ({})", id, prompt, emoji);
        Ok(id)
    }
}

// ============================================================================
// Recording Notifier (testing)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Promoted { member: MemberId, level: Level, text: String },
    Onboarded { member: MemberId, text: String },
    VerificationPrompt { message_id: u64 },
}

/// Keeps every notification in memory
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    refuse_dms: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Onboarding DMs fail as if the member disabled them
    pub fn refusing_dms() -> Self {
        Self {
            refuse_dms: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn promotions_for(&self, member: MemberId) -> Vec<Level> {
        self.sent()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Promoted { member: m, level, .. } if m == member => Some(level),
                _ => None,
            })
            .collect()
    }

    fn push(&self, notification: Notification) {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn promoted(
        &self,
        member: MemberId,
        level: Level,
        announcement: &str,
    ) -> Result<(), NotifyError> {
        self.push(Notification::Promoted {
            member,
            level,
            text: announcement.to_string(),
        });
        Ok(())
    }

    async fn onboarded(&self, member: MemberId, welcome: &str) -> Result<(), NotifyError> {
        if self.refuse_dms {
            return Err(NotifyError::Refused(format!("member {} has DMs disabled", member)));
        }
        self.push(Notification::Onboarded {
            member,
            text: welcome.to_string(),
        });
        Ok(())
    }

    async fn publish_verification_prompt(
        &self,
        _prompt: &str,
        _emoji: &str,
    ) -> Result<u64, NotifyError> {
        let message_id = 1_000 + self.sent().len() as u64;
        self.push(Notification::VerificationPrompt { message_id });
        Ok(message_id)
    }
}
