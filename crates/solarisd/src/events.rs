//! Inbound platform events and their translation to progression events.
//!
//! The platform layer delivers raw events (`InboundEvent`, one JSON object
//! per line in replay mode). Bots are ignored, and a reaction only counts as
//! verification when it is the configured emoji on the current verification
//! prompt.

use serde::{Deserialize, Serialize};
use solaris_common::member::MemberId;
use tokio::sync::Mutex;

/// Progression event for one member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    MemberJoined(MemberId),
    Verified(MemberId),
    ActivityMessage(MemberId),
    /// Re-run role sync and any owed announcement
    Reconcile(MemberId),
}

impl Event {
    pub fn member(&self) -> MemberId {
        match self {
            Event::MemberJoined(m)
            | Event::Verified(m)
            | Event::ActivityMessage(m)
            | Event::Reconcile(m) => *m,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::MemberJoined(_) => "member_joined",
            Event::Verified(_) => "verified",
            Event::ActivityMessage(_) => "activity_message",
            Event::Reconcile(_) => "reconcile",
        }
    }
}

/// Raw event as delivered by the platform layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    MemberJoined {
        member_id: MemberId,
    },
    ReactionAdded {
        member_id: MemberId,
        message_id: u64,
        emoji: String,
        #[serde(default)]
        is_bot: bool,
    },
    MessageCreated {
        author_id: MemberId,
        #[serde(default)]
        is_bot: bool,
    },
}

/// Which reaction counts as verification
pub struct VerificationGate {
    emoji: String,
    message_id: Mutex<Option<u64>>,
}

impl VerificationGate {
    pub fn new(emoji: &str, message_id: Option<u64>) -> Self {
        Self {
            emoji: emoji.to_string(),
            message_id: Mutex::new(message_id),
        }
    }

    pub fn emoji(&self) -> &str {
        &self.emoji
    }

    pub async fn message_id(&self) -> Option<u64> {
        *self.message_id.lock().await
    }

    /// Exclusive access to the prompt id, held while publishing a new prompt
    pub(crate) fn slot(&self) -> &Mutex<Option<u64>> {
        &self.message_id
    }

    /// Map a raw event to a progression event; None means ignore
    pub async fn translate(&self, inbound: &InboundEvent) -> Option<Event> {
        match inbound {
            InboundEvent::MemberJoined { member_id } => Some(Event::MemberJoined(*member_id)),
            InboundEvent::MessageCreated { author_id, is_bot } => {
                (!is_bot).then_some(Event::ActivityMessage(*author_id))
            }
            InboundEvent::ReactionAdded {
                member_id,
                message_id,
                emoji,
                is_bot,
            } => {
                if *is_bot || *emoji != self.emoji {
                    return None;
                }
                let prompt = self.message_id().await?;
                (prompt == *message_id).then_some(Event::Verified(*member_id))
            }
        }
    }
}
