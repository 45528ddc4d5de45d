//! Progression store.
//!
//! One record per member, keyed by member id, plus a small settings table.
//! `update` is the only way progression changes: it reads the record
//! (creating a zero-valued one when absent), runs the mutation and writes
//! the result in a single transaction.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::{ProgressionError, StoreError};
use crate::levels::Level;
use crate::member::{MemberId, MemberRecord};
use async_trait::async_trait;
use std::sync::Arc;

/// Settings key for the verification prompt message id
pub const VERIFICATION_MESSAGE_KEY: &str = "verification_message_id";

/// Read-modify-write step. `Ok(None)` leaves the record untouched.
///
/// Must be deterministic in its input: a retried transaction runs it again.
pub type Mutation =
    Arc<dyn Fn(&MemberRecord) -> Result<Option<MemberRecord>, ProgressionError> + Send + Sync>;

/// Result of one committed `update`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Record as read (zero-valued if it did not exist)
    pub before: MemberRecord,
    /// Record as persisted
    pub after: MemberRecord,
    /// Record was created by this transaction
    pub created: bool,
}

impl Commit {
    pub fn changed(&self) -> bool {
        self.created || self.before != self.after
    }
}

#[async_trait]
pub trait ProgressionStore: Send + Sync {
    async fn get(&self, member: MemberId) -> Result<Option<MemberRecord>, StoreError>;

    /// Insert or overwrite a whole record
    async fn upsert(&self, record: &MemberRecord) -> Result<(), StoreError>;

    /// Atomic read-modify-write of one member's record
    async fn update(&self, member: MemberId, mutation: Mutation) -> Result<Commit, StoreError>;

    /// Records whose roles or announcement are behind their level
    async fn pending_sync(&self) -> Result<Vec<MemberRecord>, StoreError>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Record that roles and announcement for `level` are done
    async fn mark_synced(&self, member: MemberId, level: Level) -> Result<Commit, StoreError> {
        self.update(
            member,
            Arc::new(move |record: &MemberRecord| -> Result<_, ProgressionError> {
                if record.synced_level == Some(level) {
                    return Ok(None);
                }
                Ok(Some(MemberRecord {
                    synced_level: Some(level),
                    ..record.clone()
                }))
            }),
        )
        .await
    }
}

/// Shared mutation driver for store implementations
pub(crate) fn run_mutation(
    member: MemberId,
    existing: Option<MemberRecord>,
    mutation: &Mutation,
) -> Result<(Commit, bool), StoreError> {
    let created = existing.is_none();
    let before = existing.unwrap_or_else(|| MemberRecord::new(member));
    match mutation(&before)? {
        Some(after) => {
            if after.member_id != member {
                return Err(StoreError::Corrupt {
                    member: member.0,
                    reason: format!("mutation produced record for {}", after.member_id),
                });
            }
            Ok((
                Commit {
                    before,
                    after,
                    created,
                },
                true,
            ))
        }
        None => Ok((
            Commit {
                after: before.clone(),
                before,
                created,
            },
            created,
        )),
    }
}
