//! In-memory progression store for tests and offline replay.

use super::{run_mutation, Commit, Mutation, ProgressionStore};
use crate::error::StoreError;
use crate::member::{MemberId, MemberRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    members: Mutex<HashMap<MemberId, MemberRecord>>,
    settings: Mutex<HashMap<String, String>>,
    /// Transient failures to report before updates succeed again
    failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` updates fail with a transient error
    pub fn fail_next_updates(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ProgressionStore for MemoryStore {
    async fn get(&self, member: MemberId) -> Result<Option<MemberRecord>, StoreError> {
        Ok(self.members.lock().await.get(&member).cloned())
    }

    async fn upsert(&self, record: &MemberRecord) -> Result<(), StoreError> {
        self.members
            .lock()
            .await
            .insert(record.member_id, record.clone());
        Ok(())
    }

    async fn update(&self, member: MemberId, mutation: Mutation) -> Result<Commit, StoreError> {
        if self.take_failure() {
            return Err(StoreError::Task("injected transient failure".into()));
        }

        // lock held across read and write
        let mut members = self.members.lock().await;
        let (commit, write) = run_mutation(member, members.get(&member).cloned(), &mutation)?;
        if write {
            members.insert(member, commit.after.clone());
        }
        Ok(commit)
    }

    async fn pending_sync(&self) -> Result<Vec<MemberRecord>, StoreError> {
        let members = self.members.lock().await;
        let mut pending: Vec<MemberRecord> =
            members.values().filter(|r| r.needs_sync()).cloned().collect();
        pending.sort_by_key(|r| r.member_id);
        Ok(pending)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.settings.lock().await.get(key).cloned())
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.settings
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
