//! Progression engine service.
//!
//! Wraps the pure progression rules around the store: every change is one
//! store transaction, retried on transient failure. Callers are expected to
//! serialize calls per member (see `dispatcher`); the store transaction
//! keeps records consistent even if they do not.

use crate::retry::RetryPolicy;
use solaris_common::error::{ProgressionError, StoreError};
use solaris_common::levels::{Level, LevelTable};
use solaris_common::member::{Dossier, MemberId, MemberRecord};
use solaris_common::progression::{self, LevelChange};
use solaris_common::store::{Commit, Mutation, ProgressionStore};
use std::sync::Arc;
use tracing::debug;

pub struct ProgressionEngine {
    store: Arc<dyn ProgressionStore>,
    table: Arc<LevelTable>,
    retry: RetryPolicy,
}

impl ProgressionEngine {
    pub fn new(
        store: Arc<dyn ProgressionStore>,
        table: Arc<LevelTable>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            table,
            retry,
        }
    }

    pub fn table(&self) -> &Arc<LevelTable> {
        &self.table
    }

    pub fn store(&self) -> &Arc<dyn ProgressionStore> {
        &self.store
    }

    async fn commit(
        &self,
        what: &str,
        member: MemberId,
        mutation: Mutation,
    ) -> Result<Commit, StoreError> {
        self.retry
            .run(what, StoreError::is_transient, || {
                self.store.update(member, Arc::clone(&mutation))
            })
            .await
    }

    /// Add activity points in one transaction
    pub async fn award(&self, member: MemberId, delta: i64) -> Result<Commit, StoreError> {
        if delta < 0 {
            return Err(ProgressionError::NegativeDelta(delta).into());
        }

        let table = Arc::clone(&self.table);
        let mutation: Mutation = Arc::new(move |record: &MemberRecord| {
            progression::apply_activity(record, delta, &table).map(Some)
        });

        let commit = self.commit("award points", member, mutation).await?;
        debug!(
            "member {} +{} -> {} points, level {} -> {}",
            member, delta, commit.after.points, commit.before.level, commit.after.level
        );
        Ok(commit)
    }

    /// Add activity points. Returns the level before and after.
    pub async fn apply_activity(
        &self,
        member: MemberId,
        delta: i64,
    ) -> Result<LevelChange, StoreError> {
        let commit = self.award(member, delta).await?;
        Ok(LevelChange::between(&commit.before, &commit.after))
    }

    /// Level 0 -> 1 promotion; a no-op for anyone past level 0
    pub async fn verify(&self, member: MemberId) -> Result<Commit, StoreError> {
        let table = Arc::clone(&self.table);
        let mutation: Mutation =
            Arc::new(move |record: &MemberRecord| progression::apply_verification(record, &table));
        self.commit("verify", member, mutation).await
    }

    /// True only for the call that actually promoted the member
    pub async fn apply_verification(&self, member: MemberId) -> Result<bool, StoreError> {
        let commit = self.verify(member).await?;
        Ok(LevelChange::between(&commit.before, &commit.after).promoted())
    }

    /// Create a zero-valued record if the member is new
    pub async fn ensure_member(&self, member: MemberId) -> Result<Commit, StoreError> {
        let table = Arc::clone(&self.table);
        let mutation: Mutation = Arc::new(
            move |record: &MemberRecord| -> Result<Option<MemberRecord>, ProgressionError> {
                table.check(record.level)?;
                Ok(None)
            },
        );
        self.commit("register member", member, mutation).await
    }

    pub async fn record(&self, member: MemberId) -> Result<Option<MemberRecord>, StoreError> {
        self.store.get(member).await
    }

    /// Read-only summary; unknown members read as a fresh record
    pub async fn dossier(&self, member: MemberId) -> Result<Dossier, StoreError> {
        let record = self
            .store
            .get(member)
            .await?
            .unwrap_or_else(|| MemberRecord::new(member));
        Ok(Dossier::from_record(&record, &self.table))
    }

    pub async fn mark_synced(&self, member: MemberId, level: Level) -> Result<(), StoreError> {
        self.table.check(level)?;
        self.retry
            .run("mark synced", StoreError::is_transient, || {
                self.store.mark_synced(member, level)
            })
            .await?;
        Ok(())
    }

    pub async fn pending_sync(&self) -> Result<Vec<MemberRecord>, StoreError> {
        self.store.pending_sync().await
    }
}
