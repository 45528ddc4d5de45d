//! Chat platform role interface.
//!
//! The live platform connection lives outside this crate. The daemon only
//! needs to read a member's roles and add or remove one role at a time.
//!
//! ## Usage
//!
//! Production wires in the platform adapter. Tests and offline replay use
//! `MemoryPlatform`, which keeps a role catalog and per-member role sets in
//! memory and can inject failures and latency.

use async_trait::async_trait;
use solaris_common::levels::{LevelTable, RoleTag};
use solaris_common::member::MemberId;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// Role or member does not exist on the platform
    #[error("not found: {0}")]
    NotFound(String),

    /// Platform unreachable or rate limited; safe to retry
    #[error("platform unavailable: {0}")]
    Transient(String),
}

// ============================================================================
// Platform Trait
// ============================================================================

#[async_trait]
pub trait Platform: Send + Sync {
    async fn get_roles(&self, member: MemberId) -> Result<BTreeSet<RoleTag>, PlatformError>;

    async fn add_role(&self, member: MemberId, role: &RoleTag) -> Result<(), PlatformError>;

    async fn remove_role(&self, member: MemberId, role: &RoleTag) -> Result<(), PlatformError>;
}

// ============================================================================
// In-memory Platform
// ============================================================================

/// One mutating call, as observed by `MemoryPlatform`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleCall {
    Add(MemberId, RoleTag),
    Remove(MemberId, RoleTag),
}

#[derive(Default)]
struct MemoryPlatformState {
    catalog: BTreeSet<RoleTag>,
    members: HashMap<MemberId, BTreeSet<RoleTag>>,
    calls: Vec<RoleCall>,
    failures: u32,
}

#[derive(Default)]
pub struct MemoryPlatform {
    state: Mutex<MemoryPlatformState>,
    latency: Option<Duration>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog containing every role tag of the ladder
    pub fn with_ladder(table: &LevelTable) -> Self {
        let platform = Self::new();
        for level in 0..=table.max_level() {
            if let Ok(role) = table.role(level) {
                platform.create_role(role.clone());
            }
        }
        platform
    }

    /// Delay every call (timeout tests)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn create_role(&self, role: RoleTag) {
        self.lock().catalog.insert(role);
    }

    /// Drop a role from the catalog, as if deleted by an admin
    pub fn delete_role(&self, role: &RoleTag) {
        self.lock().catalog.remove(role);
    }

    /// Give a member roles directly, bypassing the call log
    pub fn seed_roles(&self, member: MemberId, roles: &[&str]) {
        let mut state = self.lock();
        let held = state.members.entry(member).or_default();
        held.extend(roles.iter().map(|r| RoleTag::new(*r)));
    }

    /// Drop every role a member holds, as when they leave the server
    pub fn clear_roles(&self, member: MemberId) {
        self.lock().members.remove(&member);
    }

    pub fn roles_of(&self, member: MemberId) -> BTreeSet<RoleTag> {
        self.lock().members.get(&member).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<RoleCall> {
        self.lock().calls.clone()
    }

    /// Fail the next `count` calls with a transient error
    pub fn fail_next_calls(&self, count: u32) {
        self.lock().failures = count;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryPlatformState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn enter(&self) -> Result<(), PlatformError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.lock();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(PlatformError::Transient("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn get_roles(&self, member: MemberId) -> Result<BTreeSet<RoleTag>, PlatformError> {
        self.enter().await?;
        Ok(self.roles_of(member))
    }

    async fn add_role(&self, member: MemberId, role: &RoleTag) -> Result<(), PlatformError> {
        self.enter().await?;
        let mut state = self.lock();
        if !state.catalog.contains(role) {
            return Err(PlatformError::NotFound(format!("role '{}'", role)));
        }
        state.calls.push(RoleCall::Add(member, role.clone()));
        state.members.entry(member).or_default().insert(role.clone());
        Ok(())
    }

    async fn remove_role(&self, member: MemberId, role: &RoleTag) -> Result<(), PlatformError> {
        self.enter().await?;
        let mut state = self.lock();
        if !state.catalog.contains(role) {
            return Err(PlatformError::NotFound(format!("role '{}'", role)));
        }
        state.calls.push(RoleCall::Remove(member, role.clone()));
        if let Some(held) = state.members.get_mut(&member) {
            held.remove(role);
        }
        Ok(())
    }
}
