//! Role synchronizer.
//!
//! Reads a member's roles, plans the delta for the target level and applies
//! it: removals first, then the add. If the add fails after removals went
//! through, the member is left with fewer roles, never more. Every platform
//! call is bounded by a timeout.

use crate::platform::{Platform, PlatformError};
use solaris_common::error::ProgressionError;
use solaris_common::levels::{Level, LevelTable, RoleTag};
use solaris_common::member::MemberId;
use solaris_common::role_sync::{self, RoleDelta};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{call} failed for member {member}: {source}")]
    Platform {
        member: MemberId,
        call: &'static str,
        #[source]
        source: PlatformError,
    },

    #[error("{call} for member {member} timed out after {after:?}")]
    Timeout {
        member: MemberId,
        call: &'static str,
        after: Duration,
    },

    #[error(transparent)]
    Progression(#[from] ProgressionError),
}

impl SyncError {
    /// Retrying the sync step alone may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Platform { source, .. } => matches!(source, PlatformError::Transient(_)),
            SyncError::Timeout { .. } => true,
            SyncError::Progression(_) => false,
        }
    }
}

/// What one sync did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub delta: RoleDelta,
    pub removed: Vec<RoleTag>,
    pub added: Vec<RoleTag>,
    /// Tags the platform no longer knows about
    pub missing: Vec<RoleTag>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.delta.is_empty()
    }
}

pub struct RoleSynchronizer {
    platform: Arc<dyn Platform>,
    table: Arc<LevelTable>,
    timeout: Duration,
}

impl RoleSynchronizer {
    pub fn new(platform: Arc<dyn Platform>, table: Arc<LevelTable>, timeout: Duration) -> Self {
        Self {
            platform,
            table,
            timeout,
        }
    }

    /// Delta needed to bring `current` to `target`, without touching the platform
    pub fn plan(
        &self,
        current: &BTreeSet<RoleTag>,
        target: Level,
    ) -> Result<RoleDelta, ProgressionError> {
        role_sync::plan(current, target, &self.table)
    }

    async fn call<T>(
        &self,
        member: MemberId,
        call: &'static str,
        fut: impl Future<Output = Result<T, PlatformError>>,
    ) -> Result<Result<T, PlatformError>, SyncError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| SyncError::Timeout {
                member,
                call,
                after: self.timeout,
            })
    }

    /// Bring the member's roles in line with `target`
    pub async fn sync(&self, member: MemberId, target: Level) -> Result<SyncReport, SyncError> {
        let current = self
            .call(member, "get_roles", self.platform.get_roles(member))
            .await?
            .map_err(|source| SyncError::Platform {
                member,
                call: "get_roles",
                source,
            })?;

        let delta = self.plan(&current, target)?;
        let mut report = SyncReport {
            delta: delta.clone(),
            ..SyncReport::default()
        };

        if delta.is_empty() {
            debug!("member {} already holds level {} roles", member, target);
            return Ok(report);
        }

        for role in &delta.to_remove {
            match self
                .call(member, "remove_role", self.platform.remove_role(member, role))
                .await?
            {
                Ok(()) => report.removed.push(role.clone()),
                Err(PlatformError::NotFound(what)) => {
                    warn!("Cannot remove {} from member {}: {} missing", role, member, what);
                    report.missing.push(role.clone());
                }
                Err(source) => {
                    return Err(SyncError::Platform {
                        member,
                        call: "remove_role",
                        source,
                    })
                }
            }
        }

        for role in &delta.to_add {
            match self
                .call(member, "add_role", self.platform.add_role(member, role))
                .await?
            {
                Ok(()) => report.added.push(role.clone()),
                Err(PlatformError::NotFound(what)) => {
                    warn!("Cannot grant {} to member {}: {} missing", role, member, what);
                    report.missing.push(role.clone());
                }
                Err(source) => {
                    return Err(SyncError::Platform {
                        member,
                        call: "add_role",
                        source,
                    })
                }
            }
        }

        info!(
            "Synced member {} to level {}: -{} +{} ({} missing)",
            member,
            target,
            report.removed.len(),
            report.added.len(),
            report.missing.len()
        );
        Ok(report)
    }
}
