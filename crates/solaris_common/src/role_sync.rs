//! Role delta planning.
//!
//! Given the role tags a member currently holds and the level they should
//! be at, work out which clearance tags to drop and which to grant. Only
//! tags of lower levels are ever removed; a member holding a higher tag
//! than their stored level keeps it.

use crate::error::ProgressionError;
use crate::levels::{Level, LevelTable, RoleTag};
use std::collections::BTreeSet;

/// Role changes needed to bring a member to a level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleDelta {
    pub to_remove: BTreeSet<RoleTag>,
    pub to_add: BTreeSet<RoleTag>,
}

impl RoleDelta {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }

    /// Role set after the delta is fully applied
    pub fn applied_to(&self, current: &BTreeSet<RoleTag>) -> BTreeSet<RoleTag> {
        current
            .iter()
            .filter(|tag| !self.to_remove.contains(*tag))
            .chain(self.to_add.iter())
            .cloned()
            .collect()
    }
}

/// Plan the minimal delta for `target`.
pub fn plan(
    current: &BTreeSet<RoleTag>,
    target: Level,
    table: &LevelTable,
) -> Result<RoleDelta, ProgressionError> {
    let target_tag = table.role(target)?;

    let to_remove = current
        .iter()
        .filter(|tag| matches!(table.level_of(tag), Some(level) if level < target))
        .cloned()
        .collect();

    let mut to_add = BTreeSet::new();
    if !current.contains(target_tag) {
        to_add.insert(target_tag.clone());
    }

    Ok(RoleDelta { to_remove, to_add })
}
