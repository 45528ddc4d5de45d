//! Clearance level table.
//!
//! Maps every level index to a display name, an external role tag and the
//! cumulative points needed to reach it. Built once from configuration,
//! validated, then shared read-only.

use crate::error::ProgressionError;
use crate::member::MAX_POINTS;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Clearance level index
pub type Level = u32;

/// External role identifier bound to one level
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleTag(pub String);

impl RoleTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the level table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDefinition {
    /// Display name ("CL-3: Agent")
    pub name: String,

    /// Role tag on the platform. Defaults to the display name.
    #[serde(default)]
    pub role: Option<RoleTag>,

    /// Cumulative points required to reach this level
    pub threshold: u64,
}

impl LevelDefinition {
    pub fn new(name: &str, threshold: u64) -> Self {
        Self {
            name: name.to_string(),
            role: None,
            threshold,
        }
    }

    pub fn role_tag(&self) -> RoleTag {
        self.role
            .clone()
            .unwrap_or_else(|| RoleTag::new(self.name.clone()))
    }
}

/// Stock clearance ladder: (name, threshold)
pub const DEFAULT_LEVELS: &[(&str, u64)] = &[
    ("CL-0: Recruit", 0),
    ("CL-1: Initiate", 100),
    ("CL-2: Asset", 300),
    ("CL-3: Agent", 600),
    ("CL-4: Field Agent", 1000),
    ("CL-5: Senior Agent", 1500),
    ("CL-6: Special Operative", 2100),
    ("CL-7: Handler", 2800),
    ("CL-8: Intelligence Officer", 3600),
    ("CL-9: Shadow Commander", 4500),
    ("CL-10: Control", 5500),
];

/// Validated, immutable level table
#[derive(Debug, Clone)]
pub struct LevelTable {
    levels: Vec<LevelDefinition>,
    roles: Vec<RoleTag>,
}

impl LevelTable {
    /// Build a table, enforcing threshold(0) = 0, strictly increasing
    /// thresholds and one distinct role tag per level.
    pub fn new(levels: Vec<LevelDefinition>) -> Result<Self, ProgressionError> {
        let first = levels
            .first()
            .ok_or_else(|| ProgressionError::InvalidTable("no levels defined".into()))?;
        if first.threshold != 0 {
            return Err(ProgressionError::InvalidTable(format!(
                "level 0 threshold must be 0, got {}",
                first.threshold
            )));
        }

        for (idx, pair) in levels.windows(2).enumerate() {
            if pair[1].threshold <= pair[0].threshold {
                return Err(ProgressionError::InvalidTable(format!(
                    "threshold for level {} ({}) must exceed level {} ({})",
                    idx + 1,
                    pair[1].threshold,
                    idx,
                    pair[0].threshold
                )));
            }
        }

        if let Some(last) = levels.last().filter(|def| def.threshold > MAX_POINTS) {
            return Err(ProgressionError::InvalidTable(format!(
                "threshold {} exceeds the points ceiling {}",
                last.threshold, MAX_POINTS
            )));
        }

        let roles: Vec<RoleTag> = levels.iter().map(LevelDefinition::role_tag).collect();
        for (idx, role) in roles.iter().enumerate() {
            if roles[..idx].contains(role) {
                return Err(ProgressionError::InvalidTable(format!(
                    "role tag '{}' is mapped to more than one level",
                    role
                )));
            }
        }

        Ok(Self { levels, roles })
    }

    pub fn max_level(&self) -> Level {
        (self.levels.len() - 1) as Level
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Reject a level that does not exist in this table
    pub fn check(&self, level: Level) -> Result<Level, ProgressionError> {
        if level > self.max_level() {
            return Err(ProgressionError::LevelOutOfRange {
                level,
                max: self.max_level(),
            });
        }
        Ok(level)
    }

    pub fn threshold(&self, level: Level) -> Result<u64, ProgressionError> {
        self.check(level)?;
        Ok(self.levels[level as usize].threshold)
    }

    pub fn name(&self, level: Level) -> Result<&str, ProgressionError> {
        self.check(level)?;
        Ok(&self.levels[level as usize].name)
    }

    pub fn role(&self, level: Level) -> Result<&RoleTag, ProgressionError> {
        self.check(level)?;
        Ok(&self.roles[level as usize])
    }

    /// Reverse lookup; None for tags outside the ladder
    pub fn level_of(&self, role: &RoleTag) -> Option<Level> {
        self.roles.iter().position(|r| r == role).map(|i| i as Level)
    }

    /// Largest level whose threshold is met, clamped to the top level
    pub fn level_for_points(&self, points: u64) -> Level {
        // thresholds are sorted and threshold(0) == 0, so the partition point is >= 1
        let reached = self.levels.partition_point(|def| def.threshold <= points);
        (reached.max(1) - 1) as Level
    }
}

impl Default for LevelTable {
    fn default() -> Self {
        let levels = DEFAULT_LEVELS
            .iter()
            .map(|(name, threshold)| LevelDefinition::new(name, *threshold))
            .collect();
        Self::new(levels).unwrap_or_else(|e| unreachable!("stock level table is valid: {}", e))
    }
}
