//! Member progression records.

use crate::levels::{Level, LevelTable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Points ceiling; the store keeps points in a signed 64-bit column
pub const MAX_POINTS: u64 = i64::MAX as u64;

/// Platform-assigned member identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub u64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MemberId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Persisted progression state for one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub member_id: MemberId,
    /// Accumulated activity points (never decreases, capped at `MAX_POINTS`)
    pub points: u64,
    /// Current clearance level (never decreases)
    pub level: Level,
    /// Last level whose role sync and announcement completed
    pub synced_level: Option<Level>,
    pub updated_at: DateTime<Utc>,
}

impl MemberRecord {
    /// Zero-valued record for a member seen for the first time
    pub fn new(member_id: MemberId) -> Self {
        Self {
            member_id,
            points: 0,
            level: 0,
            synced_level: None,
            updated_at: Utc::now(),
        }
    }

    /// Roles or announcement still owed for the current level
    pub fn needs_sync(&self) -> bool {
        self.synced_level != Some(self.level)
    }
}

/// Read-only progression summary for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dossier {
    pub member_id: MemberId,
    pub points: u64,
    pub level: Level,
    pub rank: String,
    pub role: String,
    /// None at the top of the ladder
    pub next_threshold: Option<u64>,
    pub points_to_next: Option<u64>,
}

impl Dossier {
    pub fn from_record(record: &MemberRecord, table: &LevelTable) -> Self {
        let level = record.level.min(table.max_level());
        let next_threshold = table.threshold(level + 1).ok();
        Self {
            member_id: record.member_id,
            points: record.points,
            level: record.level,
            rank: table.name(level).unwrap_or("Unknown").to_string(),
            role: table
                .role(level)
                .map(|r| r.to_string())
                .unwrap_or_default(),
            next_threshold,
            points_to_next: next_threshold.map(|t| t.saturating_sub(record.points)),
        }
    }
}

impl fmt::Display for Dossier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dossier: {}", self.member_id)?;
        writeln!(f, "  Clearance Level: CL-{}", self.level)?;
        writeln!(f, "  Rank:            {}", self.rank)?;
        write!(f, "  XP:              {}", self.points)?;
        if let (Some(next), Some(left)) = (self.next_threshold, self.points_to_next) {
            write!(f, " ({} to go for {})", left, next)?;
        }
        Ok(())
    }
}
