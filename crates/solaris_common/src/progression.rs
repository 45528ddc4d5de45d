//! Progression rules.
//!
//! Pure functions from a member record plus an input to the next record.
//! The store runs them inside its read-modify-write transaction, so they
//! must stay deterministic: retrying with the same stored record yields the
//! same result.

use crate::error::ProgressionError;
use crate::levels::{Level, LevelTable};
use crate::member::{MemberId, MemberRecord, MAX_POINTS};
use chrono::Utc;

/// Level before and after one committed update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub member_id: MemberId,
    pub old_level: Level,
    pub new_level: Level,
    pub points: u64,
}

impl LevelChange {
    pub fn between(before: &MemberRecord, after: &MemberRecord) -> Self {
        Self {
            member_id: after.member_id,
            old_level: before.level,
            new_level: after.level,
            points: after.points,
        }
    }

    pub fn promoted(&self) -> bool {
        self.new_level > self.old_level
    }
}

/// Add activity points and recompute the level.
///
/// Negative deltas are rejected. Points saturate at `MAX_POINTS`. The level
/// never drops below the stored one, and clamps at the top of the table.
pub fn apply_activity(
    record: &MemberRecord,
    delta: i64,
    table: &LevelTable,
) -> Result<MemberRecord, ProgressionError> {
    if delta < 0 {
        return Err(ProgressionError::NegativeDelta(delta));
    }
    table.check(record.level)?;

    let points = record.points.saturating_add(delta as u64).min(MAX_POINTS);
    let level = table.level_for_points(points).max(record.level);

    Ok(MemberRecord {
        points,
        level,
        updated_at: Utc::now(),
        ..record.clone()
    })
}

/// One-shot promotion from level 0 to level 1.
///
/// Returns `None` when the member is past level 0 (or the table has no
/// level 1), so repeated reactions promote at most once. Points are lifted
/// to the level 1 threshold so the level still matches the points.
pub fn apply_verification(
    record: &MemberRecord,
    table: &LevelTable,
) -> Result<Option<MemberRecord>, ProgressionError> {
    table.check(record.level)?;
    if record.level != 0 {
        return Ok(None);
    }
    let threshold = match table.threshold(1) {
        Ok(t) => t,
        Err(_) => return Ok(None),
    };

    let points = record.points.max(threshold);
    Ok(Some(MemberRecord {
        points,
        level: table.level_for_points(points).max(1),
        updated_at: Utc::now(),
        ..record.clone()
    }))
}

/// Whether the stored level agrees with the stored points
pub fn is_consistent(record: &MemberRecord, table: &LevelTable) -> bool {
    record.level == table.level_for_points(record.points)
}
