//! Solaris common library.
//!
//! Data model, level table, pure progression rules, role-delta planning and
//! the progression store shared by the daemon and its tests.

pub mod error;
pub mod levels;
pub mod member;
pub mod progression;
pub mod role_sync;
pub mod store;

pub use error::{ProgressionError, StoreError};
pub use levels::{Level, LevelDefinition, LevelTable, RoleTag};
pub use member::{Dossier, MemberId, MemberRecord};
pub use progression::LevelChange;
pub use role_sync::RoleDelta;
pub use store::{Commit, Mutation, ProgressionStore};
