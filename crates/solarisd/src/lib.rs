//! Solaris daemon library - exposes modules for testing.

pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod handler;
pub mod notifier;
pub mod platform;
pub mod retry;
pub mod synchronizer;
