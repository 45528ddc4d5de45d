//! Configuration management for solarisd.
//!
//! Loads settings from /etc/solaris/config.toml or uses defaults.
//! The level ladder is part of the config and is validated once at start-up.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use solaris_common::levels::{LevelDefinition, LevelTable, DEFAULT_LEVELS};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/solaris/config.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/solaris/config.toml";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// SQLite file holding member progression
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// tracing filter used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Points awarded per activity message
    #[serde(default = "default_points_per_message")]
    pub points_per_message: i64,

    /// Timeout for each platform call (get/add/remove role)
    #[serde(default = "default_platform_timeout")]
    pub platform_timeout_ms: u64,

    /// Idle time before a member's queue task exits
    #[serde(default = "default_actor_idle")]
    pub actor_idle_secs: u64,

    /// Attempts for a store transaction or role sync before giving up
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// First retry delay, doubled on every attempt
    #[serde(default = "default_retry_base")]
    pub retry_base_ms: u64,

    /// Run the reconciliation sweep on start-up
    #[serde(default = "default_reconcile_on_start")]
    pub reconcile_on_start: bool,
}

fn default_database_path() -> String {
    "/var/lib/solaris/solaris.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_points_per_message() -> i64 {
    1
}

fn default_platform_timeout() -> u64 {
    5_000
}

fn default_actor_idle() -> u64 {
    300
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base() -> u64 {
    200
}

fn default_reconcile_on_start() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: default_log_level(),
            points_per_message: default_points_per_message(),
            platform_timeout_ms: default_platform_timeout(),
            actor_idle_secs: default_actor_idle(),
            retry_attempts: default_retry_attempts(),
            retry_base_ms: default_retry_base(),
            reconcile_on_start: default_reconcile_on_start(),
        }
    }
}

impl DaemonConfig {
    pub fn platform_timeout(&self) -> Duration {
        Duration::from_millis(self.platform_timeout_ms)
    }

    pub fn actor_idle(&self) -> Duration {
        Duration::from_secs(self.actor_idle_secs)
    }
}

/// Onboarding and verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingConfig {
    /// Reaction that counts as verification
    #[serde(default = "default_verification_emoji")]
    pub verification_emoji: String,

    /// Direct message sent to new members
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,

    /// Text of the verification prompt posted once
    #[serde(default = "default_verification_prompt")]
    pub verification_prompt: String,
}

fn default_verification_emoji() -> String {
    "✅".to_string()
}

fn default_welcome_message() -> String {
    "Welcome to Project: SOLARIS, Recruit.\n\n\
     **Directive 01:** Report to #verification for clearance processing. \
     Section 31 protocols are now in effect. Discretion is mandatory."
        .to_string()
}

fn default_verification_prompt() -> String {
    "React with ✅ to verify and gain CL-1: Initiate clearance.".to_string()
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            verification_emoji: default_verification_emoji(),
            welcome_message: default_welcome_message(),
            verification_prompt: default_verification_prompt(),
        }
    }
}

/// Promotion announcement settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceConfig {
    /// Channel the announcement goes to
    #[serde(default = "default_announce_channel")]
    pub channel: String,

    /// `{member}` and `{rank}` are substituted
    #[serde(default = "default_announce_template")]
    pub template: String,
}

fn default_announce_channel() -> String {
    "announcements".to_string()
}

fn default_announce_template() -> String {
    "**Promotion Alert:** {member} has been elevated to {rank}!".to_string()
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            channel: default_announce_channel(),
            template: default_announce_template(),
        }
    }
}

impl AnnounceConfig {
    pub fn render(&self, member: &str, rank: &str) -> String {
        self.template
            .replace("{member}", member)
            .replace("{rank}", rank)
    }
}

fn default_levels() -> Vec<LevelDefinition> {
    DEFAULT_LEVELS
        .iter()
        .map(|(name, threshold)| LevelDefinition::new(name, *threshold))
        .collect()
}

/// Full daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub onboarding: OnboardingConfig,

    #[serde(default)]
    pub announce: AnnounceConfig,

    /// Clearance ladder, level 0 first
    #[serde(default = "default_levels")]
    pub levels: Vec<LevelDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            onboarding: OnboardingConfig::default(),
            announce: AnnounceConfig::default(),
            levels: default_levels(),
        }
    }
}

impl Config {
    /// Load config from file, or return defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(DEFAULT_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                Config::default()
            })
    }

    /// Load config from specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save default config to path (for init)
    pub fn save_default(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(&Config::default())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        info!("Saved default config to {}", path.display());
        Ok(())
    }

    /// Validated level table
    pub fn level_table(&self) -> Result<LevelTable> {
        LevelTable::new(self.levels.clone()).context("invalid [[levels]] configuration")
    }

    /// Start-up checks beyond what serde enforces
    pub fn validate(&self) -> Result<LevelTable> {
        if self.daemon.points_per_message < 0 {
            bail!(
                "daemon.points_per_message must be non-negative, got {}",
                self.daemon.points_per_message
            );
        }
        if self.daemon.retry_attempts == 0 {
            bail!("daemon.retry_attempts must be at least 1");
        }
        self.level_table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.daemon.points_per_message, 1);
        assert_eq!(config.daemon.platform_timeout(), Duration::from_secs(5));
        assert_eq!(config.onboarding.verification_emoji, "✅");
        let table = config.level_table().unwrap();
        assert_eq!(table.max_level(), 10);
        assert_eq!(table.threshold(10).unwrap(), 5500);
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[daemon]
database_path = "/tmp/solaris-test.db"
points_per_message = 5

[[levels]]
name = "Recruit"
threshold = 0

[[levels]]
name = "Initiate"
role = "112233445566"
threshold = 50
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.daemon.database_path, "/tmp/solaris-test.db");
        assert_eq!(config.daemon.points_per_message, 5);
        // Defaults for missing fields
        assert_eq!(config.daemon.retry_attempts, 3);
        assert_eq!(config.announce.channel, "announcements");

        let table = config.level_table().unwrap();
        assert_eq!(table.max_level(), 1);
        assert_eq!(table.role(1).unwrap().as_str(), "112233445566");
        assert_eq!(table.role(0).unwrap().as_str(), "Recruit");
    }

    #[test]
    fn test_invalid_ladder_rejected() {
        let toml_str = r#"
[[levels]]
name = "Recruit"
threshold = 10
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.level_table().is_err());
    }

    #[test]
    fn test_negative_points_per_message_rejected() {
        let toml_str = r#"
[daemon]
points_per_message = -3
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("points_per_message"));

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_announce_render() {
        let announce = AnnounceConfig::default();
        assert_eq!(
            announce.render("<@1>", "CL-1: Initiate"),
            "**Promotion Alert:** <@1> has been elevated to CL-1: Initiate!"
        );
    }

    #[test]
    fn test_save_default_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etc").join("config.toml");
        Config::save_default(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.levels.len(), 11);
        assert_eq!(loaded.daemon.database_path, default_database_path());
    }
}
