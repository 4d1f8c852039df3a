//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > config.toml > defaults

use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Initialize the global configuration from environment.
///
/// Should be called once at application startup, before any other code accesses config.
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let app_config = load(config::Config::builder())?;
    Ok(CONFIG.get_or_init(|| app_config))
}

/// Build an [`AppConfig`] from defaults plus whatever sources the builder already has,
/// followed by `config.toml` and `DUET_*` environment variables.
pub fn load(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<AppConfig, config::ConfigError> {
    let cfg = with_defaults(builder)?
        // Optional config file
        .add_source(config::File::with_name("config").required(false))
        // Environment variables (DUET_SERVER__PORT, DUET_DATABASE__URL, etc.)
        .add_source(
            config::Environment::with_prefix("DUET")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    cfg.try_deserialize()
}

fn with_defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
    builder
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("database.url", "sqlite::memory:")?
        .set_default("database.max_connections", 5)?
        .set_default("database.min_connections", 1)?
        .set_default("presence.liveness_window_secs", 10)?
        .set_default("presence.heartbeat_interval_secs", 5)?
        .set_default("presence.reaper_enabled", true)?
        .set_default("presence.reaper_interval_secs", 5)?
        .set_default("matching.poll_interval_secs", 2)?
        .set_default("matching.max_claim_attempts", 3)?
        .set_default("matching.avoid_repeat_partners", false)?
        .set_default("matching.repeat_partner_window_secs", 300)?
        .set_default("signaling.poll_interval_ms", 500)?
        .set_default("signaling.max_payload_bytes", 65_536)? // 64 KiB
        .set_default("signaling.retain_after_end_secs", 60)?
        .set_default("moderation.report_threshold", 3)?
        .set_default("moderation.blacklist_ttl_secs", 0) // 0 = permanent
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub presence: PresenceConfig,
    pub matching: MatchingConfig,
    pub signaling: SignalingConfig,
    pub moderation: ModerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// sqlx connection URL, or `memory` for the in-process store
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PresenceConfig {
    /// A session whose last heartbeat is older than this is stale
    pub liveness_window_secs: u64,
    /// Advertised to clients; the server never enforces it
    pub heartbeat_interval_secs: u64,
    pub reaper_enabled: bool,
    pub reaper_interval_secs: u64,
}

impl PresenceConfig {
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    /// Advertised match-seek poll interval
    pub poll_interval_secs: u64,
    /// Claim attempts per `find_peer_and_match` call before deferring to the next tick
    pub max_claim_attempts: u32,
    pub avoid_repeat_partners: bool,
    pub repeat_partner_window_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignalingConfig {
    /// Advertised signal poll interval
    pub poll_interval_ms: u64,
    pub max_payload_bytes: usize,
    /// How long a match's signal log survives after the match ends
    pub retain_after_end_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModerationConfig {
    /// Distinct reporters needed before both sides are blacklisted
    pub report_threshold: u32,
    /// Blacklist entry lifetime; 0 keeps entries for as long as the store does
    pub blacklist_ttl_secs: u64,
}
