//! Server configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for
//! production. Precedence: env vars > .env file > config.toml > defaults.

use std::sync::OnceLock;
use std::time::Duration;

use palaver_core::RoomConfig;
use serde::Deserialize;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG
        .get()
        .expect("Config not initialized. Call config::init() first.")
}

/// Initialize the global configuration from the environment.
///
/// Call once at startup, before anything else reads config.
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        // Defaults
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8090)?
        .set_default("auth.allowed_origins", "")?
        .set_default("rooms.max_participants", 100)?
        .set_default("rooms.max_chat_history_len", 100)?
        .set_default("rooms.max_chat_history_bytes", 1_048_576)?
        .set_default("rooms.cleanup_grace_secs", 5)?
        .set_default("rooms.outbound_queue_capacity", 256)?
        .set_default("rooms.write_deadline_secs", 10)?
        .set_default("rooms.shutdown_timeout_secs", 5)?
        // Optional config file
        .add_source(config::File::with_name("config").required(false))
        // Environment variables (PALAVER__SERVER__HOST, PALAVER__AUTH__JWT_SECRET, ...)
        .add_source(
            config::Environment::with_prefix("PALAVER")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub sfu: SfuConfig,
    pub rooms: RoomsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// JWT signing secret (HS256) — should be 256+ bits of entropy.
    pub jwt_secret: String,
    /// Comma-separated Origin allow-list; empty allows every origin.
    pub allowed_origins: String,
}

impl AuthConfig {
    pub fn origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BusConfig {
    /// Redis connection URL — omit for single-instance, in-process fan-out.
    pub redis_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SfuConfig {
    /// Base HTTP URL of the SFU's session API — omit to run signaling-only.
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoomsConfig {
    pub max_participants: usize,
    pub max_chat_history_len: usize,
    pub max_chat_history_bytes: usize,
    pub cleanup_grace_secs: u64,
    pub outbound_queue_capacity: usize,
    pub write_deadline_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl RoomsConfig {
    pub fn to_room_config(&self) -> RoomConfig {
        RoomConfig {
            max_participants: self.max_participants,
            max_chat_history_len: self.max_chat_history_len,
            max_chat_history_bytes: self.max_chat_history_bytes,
            cleanup_grace: Duration::from_secs(self.cleanup_grace_secs),
            outbound_queue_capacity: self.outbound_queue_capacity,
            write_deadline: Duration::from_secs(self.write_deadline_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_parse_and_trim() {
        let auth = AuthConfig {
            jwt_secret: "s".into(),
            allowed_origins: "https://a.example, https://b.example ,".into(),
        };
        assert_eq!(
            auth.origins(),
            vec!["https://a.example".to_owned(), "https://b.example".to_owned()]
        );

        let open = AuthConfig {
            jwt_secret: "s".into(),
            allowed_origins: String::new(),
        };
        assert!(open.origins().is_empty());
    }
}
