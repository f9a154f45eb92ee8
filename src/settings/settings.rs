use anyhow::{Result, anyhow};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub api: Api,
    pub session: Session,
    pub realtime: Realtime,
    pub log: Log,
}

#[derive(Debug, Deserialize)]
pub struct Api {
    pub base_url: Url,
    pub refresh_path: String,
    pub logout_path: String,
}

#[derive(Debug, Deserialize)]
pub struct Session {
    pub backend: String, // "file" or "memory"
    pub storage_path: String,
    pub expiry_buffer_secs: u64,
}

impl Session {
    pub fn expiry_buffer(&self) -> Duration {
        Duration::from_secs(self.expiry_buffer_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct Realtime {
    pub path: String,
    pub reconnect_base_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Realtime {
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

const ENV_PREFIX: &str = "TALENTBRIDGE";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .set_default("api.refresh_path", "/auth/refresh")
        .map_err(|e| anyhow!(e))?
        .set_default("api.logout_path", "/auth/logout")
        .map_err(|e| anyhow!(e))?
        .set_default("session.expiry_buffer_secs", 60)
        .map_err(|e| anyhow!(e))?
        .set_default("realtime.path", "/ws")
        .map_err(|e| anyhow!(e))?
        .set_default("realtime.reconnect_base_delay_ms", 1000)
        .map_err(|e| anyhow!(e))?
        .set_default("realtime.max_reconnect_attempts", 5)
        .map_err(|e| anyhow!(e))?
        .add_source(File::with_name(path))
        // e.g. TALENTBRIDGE__API__BASE_URL=https://api.example.com/api
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}
