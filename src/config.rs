use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Limits applied to every impostor room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpostorLimits {
    /// Also the number of Players a room admits.
    pub max_videos: usize,
    pub max_duration_ms: u64,
}

impl Default for ImpostorLimits {
    fn default() -> Self {
        Self {
            max_videos: 5,
            max_duration_ms: 3000,
        }
    }
}

/// Server configuration loaded from server.json.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Origin allowed by CORS.
    pub client_url: String,
    /// Upper bound on one WebSocket message; videos travel inline.
    pub max_message_bytes: usize,
    pub impostor: ImpostorLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            client_url: "http://localhost:5173".to_string(),
            max_message_bytes: 50_000_000,
            impostor: ImpostorLimits::default(),
        }
    }
}

/// Resolves a path relative to the config directory.
fn config_path(sub: &str) -> PathBuf {
    let base = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
    Path::new(&base).join(sub)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ConfigError + '_ {
    move |source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Initialize config directory with defaults if missing.
pub fn init() -> Result<(), ConfigError> {
    let base = config_path("");
    if !base.exists() {
        fs::create_dir_all(&base).map_err(io_error(&base))?;
    }

    let path = config_path("server.json");
    if !path.exists() {
        let json = serde_json::to_string_pretty(&ServerConfig::default()).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(&path, json).map_err(io_error(&path))?;
        tracing::info!("Wrote default config to {}", path.display());
    }
    Ok(())
}

/// Load server.json and apply environment overrides.
pub fn load() -> Result<ServerConfig, ConfigError> {
    let path = config_path("server.json");
    let data = fs::read_to_string(&path).map_err(io_error(&path))?;
    let config = parse(&data).map_err(|source| ConfigError::Json {
        path: path.display().to_string(),
        source,
    })?;
    apply_env(config, |var| std::env::var(var).ok())
}

fn parse(data: &str) -> Result<ServerConfig, serde_json::Error> {
    serde_json::from_str(data)
}

/// `PORT` and `CLIENT_URL` win over the file.
fn apply_env(
    mut config: ServerConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ServerConfig, ConfigError> {
    if let Some(port) = lookup("PORT") {
        config.port = port.parse().map_err(|_| ConfigError::Env {
            var: "PORT",
            value: port.clone(),
        })?;
    }
    if let Some(url) = lookup("CLIENT_URL") {
        config.client_url = url;
    }
    Ok(config)
}
