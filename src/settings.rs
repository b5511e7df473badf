use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::DB_FILE;
use crate::error::{IngestError, Result};
use crate::models::DecodeOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    /// Location dimension of every stored key.
    #[serde(default = "default_store_id")]
    pub store_id: String,
    #[serde(default)]
    pub import: DecodeOptions,
}

fn default_store_id() -> String {
    "沈阳超级仓".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            store_id: default_store_id(),
            import: DecodeOptions::default(),
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("sheetledger")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("sheetledger")
}

/// Missing settings fall back to defaults; a malformed file is reported and ignored.
pub fn load_settings() -> Settings {
    let Ok(content) = std::fs::read_to_string(settings_path()) else {
        return Settings::default();
    };
    parse_settings(&content)
}

fn parse_settings(content: &str) -> Settings {
    serde_json::from_str(content).unwrap_or_else(|e| {
        warn!("ignoring malformed settings file: {e}");
        Settings::default()
    })
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| IngestError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

/// Database path: the `--db` override when given, else the configured data dir.
pub fn db_path(settings: &Settings, override_path: Option<&str>) -> PathBuf {
    match override_path {
        Some(p) => PathBuf::from(shellexpand_path(p)),
        None => PathBuf::from(&settings.data_dir).join(DB_FILE),
    }
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
