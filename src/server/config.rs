//! Configuration types and constants for the hearth server.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::backend::Settings;
use crate::clock::HOUR_MS;
use crate::objects::DEFAULT_MAX_UPLOAD_BYTES;

pub(crate) const MAX_WS_CONNECTIONS: usize = 64;
pub(crate) const CONFIG_FILE: &str = "config.toml";
/// Upper bound on list endpoints' `limit` query parameter.
pub(crate) const MAX_PAGE_SIZE: u32 = 200;

/// Social backend: profiles, follows, direct messaging, stories and notes.
///
/// Configuration can be set via CLI arguments or environment variables.
/// CLI arguments take precedence over environment variables.
#[derive(Parser, Debug, Default)]
#[command(name = "hearth", version, about)]
pub struct Cli {
    /// HTTP server bind address [env: HEARTH_BIND] [default: 127.0.0.1:3000]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Data directory for the database and stored objects [env: HEARTH_HOME] [default: ~/.hearth]
    #[arg(long, short = 'd')]
    pub data_dir: Option<PathBuf>,

    /// Base URL used when building public object URLs [env: HEARTH_PUBLIC_URL] [default: http://{bind}]
    #[arg(long, short = 'u')]
    pub public_url: Option<String>,
}

/// Optional `{data_dir}/config.toml`. Every key may be omitted.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// Handles granted the admin role at startup.
    pub admin_handles: Vec<String>,
    pub email_domain: String,
    pub story_ttl_hours: u64,
    pub note_ttl_hours: u64,
    pub max_upload_bytes: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            admin_handles: Vec::new(),
            email_domain: settings.email_domain,
            story_ttl_hours: settings.story_ttl_ms / HOUR_MS,
            note_ttl_hours: settings.note_ttl_ms / HOUR_MS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl FileConfig {
    /// Load from `data_dir`, falling back to defaults if the file is absent.
    pub fn load(data_dir: &Path) -> Result<Self, String> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        toml::from_str(&contents).map_err(|e| format!("failed to parse {}: {e}", path.display()))
    }

    pub fn settings(&self) -> Settings {
        Settings {
            email_domain: self.email_domain.clone(),
            story_ttl_ms: self.story_ttl_hours.max(1) * HOUR_MS,
            note_ttl_ms: self.note_ttl_hours.max(1) * HOUR_MS,
        }
    }
}

pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub public_url: String,
}

impl Config {
    pub fn from_cli_and_env(cli: Cli) -> Self {
        let data_dir = cli
            .data_dir
            .or_else(|| std::env::var("HEARTH_HOME").ok().map(PathBuf::from))
            .unwrap_or_else(|| {
                std::env::var("HOME")
                    .map(|h| PathBuf::from(h).join(".hearth"))
                    .unwrap_or_else(|_| PathBuf::from(".hearth"))
            });

        let bind_addr = cli
            .bind
            .or_else(|| std::env::var("HEARTH_BIND").ok())
            .unwrap_or_else(|| "127.0.0.1:3000".to_string());

        let public_url = cli
            .public_url
            .or_else(|| std::env::var("HEARTH_PUBLIC_URL").ok())
            .unwrap_or_else(|| format!("http://{bind_addr}"));

        Self {
            bind_addr,
            data_dir,
            public_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_values_win() {
        let config = Config::from_cli_and_env(Cli {
            bind: Some("0.0.0.0:8080".into()),
            data_dir: Some(PathBuf::from("/tmp/hearth-test")),
            public_url: None,
        });
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/hearth-test"));
        assert_eq!(config.public_url, "http://0.0.0.0:8080");
    }

    #[test]
    fn test_file_config_defaults_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(FileConfig::load(dir.path()).unwrap(), FileConfig::default());

        fs::write(
            dir.path().join(CONFIG_FILE),
            "admin_handles = [\"root\"]\nstory_ttl_hours = 12\n",
        )
        .unwrap();
        let cfg = FileConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.admin_handles, vec!["root".to_string()]);
        let settings = cfg.settings();
        assert_eq!(settings.story_ttl_ms, 12 * HOUR_MS);
        assert_eq!(settings.note_ttl_ms, 24 * HOUR_MS);
        assert_eq!(settings.email_domain, "hearth.local");

        fs::write(dir.path().join(CONFIG_FILE), "story_ttl_hours = \"soon\"").unwrap();
        assert!(FileConfig::load(dir.path()).is_err());
    }
}
