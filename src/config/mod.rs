//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::auth::{StoredToken, TokenStore};
use crate::models::UserIdentity;

const DEFAULT_API_URL: &str = "http://localhost:8080";
const LIVE_FEED_PATH: &str = "/ws/chat";

/// History page size used when none is configured
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Application configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backend base URL, e.g. `https://api.example-cars.com`
    pub api_url: Option<String>,
    /// Live feed WebSocket URL; derived from `api_url` when unset
    pub live_url: Option<String>,
    /// Messages per history page
    pub page_size: Option<u32>,
    /// Stored bearer token
    pub access_token: Option<StoredToken>,
    /// Identity of the logged-in user
    pub user: Option<UserIdentity>,
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "carmarket", "carmarket-chat")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    pub fn api_url(&self) -> String {
        self.api_url
            .as_deref()
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
            .to_string()
    }

    /// Live feed endpoint, `ws(s)://<api host>/ws/chat` unless overridden.
    pub fn live_url(&self) -> String {
        if let Some(ref url) = self.live_url {
            return url.clone();
        }
        let api = self.api_url();
        let ws = api
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}{}", ws, LIVE_FEED_PATH)
    }

    pub fn page_size(&self) -> u32 {
        match self.page_size {
            Some(0) | None => DEFAULT_PAGE_SIZE,
            Some(n) => n,
        }
    }
}

impl TokenStore for Config {
    fn get_access_token(&self) -> Option<StoredToken> {
        self.access_token.clone()
    }

    fn set_access_token(&mut self, token: String, expires_in: Option<u64>) {
        self.access_token = Some(StoredToken::new(token, expires_in));
    }

    fn clear_tokens(&mut self) {
        self.access_token = None;
        self.user = None;
    }
}
