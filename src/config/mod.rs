use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default Drive upload chunk: 8 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Drive requires every non-final chunk to be a multiple of this.
pub const CHUNK_ALIGNMENT: usize = 256 * 1024;

/// Main configuration, passed by reference into every component
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub panel: PanelConfig,
    pub drive: DriveConfig,
    pub webhook: WebhookConfig,
    #[serde(rename = "workDir")]
    pub work_dir: PathBuf,
    #[serde(rename = "cleanupOnFailure")]
    pub cleanup_on_failure: bool,
    #[serde(rename = "httpTimeoutSecs")]
    pub http_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub url: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(rename = "serverId")]
    pub server_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    #[serde(rename = "folderId")]
    pub folder_id: String,
    #[serde(rename = "credentialsPath")]
    pub credentials_path: PathBuf,
    #[serde(rename = "apiBase")]
    pub api_base: String,
    #[serde(rename = "chunkSize")]
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            panel: PanelConfig::default(),
            drive: DriveConfig::default(),
            webhook: WebhookConfig::default(),
            work_dir: PathBuf::from("."),
            cleanup_on_failure: false,
            http_timeout_secs: None,
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        DriveConfig {
            folder_id: String::new(),
            credentials_path: PathBuf::from("credentials.json"),
            api_base: "https://www.googleapis.com".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl PanelConfig {
    /// Panel base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

impl DriveConfig {
    /// Chunk size rounded down to Drive's 256 KiB granularity (never below one unit)
    pub fn aligned_chunk_size(&self) -> usize {
        let units = (self.chunk_size / CHUNK_ALIGNMENT).max(1);
        units * CHUNK_ALIGNMENT
    }
}

impl Config {
    /// Standard config file locations (checked in order)
    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("pterodrive.json"),
            PathBuf::from("/etc/pterodrive/pterodrive.json"),
        ];
        if let Some(home) = dirs::home_dir() {
            paths.insert(1, home.join(".config/pterodrive/pterodrive.json"));
        }
        paths
    }

    /// Load config: defaults, then the first config file found, then `.env`
    /// and the process environment on top.
    pub fn load() -> Result<Self> {
        let mut config = Config::default();
        for path in Self::config_paths() {
            if path.exists() {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config from {}", path.display()))?;
                config = serde_json::from_str(&content)
                    .with_context(|| format!("parsing config from {}", path.display()))?;
                tracing::debug!("Loaded config file {}", path.display());
                break;
            }
        }

        // A missing .env is fine; variables already set are not overridden.
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("PTERO_PANEL_URL") {
            self.panel.url = v;
        }
        if let Some(v) = var("PTERO_API_KEY") {
            self.panel.api_key = v;
        }
        if let Some(v) = var("SERVER_ID") {
            self.panel.server_id = v;
        }
        if let Some(v) = var("DISCORD_WEBHOOK_URL") {
            self.webhook.url = v;
        }
        if let Some(v) = var("GDRIVE_FOLDER_ID") {
            self.drive.folder_id = v;
        }
        if let Some(v) = var("GDRIVE_CREDENTIALS_FILE") {
            self.drive.credentials_path = PathBuf::from(v);
        }
        if let Some(v) = var("GDRIVE_API_BASE") {
            self.drive.api_base = v;
        }
        if let Some(v) = var("GDRIVE_CHUNK_SIZE") {
            self.drive.chunk_size = v
                .trim()
                .parse()
                .with_context(|| format!("GDRIVE_CHUNK_SIZE must be a byte count, got {:?}", v))?;
        }
        if let Some(v) = var("PTERODRIVE_WORK_DIR") {
            self.work_dir = PathBuf::from(v);
        }
        if let Some(v) = var("PTERODRIVE_CLEANUP_ON_FAILURE") {
            self.cleanup_on_failure = parse_flag(&v).with_context(|| {
                format!("PTERODRIVE_CLEANUP_ON_FAILURE must be true or false, got {:?}", v)
            })?;
        }
        if let Some(v) = var("PTERODRIVE_HTTP_TIMEOUT_SECS") {
            let secs = v.trim().parse().with_context(|| {
                format!("PTERODRIVE_HTTP_TIMEOUT_SECS must be whole seconds, got {:?}", v)
            })?;
            self.http_timeout_secs = Some(secs);
        }
        Ok(())
    }

    /// Check that every required setting is present
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("PTERO_PANEL_URL", &self.panel.url),
            ("PTERO_API_KEY", &self.panel.api_key),
            ("SERVER_ID", &self.panel.server_id),
            ("DISCORD_WEBHOOK_URL", &self.webhook.url),
            ("GDRIVE_FOLDER_ID", &self.drive.folder_id),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("missing required configuration: {}", missing.join(", "));
        }
        if self.drive.chunk_size == 0 {
            anyhow::bail!("drive chunk size must be greater than zero");
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Option<std::time::Duration> {
        self.http_timeout_secs.map(std::time::Duration::from_secs)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => anyhow::bail!("unrecognized flag value {:?}", other),
    }
}
