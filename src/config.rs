use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Service configuration.
///
/// Built once at startup and handed to every component that needs it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the HTTP server listens on
    pub port: u16,
    /// Path to the SQLite registry database
    pub database_path: PathBuf,
    /// Externally reachable base URL of this service, used for webhook
    /// callbacks and sibling fan-out
    pub public_url: String,
    /// Email of the account this service writes documents as
    pub service_identity: String,
    /// Service-account key file used to mint Google access tokens. Empty
    /// falls back to `GOOGLE_APPLICATION_CREDENTIALS`, then to
    /// `google_access_token`.
    pub google_credentials_path: String,
    /// Fixed OAuth access token for the Google APIs
    pub google_access_token: String,
    pub sheets_api_url: String,
    pub drive_api_url: String,
    pub airtable_api_url: String,
    /// A1 range mirrored in every document
    pub sheet_range: String,
    /// Airtable view records are listed through; empty for none
    pub airtable_view: String,
    /// Upper bound on records fetched from one table
    pub airtable_max_records: usize,
    /// Timeout applied to every outbound request
    pub request_timeout_secs: u64,
    /// Lifetime requested for new watch channels
    pub watch_ttl_secs: u64,
    /// Channels expiring within this window are renewed
    pub renewal_margin_secs: u64,
    /// How often the renewal task runs; 0 disables it
    pub renewal_interval_secs: u64,
    /// Maximum sibling refreshes in flight at once
    pub fanout_concurrency: usize,
    /// Whether fan-out also refreshes the document that changed
    pub fanout_include_origin: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tablemirror")
                .join("registry.db"),
            public_url: "http://localhost:8080".to_string(),
            service_identity: String::new(),
            google_credentials_path: String::new(),
            google_access_token: String::new(),
            sheets_api_url: "https://sheets.googleapis.com/v4".to_string(),
            drive_api_url: "https://www.googleapis.com/drive/v3".to_string(),
            airtable_api_url: "https://api.airtable.com".to_string(),
            sheet_range: "Sheet1".to_string(),
            airtable_view: "Grid view".to_string(),
            airtable_max_records: 1000,
            request_timeout_secs: 30,
            watch_ttl_secs: 86_000,
            renewal_margin_secs: 3600,
            renewal_interval_secs: 900,
            fanout_concurrency: 8,
            fanout_include_origin: true,
        }
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            config = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
        }

        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        env_override("TABLEMIRROR_PORT", &mut self.port)?;
        env_override("TABLEMIRROR_DATABASE_PATH", &mut self.database_path)?;
        env_override("TABLEMIRROR_PUBLIC_URL", &mut self.public_url)?;
        env_override("TABLEMIRROR_SERVICE_IDENTITY", &mut self.service_identity)?;
        env_override(
            "TABLEMIRROR_GOOGLE_CREDENTIALS_PATH",
            &mut self.google_credentials_path,
        )?;
        env_override(
            "TABLEMIRROR_GOOGLE_ACCESS_TOKEN",
            &mut self.google_access_token,
        )?;
        env_override("TABLEMIRROR_SHEETS_API_URL", &mut self.sheets_api_url)?;
        env_override("TABLEMIRROR_DRIVE_API_URL", &mut self.drive_api_url)?;
        env_override("TABLEMIRROR_AIRTABLE_API_URL", &mut self.airtable_api_url)?;
        env_override("TABLEMIRROR_SHEET_RANGE", &mut self.sheet_range)?;
        env_override("TABLEMIRROR_AIRTABLE_VIEW", &mut self.airtable_view)?;
        env_override(
            "TABLEMIRROR_AIRTABLE_MAX_RECORDS",
            &mut self.airtable_max_records,
        )?;
        env_override(
            "TABLEMIRROR_REQUEST_TIMEOUT_SECS",
            &mut self.request_timeout_secs,
        )?;
        env_override("TABLEMIRROR_WATCH_TTL_SECS", &mut self.watch_ttl_secs)?;
        env_override(
            "TABLEMIRROR_RENEWAL_MARGIN_SECS",
            &mut self.renewal_margin_secs,
        )?;
        env_override(
            "TABLEMIRROR_RENEWAL_INTERVAL_SECS",
            &mut self.renewal_interval_secs,
        )?;
        env_override(
            "TABLEMIRROR_FANOUT_CONCURRENCY",
            &mut self.fanout_concurrency,
        )?;
        env_override(
            "TABLEMIRROR_FANOUT_INCLUDE_ORIGIN",
            &mut self.fanout_include_origin,
        )?;
        Ok(())
    }

    /// Default config file path: ~/.config/tablemirror/config.yaml
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tablemirror")
            .join("config.yaml")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Address Drive posts change notifications to.
    pub fn callback_address(&self) -> String {
        format!("{}/notifications", self.public_url.trim_end_matches('/'))
    }

    /// Address siblings are refreshed through.
    pub fn refresh_address(&self) -> String {
        format!("{}/refresh", self.public_url.trim_end_matches('/'))
    }
}

fn env_override<T: FromStr>(name: &'static str, target: &mut T) -> Result<(), ConfigError> {
    if let Ok(raw) = std::env::var(name) {
        *target = raw
            .parse()
            .map_err(|_| ConfigError::InvalidEnv(name, raw.clone()))?;
    }
    Ok(())
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidEnv(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    e
                )
            }
            ConfigError::InvalidEnv(name, value) => {
                write!(f, "Invalid value for {}: '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
