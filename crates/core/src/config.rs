//! Client configuration

use crate::error::{CoreError, CoreResult};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "WEBISTREAM";

/// Name of the optional config file looked up in the data directory
pub const CONFIG_FILE_NAME: &str = "webistream.toml";

/// Settings for talking to the Webistream API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the API (without the `/v1` prefix)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Total request timeout in seconds, applied to original and retried requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// TCP + TLS connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound for a single token refresh call, in seconds
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,

    /// Route the user is sent to once the session cannot be recovered
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Credential store file, relative to the data directory unless absolute
    #[serde(default = "default_store_file")]
    pub store_file: PathBuf,
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_refresh_timeout() -> u64 {
    10
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_store_file() -> PathBuf {
    PathBuf::from("credentials.json")
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            refresh_timeout_secs: default_refresh_timeout(),
            login_path: default_login_path(),
            store_file: default_store_file(),
        }
    }
}

impl ClientConfig {
    /// Load configuration: defaults, then `path` (or `webistream.toml` in
    /// `data_dir` when it exists), then `WEBISTREAM_*` environment variables.
    pub fn load(path: Option<&Path>, data_dir: &Path) -> CoreResult<Self> {
        let mut builder = Config::builder();

        // Start with defaults
        builder = builder.add_source(Config::try_from(&ClientConfig::default())?);

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path));
            }
            None => {
                let default_path = data_dir.join(CONFIG_FILE_NAME);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path).required(false));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: ClientConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values that would otherwise only fail on first use
    pub fn validate(&self) -> CoreResult<()> {
        let url = Url::parse(&self.api_url).map_err(|e| {
            CoreError::invalid_config(format!("api_url '{}' is not a valid URL: {e}", self.api_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::invalid_config(format!(
                "api_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.refresh_timeout_secs == 0 {
            return Err(CoreError::invalid_config(
                "refresh_timeout_secs must be greater than zero",
            ));
        }
        if !self.login_path.starts_with('/') {
            return Err(CoreError::invalid_config("login_path must start with '/'"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    /// Absolute path of the credential store file
    pub fn store_path(&self, data_dir: &Path) -> PathBuf {
        if self.store_file.is_absolute() {
            self.store_file.clone()
        } else {
            data_dir.join(&self.store_file)
        }
    }
}

/// Resolve the data directory: explicit value, then `WEBISTREAM_STATE_DIR`,
/// then the platform data directory.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        if let Ok(dir) = std::env::var("WEBISTREAM_STATE_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("webistream")
        }
    })
}
