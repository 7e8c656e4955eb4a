//! Configuration types shared across crates.
//!
//! The server binary extracts this from an optional TOML file merged with
//! raw environment variables (`ENV`, `PORT`, `TIMEOUT`, `VERIFY`,
//! `READ_API_KEY_10M`, `READ_API_KEY_1H`, `READ_API_KEY_1D`,
//! `WRITE_API_KEY`, `CLOUD_PROVIDER`, `AWS_DEFAULT_REGION`,
//! `GCP_PROJECT_ID`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment name. Prefixes every secret name and, when
    /// equal to `local`, selects the in-memory backing store.
    #[serde(default)]
    pub env: String,
    /// HTTP listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Read/write timeout for the HTTP server and outbound calls, seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    /// Whether PUT performs a live node verification before persisting.
    #[serde(default = "default_verify")]
    pub verify: bool,
    /// CSV of `user|pass` entries granted 10-minute read tokens.
    #[serde(default)]
    pub read_api_key_10m: String,
    /// CSV of `user|pass` entries granted 1-hour read tokens.
    #[serde(default)]
    pub read_api_key_1h: String,
    /// CSV of `user|pass` entries granted 24-hour read tokens.
    #[serde(default)]
    pub read_api_key_1d: String,
    /// CSV of `user|pass` entries allowed to write, delete and verify.
    #[serde(default)]
    pub write_api_key: String,
    /// Optional cloud provider pin ("aws" or "gcp"); autodetected if unset.
    #[serde(default)]
    pub cloud_provider: Option<String>,
    /// AWS region for the secrets manager and the STS identity endpoint.
    #[serde(default = "default_region")]
    pub aws_default_region: String,
    /// GCP project id; falls back to the instance metadata server.
    #[serde(default)]
    pub gcp_project_id: Option<String>,
}

fn default_port() -> u16 {
    1339
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_verify() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: String::new(),
            port: default_port(),
            timeout: default_timeout_secs(),
            verify: default_verify(),
            read_api_key_10m: String::new(),
            read_api_key_1h: String::new(),
            read_api_key_1d: String::new(),
            write_api_key: String::new(),
            cloud_provider: None,
            aws_default_region: default_region(),
            gcp_project_id: None,
        }
    }
}

impl AppConfig {
    /// Prefix under which all secrets of this deployment are stored.
    pub fn secret_prefix(&self) -> String {
        format!("{}macaroon", self.env)
    }

    /// Whether this deployment runs against the in-memory backing store.
    pub fn is_local(&self) -> bool {
        self.env.eq_ignore_ascii_case("local")
    }

    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Create a test configuration with verification disabled.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            env: "local".to_string(),
            verify: false,
            read_api_key_10m: "reader|readerpass".to_string(),
            write_api_key: "writer|writerpass".to_string(),
            ..Default::default()
        }
    }
}
