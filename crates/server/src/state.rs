//! Application state shared across handlers.

use crate::index::Index;
use crate::presign::PresignVerifier;
use crate::verify::NodeVerifier;
use anyhow::bail;
use lnvault_core::{AppConfig, DELIMITER, USER_PASS_SEPARATOR};
use lnvault_storage::SecretStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Read tier granted to principals not listed in any tier.
pub const DEFAULT_READ_DURATION: Duration = Duration::from_secs(10 * 60);

/// Credential maps split by route class.
#[derive(Debug, Default)]
pub struct RouteCredentials {
    /// user -> password for `/get/` routes.
    pub read: HashMap<String, String>,
    /// user -> password for `/put/` and `/verify/` routes.
    pub write: HashMap<String, String>,
    /// Union of read and write, for `/query/` routes.
    pub query: HashMap<String, String>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Backing-store driver.
    pub storage: Arc<dyn SecretStore>,
    /// The in-memory credential index.
    pub index: Arc<Index>,
    /// Per-route-class credential maps.
    pub credentials: Arc<RouteCredentials>,
    /// Read-duration tier per authenticated user.
    pub read_durations: Arc<HashMap<String, Duration>>,
    /// IAM presign verifier.
    pub presign: Arc<PresignVerifier>,
    /// Live node verifier.
    pub verifier: Arc<dyn NodeVerifier>,
    /// Secret-name prefix of this deployment (`<env>macaroon`).
    pub prefix: String,
}

impl AppState {
    /// Create the application state, parsing and validating the configured
    /// API keys.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn SecretStore>,
        verifier: Arc<dyn NodeVerifier>,
    ) -> anyhow::Result<Self> {
        let mut read = HashMap::new();
        let mut read_durations = HashMap::new();

        let tiers = [
            (&config.read_api_key_10m, Duration::from_secs(10 * 60)),
            (&config.read_api_key_1h, Duration::from_secs(60 * 60)),
            (&config.read_api_key_1d, Duration::from_secs(24 * 60 * 60)),
        ];
        for (csv, duration) in tiers {
            for (user, pass) in parse_credentials(csv) {
                if read.insert(user.clone(), pass).is_some() {
                    bail!("keys are not unique");
                }
                read_durations.insert(user, duration);
            }
        }

        let mut write = HashMap::new();
        for (user, pass) in parse_credentials(&config.write_api_key) {
            if write.insert(user, pass).is_some() {
                bail!("keys are not unique");
            }
        }

        let mut query = read.clone();
        query.extend(write.clone());

        let presign = Arc::new(PresignVerifier::new(&config.aws_default_region));
        let prefix = config.secret_prefix();

        Ok(Self {
            config: Arc::new(config),
            storage,
            index: Arc::new(Index::new()),
            credentials: Arc::new(RouteCredentials { read, write, query }),
            read_durations: Arc::new(read_durations),
            presign,
            verifier,
            prefix,
        })
    }

    /// The backing-store name of a record: `<prefix>_<pubkey><uid>_`.
    /// The trailing underscore is intentional and matches what existing
    /// fleets already have stored.
    pub fn secret_name(&self, pubkey: &str, unique_id: &str) -> String {
        format!("{}_{}{}_", self.prefix, pubkey, unique_id)
    }

    /// Read duration granted to a user.
    pub fn read_duration(&self, user: &str) -> Duration {
        self.read_durations
            .get(user)
            .copied()
            .unwrap_or(DEFAULT_READ_DURATION)
    }
}

/// Parse a CSV of `user|pass` entries, skipping malformed ones.
fn parse_credentials(csv: &str) -> Vec<(String, String)> {
    csv.split(DELIMITER)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.split_once(USER_PASS_SEPARATOR) {
            Some((user, pass)) if !user.is_empty() => {
                Some((user.to_string(), pass.to_string()))
            }
            _ => {
                tracing::warn!("credential entry is invalid (missing separator)");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::AcceptAllVerifier;
    use lnvault_storage::MemorySecretStore;

    fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
        AppState::new(
            config,
            Arc::new(MemorySecretStore::new()),
            Arc::new(AcceptAllVerifier),
        )
    }

    #[test]
    fn parses_key_tiers() {
        let config = AppConfig {
            read_api_key_10m: "a|pw1,b|pw2".to_string(),
            read_api_key_1h: "c|pw3".to_string(),
            read_api_key_1d: "d|pw4".to_string(),
            write_api_key: "w|pw5".to_string(),
            ..AppConfig::default()
        };
        let state = build_state(config).unwrap();

        assert_eq!(state.read_duration("a"), Duration::from_secs(600));
        assert_eq!(state.read_duration("c"), Duration::from_secs(3600));
        assert_eq!(state.read_duration("d"), Duration::from_secs(86400));
        // unknown principals fall back to the shortest tier
        assert_eq!(state.read_duration("nobody"), DEFAULT_READ_DURATION);

        assert!(state.credentials.read.contains_key("a"));
        assert!(!state.credentials.read.contains_key("w"));
        assert!(state.credentials.write.contains_key("w"));
        assert!(state.credentials.query.contains_key("a"));
        assert!(state.credentials.query.contains_key("w"));
    }

    #[test]
    fn duplicate_keys_are_fatal() {
        let config = AppConfig {
            read_api_key_10m: "a|pw1".to_string(),
            read_api_key_1h: "a|pw2".to_string(),
            ..AppConfig::default()
        };
        assert!(build_state(config).is_err());

        let config = AppConfig {
            write_api_key: "w|pw1,w|pw2".to_string(),
            ..AppConfig::default()
        };
        assert!(build_state(config).is_err());
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let config = AppConfig {
            read_api_key_10m: "a|pw1,nonsense,b|pw2".to_string(),
            ..AppConfig::default()
        };
        let state = build_state(config).unwrap();
        assert_eq!(state.credentials.read.len(), 2);
    }

    #[test]
    fn secret_name_layout() {
        let config = AppConfig {
            env: "prod".to_string(),
            ..AppConfig::default()
        };
        let state = build_state(config).unwrap();
        assert_eq!(
            state.secret_name("02aa", "id1"),
            "prodmacaroon_02aaid1_"
        );
    }
}
