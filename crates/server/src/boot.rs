//! Boot loader: rebuild the index from the backing store.

use crate::metrics::{BOOT_SECRETS_LOADED, BOOT_SECRETS_SKIPPED};
use crate::state::AppState;
use lnvault_core::{NodeCredential, PUBKEY_LEN, record::validate_pubkey};
use lnvault_storage::TOMBSTONE;

/// Load every secret under the deployment prefix into the index.
///
/// Runs synchronously before the listener accepts traffic. Undecodable or
/// misnamed blobs are skipped with telemetry, never fatal.
pub async fn initial_load(state: &AppState) {
    tracing::info!("initial load of keys from secrets manager...");

    let names = match state.storage.list(&state.prefix).await {
        Ok(names) => names,
        Err(err) => {
            tracing::error!(error = %err, "could not list secrets");
            return;
        }
    };

    for name in names {
        let value = match state.storage.get(&name).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(secret = %name, error = %err, "could not get secret");
                BOOT_SECRETS_SKIPPED.with_label_values(&["fetch"]).inc();
                continue;
            }
        };

        if value == TOMBSTONE {
            tracing::info!(secret = %name, "ignoring empty secret");
            BOOT_SECRETS_SKIPPED.with_label_values(&["tombstone"]).inc();
            continue;
        }

        let record: NodeCredential = match serde_json::from_str(&value) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(secret = %name, error = %err, "error unmarshalling secret");
                BOOT_SECRETS_SKIPPED.with_label_values(&["deserialize"]).inc();
                continue;
            }
        };
        if !validate_pubkey(&record.pubkey) {
            tracing::warn!(secret = %name, "secret has an invalid pubkey");
            BOOT_SECRETS_SKIPPED.with_label_values(&["pubkey"]).inc();
            continue;
        }

        // names look like <prefix>_<pubkey><uid>_
        let parts: Vec<&str> = name.split('_').collect();
        if parts.len() != 2 && parts.len() != 3 {
            tracing::warn!(secret = %name, "invalid secret name");
            BOOT_SECRETS_SKIPPED.with_label_values(&["name"]).inc();
            continue;
        }
        let keyed = parts[1];
        if keyed.len() < PUBKEY_LEN || keyed.as_bytes()[..PUBKEY_LEN] != *record.pubkey.as_bytes() {
            tracing::warn!(secret = %name, pubkey = %record.pubkey, "secret name does not match pubkey");
            BOOT_SECRETS_SKIPPED.with_label_values(&["name"]).inc();
            continue;
        }
        let unique_id = &keyed[PUBKEY_LEN..];

        state.index.publish(&record, unique_id);
        BOOT_SECRETS_LOADED.inc();
    }

    tracing::info!(entries = state.index.len(), "initial load of keys from secrets manager... done");
}
