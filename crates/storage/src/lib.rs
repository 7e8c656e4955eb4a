//! Backing-store drivers for the credential vault.
//!
//! The core consumes a small CRUD interface ([`SecretStore`]); drivers
//! exist for AWS Secrets Manager, Google Secret Manager and an in-memory
//! test store. Deletion is a tombstone (the literal value `{}`) because
//! AWS forbids re-creating a secret name for days after a real delete;
//! every driver honors the convention so mixed fleets interoperate.

pub mod backends;
pub mod error;
pub mod provider;
pub mod traits;

mod retry;

pub use backends::aws::AwsSecretStore;
pub use backends::gcp::GcpSecretStore;
pub use backends::memory::MemorySecretStore;
pub use error::{StorageError, StorageResult};
pub use provider::CloudProvider;
pub use traits::{Change, SecretStore, TOMBSTONE};

use lnvault_core::AppConfig;
use std::sync::Arc;

/// Construct the backing store a deployment should use.
///
/// The `local` environment gets the in-memory store; otherwise the cloud
/// provider pin (or instance-metadata probing) selects a driver.
pub async fn from_config(config: &AppConfig) -> StorageResult<Arc<dyn SecretStore>> {
    if config.is_local() {
        tracing::info!("using in-memory backing store");
        return Ok(Arc::new(MemorySecretStore::new()));
    }

    match provider::determine_provider(config.cloud_provider.as_deref()).await {
        CloudProvider::Aws => {
            let store = AwsSecretStore::new(&config.aws_default_region).await;
            Ok(Arc::new(store))
        }
        CloudProvider::Gcp => {
            let store = GcpSecretStore::new(config.gcp_project_id.clone()).await?;
            Ok(Arc::new(store))
        }
        CloudProvider::Unknown => Err(StorageError::Config(
            "could not determine cloud provider; set CLOUD_PROVIDER=aws|gcp".to_string(),
        )),
    }
}
