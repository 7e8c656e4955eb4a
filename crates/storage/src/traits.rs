//! Backing-store trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;

/// Logical deletion marker. A secret holding this value is treated as
/// absent; writing over it reports [`Change::Inserted`].
pub const TOMBSTONE: &str = "{}";

/// What a put actually did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Change {
    #[default]
    Undefined,
    Inserted,
    Updated,
}

/// The CRUD surface the vault core consumes.
///
/// All methods retry transient failures internally with bounded
/// exponential backoff before surfacing an error.
#[async_trait]
pub trait SecretStore: Send + Sync + 'static {
    /// List all secret names starting with `prefix`.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Fetch the current value of a secret.
    async fn get(&self, name: &str) -> StorageResult<String>;

    /// Insert or update a secret. Returns the backend resource id and
    /// whether the secret was inserted (including over a tombstone) or
    /// updated.
    async fn put(&self, name: &str, value: &str) -> StorageResult<(String, Change)>;

    /// Tombstone a secret. Returns the backend resource id.
    async fn delete(&self, name: &str) -> StorageResult<String>;

    /// Static backend identifier for logs and metrics.
    fn backend_name(&self) -> &'static str;
}
