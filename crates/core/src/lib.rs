//! Core domain types and shared logic for the Lightning credential vault.
//!
//! This crate defines the canonical data model used across all other crates:
//! - The stored credential record and its JSON schema
//! - API flavor enumeration
//! - Pubkey, unique-id and certificate validation
//! - Endpoint parsing
//! - Application configuration

pub mod apitype;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod record;

pub use apitype::ApiType;
pub use config::AppConfig;
pub use endpoint::extract_host_and_port;
pub use error::{Error, Result};
pub use record::NodeCredential;

/// Delimiter between entries in tag lists and API key lists.
pub const DELIMITER: &str = ",";

/// Separates username from password in credential entries (cannot use `:`,
/// which HTTP Basic reserves).
pub const USER_PASS_SEPARATOR: &str = "|";

/// Password sentinel marking a credential entry as an IAM ARN glob pattern.
/// Starts with `$` so it can never collide with a stored password hash.
pub const IAM_AUTH_FLAG: &str = "$iam";

/// Length of a compressed secp256k1 public key in lowercase hex characters.
pub const PUBKEY_LEN: usize = 66;
