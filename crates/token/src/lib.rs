//! Credential classification and attenuation.
//!
//! Two bearer credential formats flow through the vault: macaroons
//! (binary, hex-encoded on the wire, used by the lnd gRPC/REST flavors)
//! and runes (base64url-encoded, used by the commando flavor). This crate
//! decides which format an opaque string is ([`detect`]) and derives a
//! time-limited copy of it ([`constrain`]). Every read served by the vault
//! depends on the attenuation being applied correctly.

pub mod classify;
pub mod constrain;
pub mod error;
pub mod macaroon;
pub mod rune;

mod sha256;

pub use classify::{AuthenticatorKind, detect, kind_for_api};
pub use constrain::{MAX_CONSTRAIN_DURATION, constrain};
pub use error::{Error, Result};
pub use macaroon::Macaroon;
pub use rune::Rune;
