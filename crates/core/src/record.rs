//! The stored credential record and its validation helpers.

use crate::error::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose;
use serde::{Deserialize, Serialize};

/// The unit stored in the backing store and served to consumers.
///
/// All string fields default to empty on deserialization so that partial
/// PUT bodies merge cleanly with an existing record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCredential {
    /// 33-byte compressed secp256k1 public key as 66 lowercase hex chars.
    #[serde(default)]
    pub pubkey: String,
    /// Opaque credential: hex for macaroons, base64url for runes.
    #[serde(default)]
    pub macaroon_hex: String,
    /// Base64-encoded PEM certificate; required for gRPC and REST flavors.
    #[serde(default)]
    pub certificate_base64: String,
    /// host:port, optionally with a scheme; IPv6 uses bracket notation.
    #[serde(default)]
    pub endpoint: String,
    /// Integer API flavor code, see [`crate::ApiType`]. May be null.
    #[serde(default)]
    pub api_type: Option<i32>,
    /// TLS verification policy code; opaque passthrough.
    #[serde(default)]
    pub cert_verification_type: Option<i32>,
    /// Comma-separated secondary lookup aliases.
    #[serde(default)]
    pub tags: String,
}

impl NodeCredential {
    /// Iterate the record's tag aliases, skipping empty entries.
    pub fn tag_list(&self) -> impl Iterator<Item = &str> {
        self.tags
            .split(crate::DELIMITER)
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Validate a node public key: exactly 66 lowercase hex characters that
/// decode to a 33-byte compressed secp256k1 point (leading byte 02 or 03).
pub fn validate_pubkey(pubkey: &str) -> bool {
    if pubkey.len() != crate::PUBKEY_LEN {
        return false;
    }
    if !pubkey
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return false;
    }
    match hex::decode(pubkey) {
        Ok(bytes) => bytes.len() == 33 && (bytes[0] == 0x02 || bytes[0] == 0x03),
        Err(_) => false,
    }
}

/// Whether a string is non-empty and purely ASCII alphanumeric.
pub fn is_alphanumeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Validate an optional tenant namespace. Empty means "no namespace".
pub fn validate_unique_id(unique_id: &str) -> Result<()> {
    if unique_id.is_empty() || is_alphanumeric(unique_id) {
        Ok(())
    } else {
        Err(Error::InvalidUniqueId(unique_id.to_string()))
    }
}

/// Decode a base64 string, tolerating both padded and unpadded input.
pub fn safe_base64_decode(s: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(s)
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(s))
        .map_err(|e| Error::InvalidCertificate(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBKEY: &str = "0367fa307a6e0ce29efadc4f7c4d1109ee689aa1e7bd442afd7270919f9e28c3b7";

    #[test]
    fn pubkey_validation() {
        assert!(validate_pubkey(PUBKEY));
        // uppercase hex is rejected
        assert!(!validate_pubkey(&PUBKEY.to_uppercase()));
        // wrong length
        assert!(!validate_pubkey(&PUBKEY[..64]));
        // wrong leading byte
        let mut odd = PUBKEY.to_string();
        odd.replace_range(0..2, "04");
        assert!(!validate_pubkey(&odd));
        assert!(!validate_pubkey(""));
        assert!(!validate_pubkey("burek"));
    }

    #[test]
    fn unique_id_validation() {
        assert!(validate_unique_id("").is_ok());
        assert!(validate_unique_id("id1").is_ok());
        assert!(validate_unique_id("id-1").is_err());
        assert!(validate_unique_id("a/b").is_err());
    }

    #[test]
    fn tag_list_skips_empty_entries() {
        let record = NodeCredential {
            tags: "some,,test".to_string(),
            ..Default::default()
        };
        let tags: Vec<&str> = record.tag_list().collect();
        assert_eq!(tags, vec!["some", "test"]);
    }

    #[test]
    fn record_json_round_trip() {
        let json = r#"{
            "pubkey": "0367fa307a6e0ce29efadc4f7c4d1109ee689aa1e7bd442afd7270919f9e28c3b7",
            "macaroon_hex": "0201",
            "certificate_base64": "",
            "endpoint": "192.168.192.168:10009",
            "api_type": null,
            "cert_verification_type": null,
            "tags": ""
        }"#;
        let record: NodeCredential = serde_json::from_str(json).unwrap();
        assert_eq!(record.pubkey, PUBKEY);
        assert_eq!(record.api_type, None);

        // missing fields default to empty
        let partial: NodeCredential =
            serde_json::from_str(r#"{"pubkey": "abc"}"#).unwrap();
        assert_eq!(partial.endpoint, "");
        assert_eq!(partial.macaroon_hex, "");
    }

    #[test]
    fn base64_decoding_tolerates_missing_padding() {
        assert!(safe_base64_decode("aGVsbG8=").is_ok());
        assert!(safe_base64_decode("aGVsbG8").is_ok());
        assert!(safe_base64_decode("not base64!").is_err());
    }
}
