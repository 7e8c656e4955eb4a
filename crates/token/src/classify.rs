//! Credential format detection.

use crate::macaroon::Macaroon;
use crate::rune::Rune;
use lnvault_core::ApiType;

/// The kind of authenticator a credential string turned out to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthenticatorKind {
    Unknown,
    Macaroon,
    Rune,
}

/// The authenticator kind a given API flavor expects. The reserved socket
/// flavor expects none.
pub fn kind_for_api(api: ApiType) -> AuthenticatorKind {
    match api {
        ApiType::LndGrpc | ApiType::LndRest => AuthenticatorKind::Macaroon,
        ApiType::ClnCommando => AuthenticatorKind::Rune,
        ApiType::ClnSocket => AuthenticatorKind::Unknown,
    }
}

/// Detect what kind of authenticator a credential string is.
///
/// A string that parses as both formats is disambiguated through the API
/// hint; without a hint the ambiguity is reported as `Unknown` rather than
/// guessed at.
pub fn detect(credential: &str, hint: Option<ApiType>) -> AuthenticatorKind {
    let mut matches = 0;
    let mut result = AuthenticatorKind::Unknown;

    if is_rune(credential) {
        result = AuthenticatorKind::Rune;
        matches += 1;
    }
    if is_macaroon(credential) {
        result = AuthenticatorKind::Macaroon;
        matches += 1;
    }

    if matches > 1 {
        result = match hint.map(kind_for_api) {
            Some(kind) if kind != AuthenticatorKind::Unknown => kind,
            _ => AuthenticatorKind::Unknown,
        };
    }

    result
}

fn is_macaroon(credential: &str) -> bool {
    // hex decoding alone would accept a partial parse
    if credential.is_empty() || !credential.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    let Ok(bytes) = hex::decode(credential) else {
        return false;
    };
    match Macaroon::from_binary(&bytes) {
        Ok(mac) => mac.location() == "lnd" && mac.version() == crate::macaroon::VERSION_V2,
        Err(_) => false,
    }
}

fn is_rune(credential: &str) -> bool {
    let Ok(rune) = Rune::from_base64(credential) else {
        return false;
    };
    if !matches!(rune.version(), Ok(0)) {
        return false;
    }
    // The codec is quite forgiving but we are more strict: a value with
    // non-printable codepoints is not a rune.
    rune.restrictions()
        .iter()
        .flat_map(|r| r.alternatives.iter())
        .all(|alt| alt.value.chars().all(|c| !c.is_control()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: &str = "0201036c6e640224030a10b493608461fb6e64810053fa31ef27991201301a0c0a04696e666f120472656164000216697061646472203139322e3136382e3139322e3136380000062072ea006233da839ce6e9f4721331a12041b228d36c0fdad552680f615766d2f4";
    const RUNE: &str = "tU-RLjMiDpY2U0o3W1oFowar36RFGpWloPbW9-RuZdo9MyZpZD0wMjRiOWExZmE4ZTAwNmYxZTM5MzdmNjVmNjZjNDA4ZTZkYThlMWNhNzI4ZWE0MzIyMmE3MzgxZGYxY2M0NDk2MDUmbWV0aG9kPWxpc3RwZWVycyZwbnVtPTEmcG5hbWVpZF4wMjRiOWExZmE4ZTAwNmYxZTM5M3xwYXJyMF4wMjRiOWExZmE4ZTAwNmYxZTM5MyZ0aW1lPDE2NTY5MjA1MzgmcmF0ZT0y";

    #[test]
    fn detects_formats() {
        assert_eq!(detect(MAC, None), AuthenticatorKind::Macaroon);
        assert_eq!(detect(RUNE, None), AuthenticatorKind::Rune);
        assert_eq!(detect("", None), AuthenticatorKind::Unknown);
        assert_eq!(detect("burek", None), AuthenticatorKind::Unknown);
        // truncated macaroon
        assert_eq!(
            detect("0201036c6e640224030a10b4936084", None),
            AuthenticatorKind::Unknown
        );
    }

    #[test]
    fn api_kind_mapping() {
        assert_eq!(kind_for_api(ApiType::LndGrpc), AuthenticatorKind::Macaroon);
        assert_eq!(kind_for_api(ApiType::LndRest), AuthenticatorKind::Macaroon);
        assert_eq!(kind_for_api(ApiType::ClnCommando), AuthenticatorKind::Rune);
        // reserved flavor expects no authenticator at all
        assert_eq!(kind_for_api(ApiType::ClnSocket), AuthenticatorKind::Unknown);
    }

    #[test]
    fn hint_ignored_when_unambiguous() {
        assert_eq!(
            detect(MAC, Some(ApiType::ClnCommando)),
            AuthenticatorKind::Macaroon
        );
        assert_eq!(
            detect(RUNE, Some(ApiType::LndGrpc)),
            AuthenticatorKind::Rune
        );
    }
}
