//! Credential attenuation.

use crate::classify::{AuthenticatorKind, detect};
use crate::error::{Error, Result};
use crate::macaroon::Macaroon;
use crate::rune::{Restriction, Rune};
use lnvault_core::ApiType;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Hard cap on how far into the future a derived credential may be valid.
pub const MAX_CONSTRAIN_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Derive a credential valid for at most `duration` from now.
///
/// Macaroons get a `time-before` caveat, runes a `time<` restriction.
/// An unclassifiable credential yields an empty string with no error; the
/// caller must treat empty as "credential censored".
pub fn constrain(
    original: &str,
    duration: Duration,
    hint: Option<ApiType>,
) -> Result<String> {
    if duration > MAX_CONSTRAIN_DURATION {
        return Err(Error::DurationTooLong);
    }

    match detect(original, hint) {
        AuthenticatorKind::Macaroon => constrain_macaroon(original, duration),
        AuthenticatorKind::Rune => constrain_rune(original, duration),
        AuthenticatorKind::Unknown => {
            // do not log the credential on purpose since it might be sensitive
            tracing::warn!(?duration, "trying to constrain unknown authenticator");
            Ok(String::new())
        }
    }
}

fn constrain_macaroon(original: &str, duration: Duration) -> Result<String> {
    let bytes = hex::decode(original).map_err(|e| Error::InvalidHex(e.to_string()))?;
    let mut mac = Macaroon::from_binary(&bytes)?;

    // RFC 3339 with nanosecond precision, the caveat format lnd checks.
    // The nanoseconds also make every derivation unique.
    let expiry = OffsetDateTime::now_utc() + duration;
    let expiry = expiry
        .format(&Rfc3339)
        .map_err(|e| Error::TimestampFormat(e.to_string()))?;
    mac.add_first_party_caveat(format!("time-before {expiry}").as_bytes());

    Ok(hex::encode(mac.to_binary()))
}

fn constrain_rune(original: &str, duration: Duration) -> Result<String> {
    let mut rune = Rune::from_base64(original)?;
    let limit = (OffsetDateTime::now_utc() + duration).unix_timestamp();
    rune.add_restriction(Restriction::from_string(&format!("time<{limit}"))?);
    Ok(rune.to_base64())
}
