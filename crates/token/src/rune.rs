//! Rune codec and restriction appending.
//!
//! A rune is a 32-byte auth code followed by a restriction string,
//! base64url-encoded as a whole. Restrictions are joined by `&`, the
//! alternatives within a restriction by `|`; `\` escapes either delimiter
//! inside values. The auth code is a SHA-256 midstate: appending a
//! restriction resumes the hash at the current (reconstructible) stream
//! length, so holders can only ever narrow a rune, never widen it.

use crate::error::{Error, Result};
use crate::sha256;
use base64::Engine as _;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};

/// Comparison operators a restriction alternative may use.
const CONDITIONS: &[char] = &['!', '=', '/', '^', '$', '~', '<', '>', '{', '}', '#'];

/// One testable clause: `field cond value`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alternative {
    pub field: String,
    pub cond: char,
    pub value: String,
}

impl Alternative {
    /// Parse an alternative whose value may still contain escape sequences.
    fn parse(s: &str) -> Result<Self> {
        let cond_at = s
            .char_indices()
            .find(|(_, c)| CONDITIONS.contains(c))
            .ok_or_else(|| Error::InvalidRune(format!("no condition in alternative: {s}")))?;
        let (field, rest) = s.split_at(cond_at.0);
        if !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidRune(format!("invalid field name: {field}")));
        }
        let mut rest = rest.chars();
        let cond = rest.next().expect("found above");
        Ok(Self {
            field: field.to_string(),
            cond,
            value: unescape(rest.as_str()),
        })
    }

    fn encode(&self) -> String {
        let mut out = String::with_capacity(self.field.len() + 1 + self.value.len());
        out.push_str(&self.field);
        out.push(self.cond);
        for c in self.value.chars() {
            if c == '\\' || c == '&' || c == '|' {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }
}

/// A restriction: alternatives ORed together, all restrictions ANDed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Restriction {
    pub alternatives: Vec<Alternative>,
}

impl Restriction {
    /// Parse a restriction like `time<1656920538` or `a=1|b=2`.
    pub fn from_string(s: &str) -> Result<Self> {
        let alternatives = split_unescaped(s, '|')
            .into_iter()
            .map(|alt| Alternative::parse(&alt))
            .collect::<Result<Vec<_>>>()?;
        if alternatives.is_empty() {
            return Err(Error::InvalidRune("empty restriction".to_string()));
        }
        Ok(Self { alternatives })
    }

    fn encode(&self) -> String {
        self.alternatives
            .iter()
            .map(Alternative::encode)
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Whether this is the unique-id restriction (single alternative with
    /// an empty field name and `=`).
    fn is_unique_id(&self) -> bool {
        self.alternatives.len() == 1
            && self.alternatives[0].field.is_empty()
            && self.alternatives[0].cond == '='
    }
}

/// A parsed rune.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rune {
    authcode: [u8; 32],
    restrictions: Vec<Restriction>,
}

impl Rune {
    /// Decode a rune from its base64url form, padded or not.
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = URL_SAFE
            .decode(s)
            .or_else(|_| URL_SAFE_NO_PAD.decode(s))
            .map_err(|e| Error::InvalidBase64(e.to_string()))?;
        if bytes.len() < 32 {
            return Err(Error::InvalidRune("shorter than an auth code".to_string()));
        }

        let mut authcode = [0u8; 32];
        authcode.copy_from_slice(&bytes[..32]);

        let tail = std::str::from_utf8(&bytes[32..])
            .map_err(|_| Error::InvalidRune("restrictions are not utf-8".to_string()))?;
        let restrictions = if tail.is_empty() {
            Vec::new()
        } else {
            split_unescaped(tail, '&')
                .into_iter()
                .map(|r| Restriction::from_string(&r))
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self {
            authcode,
            restrictions,
        })
    }

    /// Encode to padded base64url.
    pub fn to_base64(&self) -> String {
        let mut bytes = self.authcode.to_vec();
        bytes.extend_from_slice(self.restrictions_string().as_bytes());
        URL_SAFE.encode(bytes)
    }

    /// The rune format version, taken from the unique-id restriction's
    /// `id-version` suffix. Runes without a suffix (or without a unique id
    /// at all) are version 0.
    pub fn version(&self) -> Result<u64> {
        let unique_id = match self.restrictions.first() {
            Some(r) if r.is_unique_id() => &r.alternatives[0].value,
            _ => return Ok(0),
        };
        match unique_id.split_once('-') {
            Some((_, version)) => version
                .parse::<u64>()
                .map_err(|_| Error::InvalidRune(format!("invalid version suffix: {unique_id}"))),
            None => Ok(0),
        }
    }

    /// The restrictions, in order.
    pub fn restrictions(&self) -> &[Restriction] {
        &self.restrictions
    }

    /// Append a restriction, evolving the auth code through the SHA-256
    /// midstate so the result is strictly narrower than its parent.
    pub fn add_restriction(&mut self, restriction: Restriction) {
        let mut state = [0u32; 8];
        for (i, chunk) in self.authcode.chunks_exact(4).enumerate() {
            state[i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        let stream_len = self.stream_len();
        let encoded = restriction.encode();
        let mut data = encoded.clone().into_bytes();
        data.extend(sha256::end_padding(stream_len + encoded.len() as u64));
        debug_assert_eq!(data.len() % 64, 0);
        for block in data.chunks(64) {
            sha256::compress(&mut state, block);
        }

        for (i, word) in state.iter().enumerate() {
            self.authcode[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
        self.restrictions.push(restriction);
    }

    fn restrictions_string(&self) -> String {
        self.restrictions
            .iter()
            .map(Restriction::encode)
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Bytes hashed so far: the 64-byte secret block plus each encoded
    /// restriction and its end padding. Always a multiple of 64.
    fn stream_len(&self) -> u64 {
        let mut len = 64u64;
        for restriction in &self.restrictions {
            let encoded = restriction.encode().len() as u64;
            len += encoded + sha256::end_padding(len + encoded).len() as u64;
        }
        len
    }
}

/// Split on a delimiter, honoring backslash escapes. Escape sequences are
/// preserved in the parts; they are resolved once, when the alternative's
/// value is finally parsed.
fn split_unescaped(s: &str, delimiter: char) -> Vec<String> {
    let mut parts = vec![String::new()];
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            let part = parts.last_mut().expect("non-empty");
            part.push('\\');
            part.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == delimiter {
            parts.push(String::new());
        } else {
            parts.last_mut().expect("non-empty").push(c);
        }
    }
    parts
}

/// Resolve backslash escape sequences.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNE_FULL: &str = "tU-RLjMiDpY2U0o3W1oFowar36RFGpWloPbW9-RuZdo9MyZpZD0wMjRiOWExZmE4ZTAwNmYxZTM5MzdmNjVmNjZjNDA4ZTZkYThlMWNhNzI4ZWE0MzIyMmE3MzgxZGYxY2M0NDk2MDUmbWV0aG9kPWxpc3RwZWVycyZwbnVtPTEmcG5hbWVpZF4wMjRiOWExZmE4ZTAwNmYxZTM5M3xwYXJyMF4wMjRiOWExZmE4ZTAwNmYxZTM5MyZ0aW1lPDE2NTY5MjA1MzgmcmF0ZT0y";
    const RUNE_BARE: &str = "y3niiNN_cNeIP_SPeoxzXSQMZnqkieqvtABj37rH_UQ9MA==";

    #[test]
    fn parses_restricted_rune() {
        let rune = Rune::from_base64(RUNE_FULL).unwrap();
        assert_eq!(rune.version().unwrap(), 0);
        assert_eq!(rune.restrictions().len(), 7);

        let time = &rune.restrictions()[5];
        assert_eq!(time.alternatives.len(), 1);
        assert_eq!(time.alternatives[0].field, "time");
        assert_eq!(time.alternatives[0].cond, '<');
        assert_eq!(time.alternatives[0].value, "1656920538");

        // pnameid^...|parr0^... keeps both alternatives
        assert_eq!(rune.restrictions()[4].alternatives.len(), 2);
    }

    #[test]
    fn parses_bare_rune_with_padding() {
        let rune = Rune::from_base64(RUNE_BARE).unwrap();
        assert_eq!(rune.version().unwrap(), 0);
        assert_eq!(rune.restrictions().len(), 1);
        assert_eq!(rune.to_base64(), RUNE_BARE);
    }

    #[test]
    fn base64_round_trip() {
        // the full rune has no padding; re-encoding adds none either
        let rune = Rune::from_base64(RUNE_FULL).unwrap();
        assert_eq!(rune.to_base64(), RUNE_FULL);
    }

    #[test]
    fn add_restriction_changes_authcode_and_appends() {
        let mut rune = Rune::from_base64(RUNE_BARE).unwrap();
        let before = rune.authcode;

        rune.add_restriction(Restriction::from_string("time<1700000000").unwrap());
        assert_ne!(rune.authcode, before);
        assert_eq!(rune.restrictions().len(), 2);

        // deterministic: same parent, same restriction, same child
        let mut again = Rune::from_base64(RUNE_BARE).unwrap();
        again.add_restriction(Restriction::from_string("time<1700000000").unwrap());
        assert_eq!(again.to_base64(), rune.to_base64());
    }

    #[test]
    fn escaped_values_round_trip() {
        let restriction = Restriction::from_string(r"pnamedesc=has\&amp").unwrap();
        assert_eq!(restriction.alternatives[0].value, "has&amp");
        assert_eq!(restriction.encode(), r"pnamedesc=has\&amp");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Rune::from_base64("").is_err());
        assert!(Rune::from_base64("burek").is_err());
        assert!(Rune::from_base64("AAAA").is_err());
    }
}
