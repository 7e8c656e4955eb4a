//! Macaroon v2 binary codec and first-party caveat appending.
//!
//! Only the v2 binary layout is supported; that is the only version lnd
//! emits. The layout is a version byte followed by varint-framed fields:
//!
//! ```text
//! 0x02
//! [location] identifier EOS
//! ( [location] identifier [vid] EOS )*   caveats
//! EOS
//! signature
//! ```

use crate::error::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Version byte of the v2 binary format.
pub const VERSION_V2: u8 = 2;

const FIELD_EOS: u64 = 0;
const FIELD_LOCATION: u64 = 1;
const FIELD_IDENTIFIER: u64 = 2;
const FIELD_VID: u64 = 4;
const FIELD_SIGNATURE: u64 = 6;

/// A single caveat. First-party caveats carry only an identifier;
/// third-party caveats additionally carry a location and verification id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caveat {
    pub identifier: Vec<u8>,
    pub location: Option<String>,
    pub verification_id: Option<Vec<u8>>,
}

/// A parsed macaroon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Macaroon {
    location: String,
    identifier: Vec<u8>,
    caveats: Vec<Caveat>,
    signature: Vec<u8>,
}

impl Macaroon {
    /// Parse the v2 binary representation.
    pub fn from_binary(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);

        let version = r.byte()?;
        if version != VERSION_V2 {
            return Err(Error::InvalidMacaroon(format!(
                "unsupported version {version}"
            )));
        }

        let location = match r.peek_field()? {
            FIELD_LOCATION => {
                let bytes = r.field(FIELD_LOCATION)?;
                String::from_utf8(bytes)
                    .map_err(|_| Error::InvalidMacaroon("location is not utf-8".to_string()))?
            }
            _ => String::new(),
        };
        let identifier = r.field(FIELD_IDENTIFIER)?;
        r.eos()?;

        let mut caveats = Vec::new();
        loop {
            if r.peek_field()? == FIELD_EOS {
                r.eos()?;
                break;
            }
            let location = match r.peek_field()? {
                FIELD_LOCATION => {
                    let bytes = r.field(FIELD_LOCATION)?;
                    Some(String::from_utf8(bytes).map_err(|_| {
                        Error::InvalidMacaroon("caveat location is not utf-8".to_string())
                    })?)
                }
                _ => None,
            };
            let identifier = r.field(FIELD_IDENTIFIER)?;
            let verification_id = match r.peek_field()? {
                FIELD_VID => Some(r.field(FIELD_VID)?),
                _ => None,
            };
            r.eos()?;
            caveats.push(Caveat {
                identifier,
                location,
                verification_id,
            });
        }

        let signature = r.field(FIELD_SIGNATURE)?;
        if signature.len() != 32 {
            return Err(Error::InvalidMacaroon(format!(
                "signature is {} bytes, expected 32",
                signature.len()
            )));
        }
        if !r.is_empty() {
            return Err(Error::InvalidMacaroon("trailing data".to_string()));
        }

        Ok(Self {
            location,
            identifier,
            caveats,
            signature,
        })
    }

    /// Serialize back to the v2 binary representation.
    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = vec![VERSION_V2];
        if !self.location.is_empty() {
            write_field(&mut out, FIELD_LOCATION, self.location.as_bytes());
        }
        write_field(&mut out, FIELD_IDENTIFIER, &self.identifier);
        write_varint(&mut out, FIELD_EOS);
        for caveat in &self.caveats {
            if let Some(location) = &caveat.location {
                write_field(&mut out, FIELD_LOCATION, location.as_bytes());
            }
            write_field(&mut out, FIELD_IDENTIFIER, &caveat.identifier);
            if let Some(vid) = &caveat.verification_id {
                write_field(&mut out, FIELD_VID, vid);
            }
            write_varint(&mut out, FIELD_EOS);
        }
        write_varint(&mut out, FIELD_EOS);
        write_field(&mut out, FIELD_SIGNATURE, &self.signature);
        out
    }

    /// The macaroon's location hint.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The format version (only v2 parses, so this is constant).
    pub fn version(&self) -> u8 {
        VERSION_V2
    }

    /// The caveats, in order.
    pub fn caveats(&self) -> &[Caveat] {
        &self.caveats
    }

    /// Append a first-party caveat, extending the signature chain:
    /// `sig' = HMAC-SHA256(sig, caveat_id)`.
    pub fn add_first_party_caveat(&mut self, caveat_id: &[u8]) {
        let mut mac = HmacSha256::new_from_slice(&self.signature)
            .expect("HMAC accepts any key length");
        mac.update(caveat_id);
        self.signature = mac.finalize().into_bytes().to_vec();
        self.caveats.push(Caveat {
            identifier: caveat_id.to_vec(),
            location: None,
            verification_id: None,
        });
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn write_field(out: &mut Vec<u8>, field: u64, data: &[u8]) {
    write_varint(out, field);
    write_varint(out, data.len() as u64);
    out.extend_from_slice(data);
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn byte(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::InvalidMacaroon("unexpected end of data".to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    fn varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.byte()?;
            if shift >= 63 && byte > 1 {
                return Err(Error::InvalidMacaroon("varint overflow".to_string()));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// The next field type without consuming it.
    fn peek_field(&mut self) -> Result<u64> {
        let pos = self.pos;
        let field = self.varint()?;
        self.pos = pos;
        Ok(field)
    }

    /// Consume a field of the expected type and return its payload.
    fn field(&mut self, expected: u64) -> Result<Vec<u8>> {
        let field = self.varint()?;
        if field != expected {
            return Err(Error::InvalidMacaroon(format!(
                "expected field {expected}, found {field}"
            )));
        }
        let len = self.varint()? as usize;
        if self.pos + len > self.data.len() {
            return Err(Error::InvalidMacaroon("field length out of range".to_string()));
        }
        let data = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(data)
    }

    /// Consume an end-of-section marker.
    fn eos(&mut self) -> Result<()> {
        let field = self.varint()?;
        if field != FIELD_EOS {
            return Err(Error::InvalidMacaroon(format!(
                "expected end of section, found field {field}"
            )));
        }
        Ok(())
    }
}
