//! Lightning RPC API flavors.

use crate::error::{Error, Result};

/// The flavor of Lightning RPC a stored credential is used with.
///
/// The wire representation is the integer code carried in the record's
/// `api_type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiType {
    /// lnd over gRPC.
    LndGrpc = 0,
    /// lnd over REST.
    LndRest = 1,
    /// Core Lightning over a unix socket. Reserved; never accepted on write.
    ClnSocket = 2,
    /// Core Lightning commando (rune over socket).
    ClnCommando = 3,
}

impl ApiType {
    /// Parse an integer code into an API type.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::LndGrpc),
            1 => Ok(Self::LndRest),
            2 => Ok(Self::ClnSocket),
            3 => Ok(Self::ClnCommando),
            other => Err(Error::UnsupportedApiType(other)),
        }
    }

    /// Parse an optional integer code, treating `None` as "not declared".
    pub fn from_opt_code(code: Option<i32>) -> Result<Option<Self>> {
        code.map(Self::from_code).transpose()
    }

    /// Integer wire code for this API type.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Whether connecting with this flavor requires a TLS certificate.
    pub fn needs_cert(self) -> bool {
        matches!(self, Self::LndGrpc | Self::LndRest)
    }
}

impl std::fmt::Display for ApiType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::LndGrpc => "lnd-grpc",
            Self::LndRest => "lnd-rest",
            Self::ClnSocket => "cln-socket",
            Self::ClnCommando => "cln-commando",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for code in 0..=3 {
            assert_eq!(ApiType::from_code(code).unwrap().code(), code);
        }
        assert!(ApiType::from_code(4).is_err());
        assert!(ApiType::from_code(-1).is_err());
    }

    #[test]
    fn cert_requirements() {
        assert!(ApiType::LndGrpc.needs_cert());
        assert!(ApiType::LndRest.needs_cert());
        assert!(!ApiType::ClnCommando.needs_cert());
    }
}
