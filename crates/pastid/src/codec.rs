use crate::{Error, Result};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use core::fmt;
use serde::{Deserialize, Serialize};

/// Number of big-endian bytes taken from a sequence value.
pub const SEQUENCE_BYTES: usize = 6;

/// Length of an encoded identifier in characters.
///
/// Six bytes are exactly 48 bits and eight base64 characters carry exactly
/// 48 bits, so the encoding never pads and never truncates.
pub const IDENTIFIER_LEN: usize = 8;

/// Largest sequence value that encodes without loss.
pub const MAX_SEQUENCE: u64 = (1 << (SEQUENCE_BYTES * 8)) - 1;

const _: () = assert!(IDENTIFIER_LEN * 6 == SEQUENCE_BYTES * 8);

/// A short public identifier derived from a sequence value.
///
/// Identifiers are fixed-width, URL-safe base64 strings. Two distinct
/// sequence values in `1..=MAX_SEQUENCE` always produce distinct identifiers.
///
/// # Example
///
/// ```
/// use pastid::Identifier;
///
/// let id = Identifier::from_sequence(1).unwrap();
/// assert_eq!(id.as_str(), "AAAAAAAB");
/// assert_eq!(id.to_sequence(), 1);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Encodes a sequence value into an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentifierSpaceExhausted`] if `seq` does not fit in
    /// [`SEQUENCE_BYTES`]. Values are never truncated.
    pub fn from_sequence(seq: u64) -> Result<Self> {
        if seq > MAX_SEQUENCE {
            return Err(Error::IdentifierSpaceExhausted {
                value: seq,
                max: MAX_SEQUENCE,
            });
        }
        let bytes = seq.to_be_bytes();
        let encoded = URL_SAFE_NO_PAD.encode(&bytes[bytes.len() - SEQUENCE_BYTES..]);
        debug_assert_eq!(encoded.len(), IDENTIFIER_LEN);
        Ok(Self(encoded))
    }

    /// Validates and wraps an identifier received from the outside world.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] if the string has the wrong
    /// length or contains characters outside the base64url alphabet.
    pub fn parse(s: &str) -> Result<Self> {
        Self::decode(s).map(|_| Self(s.to_owned()))
    }

    /// Recovers the sequence value this identifier was minted from.
    pub fn to_sequence(&self) -> u64 {
        // Construction guarantees a valid encoding.
        Self::decode(&self.0).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn decode(s: &str) -> Result<u64> {
        if s.len() != IDENTIFIER_LEN {
            return Err(Error::InvalidIdentifier {
                reason: format!("expected {IDENTIFIER_LEN} characters, got {}", s.len()),
            });
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| Error::InvalidIdentifier {
                reason: e.to_string(),
            })?;
        let mut buf = [0_u8; 8];
        buf[8 - SEQUENCE_BYTES..].copy_from_slice(&bytes);
        Ok(u64::from_be_bytes(buf))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identifier {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::decode(&value)?;
        Ok(Self(value))
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}
