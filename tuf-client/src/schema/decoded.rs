//! A wrapper type for byte buffers that are serialized to and from a fixed text encoding (e.g.
//! hex) in JSON, while behaving like a plain `Vec<u8>` everywhere else.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

/// A text encoding that `Decoded` can use to move between bytes and a JSON string.
pub trait Format {
    /// Encodes `bytes` into the textual representation used in the metadata JSON.
    fn encode(bytes: &[u8]) -> String;

    /// Decodes `s` back into bytes, failing if it isn't valid for this encoding.
    fn decode(s: &str) -> Result<Vec<u8>, String>;
}

/// Lowercase hexadecimal encoding, as used for key IDs, signatures, and hashes throughout TUF
/// metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hex {}

impl Format for Hex {
    fn encode(bytes: &[u8]) -> String {
        hex::encode(bytes)
    }

    fn decode(s: &str) -> Result<Vec<u8>, String> {
        hex::decode(s).map_err(|e| e.to_string())
    }
}

/// A byte buffer whose JSON representation is a string in the encoding `F` (usually [`Hex`]).
///
/// `Decoded<Hex>` is used for key IDs, signatures, and content hashes: fields that are
/// conceptually raw bytes but spelled as hex strings on the wire.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Decoded<F> {
    bytes: Vec<u8>,
    spooky: PhantomData<F>,
}

impl<F> Default for Decoded<F> {
    fn default() -> Self {
        Decoded {
            bytes: Vec::new(),
            spooky: PhantomData,
        }
    }
}

impl<F> fmt::Debug for Decoded<F>
where
    F: Format,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decoded({:?})", F::encode(&self.bytes))
    }
}

impl<F> Deref for Decoded<F> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl<F> DerefMut for Decoded<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bytes
    }
}

impl<F> AsRef<[u8]> for Decoded<F> {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<F> From<Vec<u8>> for Decoded<F> {
    fn from(bytes: Vec<u8>) -> Self {
        Decoded {
            bytes,
            spooky: PhantomData,
        }
    }
}

impl<F> From<Decoded<F>> for Vec<u8> {
    fn from(decoded: Decoded<F>) -> Self {
        decoded.bytes
    }
}

impl<F> Serialize for Decoded<F>
where
    F: Format,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&F::encode(&self.bytes))
    }
}

impl<'de, F> Deserialize<'de> for Decoded<F>
where
    F: Format,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = F::decode(&s).map_err(D::Error::custom)?;
        Ok(Decoded {
            bytes,
            spooky: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let decoded: Decoded<Hex> = vec![0xde, 0xad, 0xbe, 0xef].into();
        let json = serde_json::to_string(&decoded).unwrap();
        assert_eq!(json, "\"deadbeef\"");
        let back: Decoded<Hex> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, decoded);
    }

    #[test]
    fn rejects_invalid_hex() {
        let err = serde_json::from_str::<Decoded<Hex>>("\"not hex!\"");
        assert!(err.is_err());
    }
}
