//! The `Key` object found in `root.json`'s (and, historically, delegated roles') key maps, and
//! the scheme-specific logic needed to verify a signature made with one.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Result};
use crate::schema::spki;
use aws_lc_rs::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use olpc_cjson::CanonicalFormatter;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use snafu::{ensure, ResultExt};
use std::collections::HashMap;

/// A public key, its declared scheme, and (for forward compatibility) any extra fields a newer
/// repository may have included.
///
/// Every recognized variant can verify a signature made with its key; `key_id` computes the
/// SHA-256 digest of the key's own canonical form, which TUF metadata uses as the key's
/// identifier everywhere else. [`Key::Unknown`] preserves a key whose `keytype` this client
/// doesn't recognize: an unrecognized scheme must not fail parsing of the
/// surrounding metadata (root.json as a whole stays parseable), it just can never produce a
/// valid signature.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    /// An Ed25519 public key.
    Ed25519 {
        /// The key's public point and any unrecognized fields.
        keyval: Ed25519Key,
        /// The signing scheme; always `ed25519`.
        scheme: Ed25519Scheme,
        /// Extra fields found in the key object, preserved for `key_id` calculation.
        _extra: HashMap<String, Value>,
    },
    /// An RSA public key.
    Rsa {
        /// The key's SubjectPublicKeyInfo DER (hex-encoded) and any unrecognized fields.
        keyval: RsaKey,
        /// The signing scheme; always `rsassa-pss-sha256`.
        scheme: RsaScheme,
        /// Extra fields found in the key object, preserved for `key_id` calculation.
        _extra: HashMap<String, Value>,
    },
    /// An ECDSA (NIST P-256) public key.
    Ecdsa {
        /// The key's SubjectPublicKeyInfo DER (hex-encoded) and any unrecognized fields.
        keyval: EcdsaKey,
        /// The signing scheme; always `ecdsa-sha2-nistp256`.
        scheme: EcdsaScheme,
        /// Extra fields found in the key object, preserved for `key_id` calculation.
        _extra: HashMap<String, Value>,
    },
    /// A key whose `keytype` isn't one this client supports, preserved verbatim.
    ///
    /// [`Key::verify`] always fails for this variant; combined with `verify_signed`'s policy of
    /// skipping signatures whose key doesn't verify, a signature made with (or a threshold that
    /// depends on) a key of unknown type is simply treated as absent, never as a parse failure.
    Unknown(Value),
}

/// The subset of [`Key`] this client actually knows how to verify with, used only to drive
/// (de)serialization of the three recognized `keytype` values through serde's internally tagged
/// enum representation.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "keytype")]
enum KnownKey {
    #[serde(rename = "ed25519")]
    Ed25519 {
        keyval: Ed25519Key,
        scheme: Ed25519Scheme,
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
    #[serde(rename = "rsa")]
    Rsa {
        keyval: RsaKey,
        scheme: RsaScheme,
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
    #[serde(rename = "ecdsa-sha2-nistp256")]
    Ecdsa {
        keyval: EcdsaKey,
        scheme: EcdsaScheme,
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
}

impl From<KnownKey> for Key {
    fn from(known: KnownKey) -> Self {
        match known {
            KnownKey::Ed25519 {
                keyval,
                scheme,
                _extra,
            } => Key::Ed25519 {
                keyval,
                scheme,
                _extra,
            },
            KnownKey::Rsa {
                keyval,
                scheme,
                _extra,
            } => Key::Rsa {
                keyval,
                scheme,
                _extra,
            },
            KnownKey::Ecdsa {
                keyval,
                scheme,
                _extra,
            } => Key::Ecdsa {
                keyval,
                scheme,
                _extra,
            },
        }
    }
}

const KNOWN_KEYTYPES: &[&str] = &["ed25519", "rsa", "ecdsa-sha2-nistp256"];

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let keytype = value.get("keytype").and_then(Value::as_str).unwrap_or("");
        if KNOWN_KEYTYPES.contains(&keytype) {
            let known: KnownKey = serde_json::from_value(value).map_err(D::Error::custom)?;
            Ok(known.into())
        } else {
            Ok(Key::Unknown(value))
        }
    }
}

impl Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Key::Ed25519 {
                keyval,
                scheme,
                _extra,
            } => KnownKey::Ed25519 {
                keyval: keyval.clone(),
                scheme: *scheme,
                _extra: _extra.clone(),
            }
            .serialize(serializer),
            Key::Rsa {
                keyval,
                scheme,
                _extra,
            } => KnownKey::Rsa {
                keyval: keyval.clone(),
                scheme: *scheme,
                _extra: _extra.clone(),
            }
            .serialize(serializer),
            Key::Ecdsa {
                keyval,
                scheme,
                _extra,
            } => KnownKey::Ecdsa {
                keyval: keyval.clone(),
                scheme: *scheme,
                _extra: _extra.clone(),
            }
            .serialize(serializer),
            Key::Unknown(value) => value.serialize(serializer),
        }
    }
}

/// The `keyval` object for an [`Key::Ed25519`] key.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Ed25519Key {
    /// The raw 32-byte public key point.
    pub public: Decoded<Hex>,
    /// Extra fields found in the `keyval` object.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// The `keyval` object for a [`Key::Rsa`] key.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RsaKey {
    /// The key's SubjectPublicKeyInfo, DER-encoded.
    pub public: Decoded<Hex>,
    /// Extra fields found in the `keyval` object.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// The `keyval` object for an [`Key::Ecdsa`] key.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EcdsaKey {
    /// The key's SubjectPublicKeyInfo, DER-encoded.
    pub public: Decoded<Hex>,
    /// Extra fields found in the `keyval` object.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// The signing scheme for an [`Key::Ed25519`] key. There is only one.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum Ed25519Scheme {
    /// `ed25519`
    #[serde(rename = "ed25519")]
    Ed25519,
}

/// The signing scheme for a [`Key::Rsa`] key. There is only one we support.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum RsaScheme {
    /// `rsassa-pss-sha256`
    #[serde(rename = "rsassa-pss-sha256")]
    RsassaPssSha256,
}

/// The signing scheme for an [`Key::Ecdsa`] key. There is only one we support.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum EcdsaScheme {
    /// `ecdsa-sha2-nistp256`
    #[serde(rename = "ecdsa-sha2-nistp256")]
    EcdsaSha2Nistp256,
}

impl Key {
    /// Computes this key's ID: the SHA-256 digest of the key object's own canonical JSON form.
    pub fn key_id(&self) -> Result<Decoded<Hex>> {
        let mut data = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .context(error::JsonSerialization { what: "key" })?;
        let digest = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, &data);
        Ok(digest.as_ref().to_vec().into())
    }

    /// Verifies `sig` as a signature over `msg` made by this key, per its declared scheme.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> Result<()> {
        match self {
            Key::Ed25519 { keyval, .. } => {
                verify_with(&signature::ED25519, &keyval.public, msg, sig)
            }
            Key::Rsa { keyval, .. } => {
                let raw = spki::rsa_public_key(&keyval.public)?;
                verify_with(&signature::RSA_PSS_2048_8192_SHA256, &raw, msg, sig)
            }
            Key::Ecdsa { keyval, .. } => {
                let raw = spki::ecdsa_p256_public_key(&keyval.public)?;
                verify_with(&signature::ECDSA_P256_SHA256_ASN1, &raw, msg, sig)
            }
            Key::Unknown(_) => error::KeyUnrecognized.fail(),
        }
    }
}

fn verify_with(
    algorithm: &'static dyn VerificationAlgorithm,
    public_key: &[u8],
    msg: &[u8],
    sig: &[u8],
) -> Result<()> {
    let key = UnparsedPublicKey::new(algorithm, public_key);
    ensure!(
        key.verify(msg, sig).is_ok(),
        error::SignatureVerification {
            keyid: hex::encode(public_key),
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_lc_rs::rand::SystemRandom;
    use aws_lc_rs::signature::{Ed25519KeyPair, KeyPair};

    #[test]
    fn ed25519_verifies_a_real_signature() {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let msg = b"hello canonical world";
        let sig = pair.sign(msg);

        let key = Key::Ed25519 {
            keyval: Ed25519Key {
                public: pair.public_key().as_ref().to_vec().into(),
                _extra: HashMap::new(),
            },
            scheme: Ed25519Scheme::Ed25519,
            _extra: HashMap::new(),
        };

        key.verify(msg, sig.as_ref()).unwrap();
        assert!(key.verify(b"tampered", sig.as_ref()).is_err());
    }

    #[test]
    fn key_id_is_stable_for_identical_keys() {
        let key = Key::Ed25519 {
            keyval: Ed25519Key {
                public: vec![1; 32].into(),
                _extra: HashMap::new(),
            },
            scheme: Ed25519Scheme::Ed25519,
            _extra: HashMap::new(),
        };
        assert_eq!(key.key_id().unwrap(), key.clone().key_id().unwrap());
    }

    #[test]
    fn unknown_keytype_parses_but_never_verifies() {
        let key: Key = serde_json::from_value(serde_json::json!({
            "keytype": "sphincs+",
            "scheme": "sphincs+-shake-256",
            "keyval": { "public": "deadbeef" },
        }))
        .unwrap();
        assert!(matches!(key, Key::Unknown(_)));
        assert!(key.verify(b"msg", b"sig").is_err());
        // Round-trips back to the same JSON shape rather than being wrapped or lossy.
        let back = serde_json::to_value(&key).unwrap();
        assert_eq!(back["keytype"], "sphincs+");
    }
}
