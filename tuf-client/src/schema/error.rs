//! Errors that can occur while parsing or verifying TUF metadata objects.

use crate::schema::RoleType;
use snafu::{Backtrace, Snafu};
use std::num::NonZeroU64;

/// Alias for `std::result::Result<T, schema::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing or verifying the signed metadata objects that make up
/// a TUF repository (`root.json`, `timestamp.json`, `snapshot.json`, `targets.json`).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
#[non_exhaustive]
pub enum Error {
    /// A role's signed content could not be serialized into its canonical form.
    #[snafu(display("Failed to serialize {what} to JSON: {source}"))]
    JsonSerialization {
        /// What we were trying to serialize.
        what: String,
        /// The underlying serde_json error.
        source: serde_json::Error,
        /// Backtrace.
        backtrace: Backtrace,
    },

    /// A key's declared ID did not match the ID calculated from its content.
    #[snafu(display("Key ID mismatch: expected {keyid}, calculated {calculated}"))]
    InvalidKeyId {
        /// The key ID as declared in the metadata.
        keyid: String,
        /// The key ID we calculated from the key's content.
        calculated: String,
    },

    /// The same key ID appeared more than once in a single role's key list.
    #[snafu(display("Duplicate key ID: {keyid}"))]
    DuplicateKeyId {
        /// The duplicated key ID.
        keyid: String,
    },

    /// A target was requested that isn't listed in the trusted targets role.
    #[snafu(display("Target {name:?} not found in targets metadata at version {snapshot_version}"))]
    UnknownTarget {
        /// The requested target path.
        name: String,
        /// The version of the targets metadata that was searched.
        snapshot_version: NonZeroU64,
    },

    /// A key's `keyval.public` field could not be hex-decoded.
    #[snafu(display("Invalid hex in key material: {source}"))]
    KeyHexDecode {
        /// The underlying hex decode error.
        source: hex::FromHexError,
        /// Backtrace.
        backtrace: Backtrace,
    },

    /// A key's declared scheme isn't supported by this client.
    #[snafu(display("Unrecognized key type/scheme combination"))]
    KeyUnrecognized {
        /// Backtrace.
        backtrace: Backtrace,
    },

    /// An RSA or ECDSA public key's SubjectPublicKeyInfo DER could not be parsed.
    #[snafu(display("Invalid SubjectPublicKeyInfo: {source}"))]
    SpkiDecode {
        /// The underlying SPKI/DER parsing error.
        source: Box<dyn std::error::Error + Send + Sync>,
        /// Backtrace.
        backtrace: Backtrace,
    },

    /// A key's SubjectPublicKeyInfo declared an algorithm OID we don't support.
    #[snafu(display("Unsupported public key algorithm OID: {oid}"))]
    SpkiUnsupportedAlgorithm {
        /// The unsupported OID, as a dotted string.
        oid: String,
    },

    /// A signature did not verify against the role's canonical form for the given key.
    #[snafu(display("Signature verification failed for key {keyid}"))]
    SignatureVerification {
        /// The key ID that failed to verify.
        keyid: String,
    },

    /// Too few valid signatures were found to meet a role's threshold.
    #[snafu(display(
        "Signature threshold not met: needed {threshold}, got {valid} valid signature(s)"
    ))]
    SignatureThreshold {
        /// The number of valid signatures required.
        threshold: NonZeroU64,
        /// The number of valid signatures actually found.
        valid: u64,
    },

    /// A decoded hex string had the wrong length for the scheme-specific key/signature layout it
    /// was interpreted as.
    #[snafu(display("Expected {expected} bytes of {what}, found {actual}"))]
    WrongLength {
        /// What was being decoded.
        what: String,
        /// The expected length.
        expected: usize,
        /// The actual length found.
        actual: usize,
    },

    /// A root role's key list names a key ID that isn't present in the root's `keys` map.
    #[snafu(display("role {role} lists key ID {keyid} which is not in root's key map"))]
    RoleKeyMissing {
        /// The role whose key list is malformed.
        role: RoleType,
        /// The dangling key ID.
        keyid: String,
    },

    /// A root role's threshold is higher than the number of keys it lists, so it could never be
    /// satisfied even if every listed key signed.
    #[snafu(display(
        "role {role} requires {threshold} signatures but only lists {available} key(s)"
    ))]
    UnsatisfiableThreshold {
        /// The role with the unsatisfiable threshold.
        role: RoleType,
        /// The declared threshold.
        threshold: NonZeroU64,
        /// The number of keys actually listed for the role.
        available: usize,
    },
}
