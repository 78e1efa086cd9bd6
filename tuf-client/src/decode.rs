//! Decodes a signed metadata envelope and walks it through the checks required
//! before the result can be trusted: parse, signature threshold, version, and expiry, as one
//! reusable function shared by the timestamp/snapshot/targets refresh steps instead of being
//! duplicated at each.

use crate::error::{self, Result};
use crate::keydb::KeyDb;
use crate::schema::{Role, RoleType, Signed};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use snafu::{ensure, ResultExt};
use std::num::NonZeroU64;

/// Parses, verifies, and bounds-checks one role's metadata bytes.
///
/// `min_version` rejects anything strictly older than the version currently trusted (an equal
/// version succeeds and is treated as a no-op by the caller); `allow_expired` is set only by
/// [`crate::client::Client::init`]'s root bootstrap, which must tolerate an expired root until
/// the first successful `update()`.
pub(crate) fn decode_and_verify<T>(
    role: RoleType,
    bytes: &[u8],
    keydb: &KeyDb,
    min_version: NonZeroU64,
    now: DateTime<Utc>,
    allow_expired: bool,
) -> Result<Signed<T>>
where
    T: Role + DeserializeOwned,
{
    let signed: Signed<T> =
        serde_json::from_slice(bytes).context(error::ParseMetadata { role })?;

    keydb
        .verify_threshold(role, &signed)
        .context(error::Verify { role })?;

    ensure!(
        signed.signed.version() >= min_version,
        error::OlderMetadata {
            role,
            current: min_version,
            new: signed.signed.version(),
        }
    );

    if !allow_expired {
        ensure!(
            signed.signed.expires() > now,
            error::ExpiredMetadata {
                role,
                expiration: signed.signed.expires(),
            }
        );
    }

    Ok(signed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::key::{Ed25519Key, Ed25519Scheme};
    use crate::schema::{key::Key, Root, Signature, Timestamp};
    use aws_lc_rs::rand::SystemRandom;
    use aws_lc_rs::signature::{Ed25519KeyPair, KeyPair};
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    fn v(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    /// Builds a one-key, threshold-1 `KeyDb` trusting `pair` for `timestamp`, plus a signed
    /// timestamp at `version`/`expires` made with that key.
    fn fixture(
        pair: &Ed25519KeyPair,
        version: u64,
        expires: DateTime<Utc>,
    ) -> (KeyDb, Signed<Timestamp>) {
        let key = Key::Ed25519 {
            keyval: Ed25519Key {
                public: pair.public_key().as_ref().to_vec().into(),
                _extra: HashMap::new(),
            },
            scheme: Ed25519Scheme::Ed25519,
            _extra: HashMap::new(),
        };
        let keyid = key.key_id().unwrap();
        let root: Root = serde_json::from_value(serde_json::json!({
            "_type": "root",
            "spec_version": "1.0.0",
            "consistent_snapshot": false,
            "version": 1,
            "expires": (Utc::now() + Duration::days(1)).to_rfc3339(),
            "keys": { hex::encode(keyid.as_ref()): serde_json::to_value(&key).unwrap() },
            "roles": {
                "timestamp": { "keyids": [hex::encode(keyid.as_ref())], "threshold": 1 },
            },
        }))
        .unwrap();
        let keydb = KeyDb::from_root(&root);

        let timestamp = Timestamp::new("1.0.0".to_string(), v(version), expires);
        let msg = timestamp.canonical_form().unwrap();
        let sig = pair.sign(&msg);
        let signed = Signed {
            signed: timestamp,
            signatures: vec![Signature {
                keyid,
                sig: sig.as_ref().to_vec().into(),
            }],
        };
        (keydb, signed)
    }

    #[test]
    fn accepts_equal_version_as_a_no_op() {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let (keydb, signed) = fixture(&pair, 3, now + Duration::days(1));
        let bytes = serde_json::to_vec(&signed).unwrap();

        let result =
            decode_and_verify::<Timestamp>(RoleType::Timestamp, &bytes, &keydb, v(3), now, false)
                .unwrap();
        assert_eq!(result.signed.version, v(3));
    }

    #[test]
    fn rejects_version_regression() {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let (keydb, signed) = fixture(&pair, 1, now + Duration::days(1));
        let bytes = serde_json::to_vec(&signed).unwrap();

        let err =
            decode_and_verify::<Timestamp>(RoleType::Timestamp, &bytes, &keydb, v(2), now, false)
                .unwrap_err();
        assert!(matches!(err, error::Error::OlderMetadata { .. }));
    }

    #[test]
    fn rejects_expired_metadata_unless_allowed() {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let (keydb, signed) = fixture(&pair, 1, now - Duration::days(1));
        let bytes = serde_json::to_vec(&signed).unwrap();

        let err =
            decode_and_verify::<Timestamp>(RoleType::Timestamp, &bytes, &keydb, v(1), now, false)
                .unwrap_err();
        assert!(matches!(err, error::Error::ExpiredMetadata { .. }));

        decode_and_verify::<Timestamp>(RoleType::Timestamp, &bytes, &keydb, v(1), now, true)
            .unwrap();
    }
}
