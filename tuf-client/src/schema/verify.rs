//! Threshold signature verification: given a signed role and the keys trusted for it, checks
//! that enough of those keys produced a valid signature over the role's canonical form.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Result};
use crate::schema::key::Key;
use crate::schema::{Role, Signed};
use snafu::ensure;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;

/// Verifies that `signed` carries at least `threshold` valid signatures from distinct keys in
/// `keys`.
///
/// Signature entries whose key ID isn't in `keys`, and signatures that fail to verify, are
/// silently ignored rather than treated as errors: a repository is free to include signatures
/// from keys a client doesn't (yet) trust, and a single bad signature shouldn't sink an
/// otherwise-valid role as long as the threshold is still met.
pub fn verify_signed<T: Role>(
    signed: &Signed<T>,
    keys: &HashMap<Decoded<Hex>, &Key>,
    threshold: NonZeroU64,
) -> Result<()> {
    let msg = signed.signed.canonical_form()?;

    let mut satisfied = HashSet::new();
    for signature in &signed.signatures {
        if satisfied.contains(&signature.keyid) {
            continue;
        }
        let Some(key) = keys.get(&signature.keyid) else {
            continue;
        };
        if key.verify(&msg, &signature.sig).is_ok() {
            satisfied.insert(signature.keyid.clone());
        }
    }

    ensure!(
        satisfied.len() as u64 >= threshold.get(),
        error::SignatureThreshold {
            threshold,
            valid: satisfied.len() as u64,
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::key::{Ed25519Key, Ed25519Scheme};
    use crate::schema::{Signature, Timestamp};
    use aws_lc_rs::rand::SystemRandom;
    use aws_lc_rs::signature::{Ed25519KeyPair, KeyPair};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn keypair() -> Ed25519KeyPair {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap()
    }

    fn as_key(pair: &Ed25519KeyPair) -> Key {
        Key::Ed25519 {
            keyval: Ed25519Key {
                public: pair.public_key().as_ref().to_vec().into(),
                _extra: HashMap::new(),
            },
            scheme: Ed25519Scheme::Ed25519,
            _extra: HashMap::new(),
        }
    }

    fn sign(pair: &Ed25519KeyPair, keyid: &Decoded<Hex>, msg: &[u8]) -> Signature {
        Signature {
            keyid: keyid.clone(),
            sig: pair.sign(msg).as_ref().to_vec().into(),
        }
    }

    #[test]
    fn meets_threshold_with_one_of_two_signing() {
        let pair1 = keypair();
        let pair2 = keypair();
        let key1 = as_key(&pair1);
        let key2 = as_key(&pair2);
        let keyid1 = key1.key_id().unwrap();
        let keyid2 = key2.key_id().unwrap();

        let timestamp = Timestamp::new(
            "1.0.0".to_string(),
            NonZeroU64::new(1).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        );
        let msg = timestamp.canonical_form().unwrap();
        let signed = Signed {
            signatures: vec![sign(&pair1, &keyid1, &msg)],
            signed: timestamp,
        };

        let mut keys = HashMap::new();
        keys.insert(keyid1.clone(), &key1);
        keys.insert(keyid2.clone(), &key2);

        verify_signed(&signed, &keys, NonZeroU64::new(1).unwrap()).unwrap();
        assert!(verify_signed(&signed, &keys, NonZeroU64::new(2).unwrap()).is_err());
    }

    #[test]
    fn ignores_signatures_from_unknown_keys() {
        let pair1 = keypair();
        let stranger = keypair();
        let key1 = as_key(&pair1);
        let keyid1 = key1.key_id().unwrap();
        let stranger_key = as_key(&stranger);
        let stranger_id = stranger_key.key_id().unwrap();

        let timestamp = Timestamp::new(
            "1.0.0".to_string(),
            NonZeroU64::new(1).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        );
        let msg = timestamp.canonical_form().unwrap();
        let signed = Signed {
            signatures: vec![
                sign(&stranger, &stranger_id, &msg),
                sign(&pair1, &keyid1, &msg),
            ],
            signed: timestamp,
        };

        let mut keys = HashMap::new();
        keys.insert(keyid1, &key1);

        verify_signed(&signed, &keys, NonZeroU64::new(1).unwrap()).unwrap();
    }
}
