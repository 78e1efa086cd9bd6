//! Unwraps `SubjectPublicKeyInfo` (SPKI) DER, the envelope RSA and ECDSA public keys are
//! typically distributed in, down to the raw key bytes `aws-lc-rs` wants for verification.
//!
//! Ed25519 keys don't need this: their `keyval.public` is already the raw 32-byte point.

use crate::schema::error::{self, Result};
use snafu::{ensure, ResultExt};
use spki::der::oid::ObjectIdentifier;
use spki::der::Decode;
use spki::SubjectPublicKeyInfoRef;

const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const PRIME256V1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");

/// Parses `der` as a `SubjectPublicKeyInfo` wrapping an RSA key, returning the inner PKCS#1
/// `RSAPublicKey` DER bytes that `aws-lc-rs`'s RSA verification algorithms expect.
pub(super) fn rsa_public_key(der: &[u8]) -> Result<Vec<u8>> {
    let spki = SubjectPublicKeyInfoRef::try_from(der).context(error::SpkiDecode)?;
    ensure!(
        spki.algorithm.oid == RSA_ENCRYPTION,
        error::SpkiUnsupportedAlgorithm {
            oid: spki.algorithm.oid.to_string(),
        }
    );
    Ok(spki
        .subject_public_key
        .as_bytes()
        .unwrap_or_default()
        .to_vec())
}

/// Parses `der` as a `SubjectPublicKeyInfo` wrapping a NIST P-256 ECDSA key, returning the raw
/// uncompressed curve point (`0x04 || X || Y`) that `aws-lc-rs`'s ECDSA verification algorithms
/// expect.
pub(super) fn ecdsa_p256_public_key(der: &[u8]) -> Result<Vec<u8>> {
    let spki = SubjectPublicKeyInfoRef::try_from(der).context(error::SpkiDecode)?;
    ensure!(
        spki.algorithm.oid == EC_PUBLIC_KEY,
        error::SpkiUnsupportedAlgorithm {
            oid: spki.algorithm.oid.to_string(),
        }
    );
    let params = spki
        .algorithm
        .parameters
        .ok_or(spki::Error::KeyMalformed)
        .context(error::SpkiDecode)?;
    let curve_oid: ObjectIdentifier = params.decode_as().context(error::SpkiDecode)?;
    ensure!(
        curve_oid == PRIME256V1,
        error::SpkiUnsupportedAlgorithm {
            oid: curve_oid.to_string(),
        }
    );
    Ok(spki
        .subject_public_key
        .as_bytes()
        .unwrap_or_default()
        .to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_der() {
        assert!(rsa_public_key(&[0, 1, 2, 3]).is_err());
        assert!(ecdsa_p256_public_key(&[0, 1, 2, 3]).is_err());
    }
}
