//! `Read` adapters that enforce the two properties every fetch from a remote store needs: a
//! hard cap on the number of bytes read, and a running digest checked against an expected hash
//! once the stream is exhausted.
//!
//! A streaming reader that copies at most `max` bytes, and a
//! hash-verifying reader that computes declared algorithms on the fly". All callers consuming
//! untrusted bytes wrap the source in these readers before parsing, never parse straight off
//! the transport.

use crate::error::{self, Result};
use crate::schema::{HashAlgorithm, Hashes};
use snafu::{ensure, ResultExt};
use std::io::{Cursor, Read};

/// Wraps a `Read` and fails as soon as more than `max_size` bytes have been read from it.
///
/// This guards against a server streaming an unbounded or unexpectedly large response body for
/// a file whose declared size we don't fully trust yet (or don't have at all).
pub(crate) struct LengthCappedRead<R> {
    inner: R,
    max_size: u64,
    read_so_far: u64,
}

impl<R: Read> LengthCappedRead<R> {
    pub(crate) fn new(inner: R, max_size: u64) -> Self {
        Self {
            inner,
            max_size,
            read_so_far: 0,
        }
    }

    pub(crate) fn read_so_far(&self) -> u64 {
        self.read_so_far
    }
}

impl<R: Read> Read for LengthCappedRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read_so_far += n as u64;
        if self.read_so_far > self.max_size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "exceeded the maximum allowed size",
            ));
        }
        Ok(n)
    }
}

/// Reads `reader` to the end, hard-failing with [`error::Error::MetaTooLarge`] once more than
/// `max_size` bytes have been produced. Used for metadata whose exact length isn't known ahead
/// of time (root.json, timestamp.json, and targets/snapshot when the parent role omits length).
pub(crate) fn fetch_capped<R: Read>(reader: R, max_size: u64, name: &str) -> Result<Vec<u8>> {
    let mut capped = LengthCappedRead::new(reader, max_size);
    let mut buf = Vec::new();
    match capped.read_to_end(&mut buf) {
        Ok(_) => Ok(buf),
        Err(err) => {
            if capped.read_so_far() > max_size {
                error::MetaTooLarge {
                    name: name.to_string(),
                    size: capped.read_so_far(),
                    max: max_size,
                }
                .fail()
            } else {
                Err(err).context(error::FileRead {
                    what: name.to_string(),
                })
            }
        }
    }
}

/// Wraps a `Read`, accumulating one running digest per algorithm declared in the expected
/// [`Hashes`] (always `sha256`, plus `sha512` when the repository provided one). Call
/// [`HashingRead::finish`] once the stream is exhausted to check every accumulated digest (and,
/// if known, the total length) against the expected values.
pub(crate) struct HashingRead<R> {
    inner: R,
    contexts: Vec<(HashAlgorithm, aws_lc_rs::digest::Context)>,
    total_read: u64,
}

impl<R: Read> HashingRead<R> {
    pub(crate) fn new(inner: R, hashes: &Hashes) -> Self {
        let contexts = hashes
            .known_digests()
            .map(|(algo, _)| (algo, aws_lc_rs::digest::Context::new(algo.ring_algorithm())))
            .collect();
        Self {
            inner,
            contexts,
            total_read: 0,
        }
    }

    /// Consumes the adapter, checking every accumulated digest and (if given) the total length
    /// against what was expected.
    pub(crate) fn finish(
        self,
        what: &str,
        hashes: &Hashes,
        expected_length: Option<u64>,
    ) -> Result<()> {
        if let Some(expected) = expected_length {
            ensure!(
                self.total_read == expected,
                error::WrongSize {
                    name: what,
                    actual: self.total_read,
                    expected,
                }
            );
        }
        for (algo, context) in self.contexts {
            let digest = context.finish();
            let expected = hashes
                .known_digests()
                .find(|(a, _)| *a == algo)
                .map(|(_, d)| d)
                .expect("a context was only ever created for a digest the hashes record has");
            ensure!(
                digest.as_ref() == expected.as_ref(),
                error::WrongHash {
                    name: what,
                    actual: hex::encode(digest.as_ref()),
                    expected: hex::encode(expected.as_ref()),
                }
            );
        }
        Ok(())
    }
}

impl<R: Read> Read for HashingRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        for (_, context) in &mut self.contexts {
            context.update(&buf[..n]);
        }
        self.total_read += n as u64;
        Ok(n)
    }
}

/// Reads `reader` to the end, enforcing `length` exactly and verifying every digest declared in
/// `hashes` before returning the bytes. This is the composition used for every
/// fetch whose parent role declared both a length and a set of hashes: snapshot.json,
/// targets.json (when hashed), and downloaded targets themselves.
pub(crate) fn fetch_hashed<R: Read>(
    reader: R,
    length: u64,
    hashes: &Hashes,
    name: &str,
) -> Result<Vec<u8>> {
    let buf = fetch_capped(reader, length, name)?;
    ensure!(
        buf.len() as u64 == length,
        error::WrongSize {
            name: name.to_string(),
            actual: buf.len() as u64,
            expected: length,
        }
    );

    let mut hashing = HashingRead::new(Cursor::new(&buf), hashes);
    std::io::copy(&mut hashing, &mut std::io::sink()).context(error::FileRead {
        what: name.to_string(),
    })?;
    hashing.finish(name, hashes, None)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;

    fn sha256_hashes(data: &[u8]) -> Hashes {
        let digest = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, data);
        Hashes {
            sha256: digest.as_ref().to_vec().into(),
            sha512: None,
            _extra: HashMap::new(),
        }
    }

    #[test]
    fn length_capped_read_allows_exact_size() {
        let data = vec![0u8; 128];
        let mut r = LengthCappedRead::new(Cursor::new(data), 128);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 128);
    }

    #[test]
    fn length_capped_read_rejects_oversized_stream() {
        let data = vec![0u8; 129];
        let mut r = LengthCappedRead::new(Cursor::new(data), 128);
        let mut out = Vec::new();
        assert!(r.read_to_end(&mut out).is_err());
    }

    #[test]
    fn fetch_capped_reports_meta_too_large() {
        let data = vec![0u8; 129];
        let err = fetch_capped(Cursor::new(data), 128, "root.json").unwrap_err();
        assert!(matches!(err, error::Error::MetaTooLarge { .. }));
    }

    #[test]
    fn hashing_read_detects_mismatch() {
        let data = b"hello world".to_vec();
        let bogus = sha256_hashes(b"not the same bytes");
        let mut r = HashingRead::new(Cursor::new(data), &bogus);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert!(r.finish("test", &bogus, None).is_err());
    }

    #[test]
    fn hashing_read_accepts_correct_digest() {
        let data = b"hello world".to_vec();
        let hashes = sha256_hashes(&data);
        let mut r = HashingRead::new(Cursor::new(data.clone()), &hashes);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        r.finish("test", &hashes, Some(data.len() as u64)).unwrap();
    }

    #[test]
    fn hashing_read_checks_sha512_when_declared() {
        let data = b"hello world".to_vec();
        let mut hashes = sha256_hashes(&data);
        let sha512 = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA512, &data);
        hashes.sha512 = Some(sha512.as_ref().to_vec().into());
        let mut r = HashingRead::new(Cursor::new(data.clone()), &hashes);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        r.finish("test", &hashes, None).unwrap();

        let mut tampered = hashes.clone();
        tampered.sha512 = Some(vec![0u8; 64].into());
        let mut r = HashingRead::new(Cursor::new(data), &tampered);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert!(r.finish("test", &tampered, None).is_err());
    }

    #[test]
    fn fetch_hashed_accepts_matching_length_and_hash() {
        let data = b"snapshot bytes".to_vec();
        let hashes = sha256_hashes(&data);
        let out = fetch_hashed(Cursor::new(data.clone()), data.len() as u64, &hashes, "snapshot.json")
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn fetch_hashed_rejects_short_read() {
        let data = b"snapshot bytes".to_vec();
        let hashes = sha256_hashes(&data);
        let err = fetch_hashed(Cursor::new(data.clone()), data.len() as u64 + 1, &hashes, "snapshot.json")
            .unwrap_err();
        assert!(matches!(err, error::Error::WrongSize { .. }));
    }

    #[test]
    fn fetch_hashed_rejects_hash_mismatch() {
        let data = b"snapshot bytes".to_vec();
        let bogus = sha256_hashes(b"different bytes");
        let err = fetch_hashed(Cursor::new(data.clone()), data.len() as u64, &bogus, "snapshot.json")
            .unwrap_err();
        assert!(matches!(err, error::Error::WrongHash { .. }));
    }
}
