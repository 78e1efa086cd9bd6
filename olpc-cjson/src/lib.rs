// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A [`serde_json::ser::Formatter`] that serializes values as [OLPC-style canonical JSON].
//!
//! Canonical JSON fixes everything that plain JSON leaves up to the writer: object keys are
//! sorted, there is no insignificant whitespace, and floating point numbers are rejected outright
//! (TUF metadata only ever contains integers). The result is suitable as the pre-image for a
//! signature: two writers of the same logical document always produce the same bytes.
//!
//! [OLPC-style canonical JSON]: http://wiki.laptop.org/go/Canonical_JSON

use serde_json::ser::{CompactFormatter, Formatter};
use std::io;
use unicode_normalization::UnicodeNormalization;

/// A [`Formatter`] that serializes object keys in sorted order and forbids floating point
/// numbers, producing canonical JSON suitable for hashing and signing.
///
/// Use with [`serde_json::Serializer::with_formatter`]:
///
/// ```
/// use olpc_cjson::CanonicalFormatter;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Example {
///     z: u8,
///     a: u8,
/// }
///
/// let mut buf = Vec::new();
/// let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
/// Example { z: 1, a: 2 }.serialize(&mut ser).unwrap();
/// assert_eq!(buf, br#"{"a":2,"z":1}"#);
/// ```
#[derive(Debug, Default)]
pub struct CanonicalFormatter {
    /// Stack of buffers currently capturing output instead of writing it straight through. The
    /// top of the stack is wherever the next byte should land: a pending object key, a pending
    /// object value, or (if empty) the real writer.
    buffers: Vec<Vec<u8>>,
    /// Stack of in-progress objects: one entry per currently open `{`, holding the
    /// `(key_bytes, value_bytes)` pairs collected so far in write order. Sorted and flushed at
    /// the matching `end_object`.
    objects: Vec<Vec<(Vec<u8>, Vec<u8>)>>,
    /// The most recently finished object key, awaiting its value.
    pending_key: Option<Vec<u8>>,
}

impl CanonicalFormatter {
    /// Creates a new `CanonicalFormatter`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `bytes` to the innermost active capture buffer, or straight to `writer` if nothing
    /// is currently being captured.
    fn route<W: ?Sized + io::Write>(&mut self, writer: &mut W, bytes: &[u8]) -> io::Result<()> {
        if let Some(buf) = self.buffers.last_mut() {
            buf.extend_from_slice(bytes);
            Ok(())
        } else {
            writer.write_all(bytes)
        }
    }

    /// Runs a [`CompactFormatter`] method against a scratch buffer and routes the resulting bytes.
    /// This lets us reuse `serde_json`'s correct number/escape formatting without reimplementing
    /// it, while still supporting redirection into a pending key/value capture.
    fn via_compact<W, F>(&mut self, writer: &mut W, f: F) -> io::Result<()>
    where
        W: ?Sized + io::Write,
        F: FnOnce(&mut CompactFormatter, &mut Vec<u8>) -> io::Result<()>,
    {
        let mut scratch = Vec::new();
        f(&mut CompactFormatter, &mut scratch)?;
        self.route(writer, &scratch)
    }
}

impl Formatter for CanonicalFormatter {
    fn write_null<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.write_null(w))
    }

    fn write_bool<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: bool) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.write_bool(w, value))
    }

    fn write_i8<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: i8) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.write_i8(w, value))
    }

    fn write_i16<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: i16) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.write_i16(w, value))
    }

    fn write_i32<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: i32) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.write_i32(w, value))
    }

    fn write_i64<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: i64) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.write_i64(w, value))
    }

    fn write_i128<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: i128) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.write_i128(w, value))
    }

    fn write_u8<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: u8) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.write_u8(w, value))
    }

    fn write_u16<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: u16) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.write_u16(w, value))
    }

    fn write_u32<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: u32) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.write_u32(w, value))
    }

    fn write_u64<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: u64) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.write_u64(w, value))
    }

    fn write_u128<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: u128) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.write_u128(w, value))
    }

    fn write_f32<W: ?Sized + io::Write>(&mut self, _writer: &mut W, _value: f32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "floating point numbers are not representable in canonical JSON",
        ))
    }

    fn write_f64<W: ?Sized + io::Write>(&mut self, _writer: &mut W, _value: f64) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "floating point numbers are not representable in canonical JSON",
        ))
    }

    fn write_number_str<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        value: &str,
    ) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.write_number_str(w, value))
    }

    fn begin_string<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.begin_string(w))
    }

    fn end_string<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.end_string(w))
    }

    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        let normalized: String = fragment.nfc().collect();
        self.via_compact(writer, |f, w| f.write_string_fragment(w, &normalized))
    }

    fn write_char_escape<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        char_escape: serde_json::ser::CharEscape,
    ) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.write_char_escape(w, char_escape))
    }

    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.begin_array(w))
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.end_array(w))
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.begin_array_value(w, first))
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.via_compact(writer, |f, w| f.end_array_value(w))
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        self.objects.push(Vec::new());
        Ok(())
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        let mut entries = self
            .objects
            .pop()
            .expect("end_object called without matching begin_object");
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut out = Vec::new();
        out.push(b'{');
        for (i, (key, value)) in entries.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            out.extend_from_slice(key);
            out.push(b':');
            out.extend_from_slice(value);
        }
        out.push(b'}');
        self.route(writer, &out)
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        _writer: &mut W,
        _first: bool,
    ) -> io::Result<()> {
        self.buffers.push(Vec::new());
        Ok(())
    }

    fn end_object_key<W: ?Sized + io::Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        let key = self
            .buffers
            .pop()
            .expect("end_object_key called without matching begin_object_key");
        self.pending_key = Some(key);
        Ok(())
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        self.buffers.push(Vec::new());
        Ok(())
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        let value = self
            .buffers
            .pop()
            .expect("end_object_value called without matching begin_object_value");
        let key = self
            .pending_key
            .take()
            .expect("end_object_value called without a pending key");
        self.objects
            .last_mut()
            .expect("end_object_value called without an open object")
            .push((key, value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::CanonicalFormatter;
    use serde::Serialize;
    use std::collections::HashMap;

    fn canonicalize<T: Serialize>(value: &T) -> String {
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
        value.serialize(&mut ser).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn sorts_object_keys() {
        let mut map = HashMap::new();
        map.insert("z", 1);
        map.insert("a", 2);
        map.insert("m", 3);
        assert_eq!(canonicalize(&map), r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn sorts_nested_object_keys() {
        #[derive(Serialize)]
        struct Outer {
            z: HashMap<&'static str, i32>,
            a: i32,
        }
        let mut inner = HashMap::new();
        inner.insert("y", 2);
        inner.insert("x", 1);
        let outer = Outer { z: inner, a: 0 };
        assert_eq!(canonicalize(&outer), r#"{"a":0,"z":{"x":1,"y":2}}"#);
    }

    #[test]
    fn preserves_array_order() {
        assert_eq!(canonicalize(&vec![3, 1, 2]), "[3,1,2]");
    }

    #[test]
    fn no_insignificant_whitespace() {
        #[derive(Serialize)]
        struct S {
            a: i32,
            b: Vec<i32>,
        }
        assert_eq!(
            canonicalize(&S {
                a: 1,
                b: vec![1, 2]
            }),
            r#"{"a":1,"b":[1,2]}"#
        );
    }

    #[test]
    fn rejects_floats() {
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
        assert!(1.5_f64.serialize(&mut ser).is_err());
    }

    #[test]
    fn normalizes_unicode_strings() {
        // "é" (e + combining acute accent) should normalize to "é" (é) under NFC.
        let decomposed = "e\u{0301}";
        let composed = "\u{00e9}";
        assert_eq!(canonicalize(&decomposed), canonicalize(&composed));
    }
}
