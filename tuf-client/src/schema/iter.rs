//! An iterator adapter that turns a role's list of key IDs into the `(keyid, key)` pairs found
//! in the owning role's key map, silently skipping any key ID that isn't present.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::key::Key;
use std::collections::HashMap;
use std::slice;

pub(super) struct KeysIter<'a> {
    pub(super) keyids_iter: slice::Iter<'a, Decoded<Hex>>,
    pub(super) keys: &'a HashMap<Decoded<Hex>, Key>,
}

impl<'a> Iterator for KeysIter<'a> {
    type Item = (&'a Decoded<Hex>, &'a Key);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let keyid = self.keyids_iter.next()?;
            if let Some(key) = self.keys.get(keyid) {
                return Some((keyid, key));
            }
            // A role listed a key ID that isn't in the key map; skip it rather than fail, the
            // same way an unrecognized signature key ID is ignored during verification.
        }
    }
}
