//! The trusted-key database: the set of keys and thresholds a given root metadata file
//! authorizes for each top-level role, rebuilt fresh every time a new root is accepted.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::key::Key;
use crate::schema::{Role, RoleType, Root, Signed};
use std::collections::HashMap;
use std::num::NonZeroU64;

/// The keys and threshold authorized for one role.
#[derive(Debug, Clone)]
pub(crate) struct RoleKeys {
    keys: HashMap<Decoded<Hex>, Key>,
    threshold: NonZeroU64,
}

/// A snapshot of which keys are trusted for which roles, derived from one root metadata file.
///
/// A fresh `KeyDb` is built from every accepted root (see [`KeyDb::from_root`]) rather than
/// mutated in place, so that the asymmetric fast-forward recovery check can compare the *old*
/// key set against the *new* one without aliasing.
#[derive(Debug, Clone, Default)]
pub(crate) struct KeyDb {
    roles: HashMap<RoleType, RoleKeys>,
}

impl KeyDb {
    /// Builds a `KeyDb` from a trusted root metadata file.
    pub(crate) fn from_root(root: &Root) -> Self {
        let mut roles = HashMap::new();
        for role in [
            RoleType::Root,
            RoleType::Timestamp,
            RoleType::Snapshot,
            RoleType::Targets,
        ] {
            let Some(threshold) = root.threshold(role) else {
                continue;
            };
            let keys = root
                .keys(role)
                .map(|(keyid, key)| (keyid.clone(), key.clone()))
                .collect();
            roles.insert(role, RoleKeys { keys, threshold });
        }
        Self { roles }
    }

    /// Returns the keys and threshold authorized for `role`, if the root declared any.
    pub(crate) fn get_role(&self, role: RoleType) -> Option<&RoleKeys> {
        self.roles.get(&role)
    }

    /// Returns the verifier for `keyid` if `role` authorizes it.
    pub(crate) fn get_verifier(&self, role: RoleType, keyid: &Decoded<Hex>) -> Option<&Key> {
        self.roles.get(&role)?.keys.get(keyid)
    }

    /// Verifies that `signed`'s signatures meet the threshold this database authorizes for
    /// `role`. Unknown key-ids are skipped rather than rejected, matching the envelope's
    /// tolerant-by-design handling of signatures from keys the current root doesn't recognize.
    pub(crate) fn verify_threshold<T: Role>(
        &self,
        role: RoleType,
        signed: &Signed<T>,
    ) -> crate::schema::Result<()> {
        let Some(role_keys) = self.get_role(role) else {
            return Err(crate::schema::Error::SignatureThreshold {
                threshold: NonZeroU64::new(1).unwrap(),
                valid: 0,
            });
        };
        let keys: HashMap<_, _> = role_keys
            .keys
            .iter()
            .map(|(keyid, key)| (keyid.clone(), key))
            .collect();
        crate::schema::verify_signed(signed, &keys, role_keys.threshold)
    }

    /// True if rotating from this (old) database to `new` drops enough of `role`'s old keys to
    /// trigger fast-forward recovery: strictly fewer than the old threshold of the old keys are
    /// still present in the new role.
    ///
    /// Root is never passed here; root key changes never trigger recovery regardless of how many
    /// keys rotate.
    pub(crate) fn fast_forward_triggered(&self, new: &Self, role: RoleType) -> bool {
        let Some(old_role) = self.get_role(role) else {
            return false;
        };
        let remaining = match new.get_role(role) {
            Some(new_role) => old_role
                .keys
                .keys()
                .filter(|keyid| new_role.keys.contains_key(*keyid))
                .count() as u64,
            None => 0,
        };
        remaining < old_role.threshold.get()
    }
}

/// The role whose cached metadata is also invalidated when `role` undergoes fast-forward
/// recovery: the role one step closer to root in the signing chain, whose cached copy now
/// references a `role` version the client can no longer trust.
///
/// `root` has no parent here and is never itself a fast-forward trigger.
pub(crate) fn fast_forward_parent(role: RoleType) -> Option<RoleType> {
    match role {
        RoleType::Snapshot => Some(RoleType::Timestamp),
        RoleType::Targets => Some(RoleType::Snapshot),
        RoleType::Root | RoleType::Timestamp => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn empty_root() -> Root {
        serde_json::from_value(serde_json::json!({
            "_type": "root",
            "spec_version": "1.0.0",
            "consistent_snapshot": true,
            "version": 1,
            "expires": (Utc::now() + Duration::days(1)).to_rfc3339(),
            "keys": {},
            "roles": {},
        }))
        .unwrap()
    }

    #[test]
    fn from_root_with_no_declared_roles_has_no_roles() {
        let root = empty_root();
        let db = KeyDb::from_root(&root);
        assert!(db.get_role(RoleType::Root).is_none());
        assert!(db.get_verifier(RoleType::Root, &Decoded::<Hex>::default()).is_none());
    }
}
