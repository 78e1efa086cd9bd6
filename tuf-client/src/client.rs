//! The stateful update engine: the orchestrator that ties together `keydb`, `decode`,
//! `datastore`, and `transport`, exposed as a long-lived, re-updatable object a caller keeps
//! around and calls `update()` on repeatedly, instead of a one-shot load consumed once at
//! startup.

use crate::datastore::LocalStore;
use crate::decode::decode_and_verify;
use crate::download::Destination;
use crate::error::{self, Result};
use crate::io;
use crate::keydb::{self, KeyDb};
use crate::schema::{Role, RoleType, Root, Signed, Snapshot, Target, Targets, Timestamp};
use crate::transport::RemoteStore;
use crate::urlpath::normalize_target_path;
use chrono::{DateTime, Utc};
use log::debug;
use snafu::{ensure, ResultExt};
use std::collections::HashMap;
use std::io::Read;
use std::num::NonZeroU64;

/// Limits used when fetching repository metadata, to bound how much an untrusted or compromised
/// repository can make this client read before any signature has even been checked.
///
/// The [`Default`] implementation matches the limits a conforming TUF client is expected to use:
/// root and timestamp are capped tightly since their size is never declared by a parent role;
/// snapshot and targets are ordinarily bounded by the size their parent role declares, with
/// `max_targets_size` only coming into play when `snapshot.json` omits it.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// The maximum allowable size in bytes for a downloaded root.json file.
    pub max_root_size: u64,

    /// The maximum allowable size in bytes for a downloaded targets.json file, used only when
    /// snapshot.json doesn't declare one.
    pub max_targets_size: u64,

    /// The maximum allowable size in bytes for the downloaded timestamp.json file.
    pub max_timestamp_size: u64,

    /// The maximum number of root.json updates to download in one root chain walk before giving
    /// up; guards against an attacker serving an endless sequence of root updates.
    pub max_root_updates: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_root_size: 512 * 1024,          // 512 KiB
            max_targets_size: 1024 * 1024 * 10, // 10 MiB
            max_timestamp_size: 16 * 1024,       // 16 KiB
            max_root_updates: 1024,
        }
    }
}

/// The targets that changed (added, or whose length/hash changed) in the most recent `update()`.
pub type TargetsDelta = HashMap<String, Target>;

/// A stateful TUF client: holds the currently trusted root, timestamp, snapshot, and targets
/// metadata, and knows how to refresh them against a remote repository.
///
/// `L` is where trusted metadata is persisted between updates (see [`LocalStore`]); `R` is how
/// the repository is actually reached (see [`RemoteStore`]). Neither is required to be the same
/// across the lifetime of a process — a caller can, for instance, initialize from an embedded
/// root and an in-memory local store on every run.
#[derive(Debug)]
pub struct Client<L: LocalStore, R: RemoteStore> {
    root: Signed<Root>,
    timestamp: Option<Signed<Timestamp>>,
    snapshot: Option<Signed<Snapshot>>,
    targets: Option<Signed<Targets>>,
    keydb: KeyDb,
    consistent_snapshot: bool,
    local: L,
    remote: R,
    limits: Limits,
    has_updated: bool,
}

impl<L: LocalStore, R: RemoteStore> Client<L, R> {
    /// Bootstraps a client from a trusted root metadata file, which the caller must ship with
    /// their software using an out-of-band process.
    ///
    /// This only establishes trust in the root; it does not fetch timestamp, snapshot, or
    /// targets metadata. Call [`Client::update`] before `targets()`/`target()`/`download()` will
    /// return anything.
    pub fn init(local: L, remote: R, root_bytes: &[u8], limits: Limits) -> Result<Self> {
        let root: Signed<Root> =
            serde_json::from_slice(root_bytes).context(error::ParseTrustedMetadata)?;
        ensure!(
            root.signed.threshold(RoleType::Root).is_some(),
            error::NoRootKeys {
                role: RoleType::Root,
            }
        );
        root.signed
            .validate_keys()
            .context(error::Verify { role: RoleType::Root })?;

        let keydb = KeyDb::from_root(&root.signed);
        keydb
            .verify_threshold(RoleType::Root, &root)
            .context(error::Verify { role: RoleType::Root })?;

        local.set("root.json", root_bytes)?;

        Ok(Self {
            consistent_snapshot: root.signed.consistent_snapshot,
            root,
            timestamp: None,
            snapshot: None,
            targets: None,
            keydb,
            local,
            remote,
            limits,
            has_updated: false,
        })
    }

    /// Refreshes trust in the root role by walking the root chain: fetches
    /// `N+1.root.json`, `N+2.root.json`, ... until the repository has nothing newer, verifying
    /// each step against both the old and new key sets and enforcing that each version is
    /// exactly one greater than the last.
    pub fn update_roots(&mut self) -> Result<()> {
        let original_version = self.root.signed.version;

        loop {
            ensure!(
                self.root.signed.version.get() < original_version.get() + self.limits.max_root_updates,
                error::MaxUpdatesExceeded {
                    max_root_updates: self.limits.max_root_updates,
                }
            );

            let expected = NonZeroU64::new(self.root.signed.version.get() + 1)
                .expect("version + 1 is never zero");
            let name = format!("{expected}.root.json");

            let (reader, _) = match self.remote.fetch_metadata(&name) {
                Ok(pair) => pair,
                Err(error::Error::NotFound { .. }) => break,
                Err(e) => return Err(e),
            };
            let bytes = io::fetch_capped(reader, self.limits.max_root_size, &name)?;

            let (new_root, new_keydb) = self.verify_root_chain_step(&bytes, expected)?;

            for role in [RoleType::Timestamp, RoleType::Snapshot, RoleType::Targets] {
                if self.keydb.fast_forward_triggered(&new_keydb, role) {
                    debug!("fast-forward recovery triggered for {role}, invalidating cached metadata");
                    self.invalidate_cached(role)?;
                    if let Some(parent) = keydb::fast_forward_parent(role) {
                        self.invalidate_cached(parent)?;
                    }
                }
            }

            self.local.set(&name, &bytes)?;
            self.local.set("root.json", &bytes)?;
            self.consistent_snapshot = new_root.signed.consistent_snapshot;
            self.root = new_root;
            self.keydb = new_keydb;
        }

        Ok(())
    }

    /// Parses and double-verifies one step of the root chain walk: `bytes` must be signed by a
    /// threshold of the *old* root's keys (continuity) and a threshold of its own declared keys
    /// (self-consistency), and must declare exactly `expected` as its version.
    fn verify_root_chain_step(
        &self,
        bytes: &[u8],
        expected: NonZeroU64,
    ) -> Result<(Signed<Root>, KeyDb)> {
        let new_root: Signed<Root> =
            serde_json::from_slice(bytes).context(error::ParseMetadata { role: RoleType::Root })?;
        new_root
            .signed
            .validate_keys()
            .context(error::RootChainVerification { version: expected })?;

        self.keydb
            .verify_threshold(RoleType::Root, &new_root)
            .context(error::RootChainVerification { version: expected })?;

        let new_keydb = KeyDb::from_root(&new_root.signed);
        new_keydb
            .verify_threshold(RoleType::Root, &new_root)
            .context(error::RootChainVerification { version: expected })?;

        ensure!(
            new_root.signed.version == expected,
            error::RootWrongVersion {
                given: new_root.signed.version,
                expected,
            }
        );

        Ok((new_root, new_keydb))
    }

    /// Drops the cached copy of `role`'s metadata, both on disk and in memory, as fast-forward
    /// recovery requires. A no-op for `Root`, whose cache is the root chain walk itself.
    fn invalidate_cached(&mut self, role: RoleType) -> Result<()> {
        match role {
            RoleType::Root => Ok(()),
            RoleType::Timestamp => {
                self.local.remove("timestamp.json")?;
                self.timestamp = None;
                Ok(())
            }
            RoleType::Snapshot => {
                self.local.remove("snapshot.json")?;
                self.snapshot = None;
                Ok(())
            }
            RoleType::Targets => {
                self.local.remove("targets.json")?;
                self.targets = None;
                Ok(())
            }
        }
    }

    /// Refreshes the client's trusted metadata: walks the root chain, then refreshes timestamp,
    /// snapshot, and targets in that order, returning the set of targets that are new or changed
    /// since the last successful `update()`.
    ///
    /// If the locally trusted root has expired, this retries exactly once after the root chain
    /// walk runs again — a repository that rotates root keys on a predictable cadence can leave
    /// a long-idle client's local root stale enough to appear expired even though a current,
    /// valid successor is one fetch away.
    pub fn update(&mut self) -> Result<TargetsDelta> {
        match self.update_once() {
            Err(error::Error::ExpiredMetadata {
                role: RoleType::Root,
                ..
            }) => self.update_once(),
            result => result,
        }
    }

    fn update_once(&mut self) -> Result<TargetsDelta> {
        self.update_roots()?;

        let now = self.local.system_time()?;
        ensure!(
            self.root.signed.expires() > now,
            error::ExpiredMetadata {
                role: RoleType::Root,
                expiration: self.root.signed.expires(),
            }
        );

        self.refresh_timestamp(now)?;
        self.refresh_snapshot(now)?;
        let delta = self.refresh_targets(now)?;

        self.has_updated = true;
        Ok(delta)
    }

    /// Fetches `name`, treating a 404 as `MissingRemoteMetadata` rather than propagating the
    /// transport's bare `NotFound` — unlike the root-chain walk's probe for `N+1.root.json`,
    /// timestamp/snapshot/targets are metadata this client *requires* to make progress, so their
    /// absence is its own distinct error rather than an expected "nothing newer" outcome.
    fn fetch_required_metadata(&self, name: &str) -> Result<(Box<dyn Read + Send>, Option<u64>)> {
        match self.remote.fetch_metadata(name) {
            Err(error::Error::NotFound { .. }) => error::MissingRemoteMetadata {
                name: name.to_string(),
            }
            .fail(),
            other => other,
        }
    }

    fn refresh_timestamp(&mut self, now: DateTime<Utc>) -> Result<()> {
        let name = "timestamp.json";
        let (reader, _) = self.fetch_required_metadata(name)?;
        let bytes = io::fetch_capped(reader, self.limits.max_timestamp_size, name)?;

        let min_version = self
            .timestamp
            .as_ref()
            .map_or_else(|| NonZeroU64::new(1).unwrap(), |s| s.signed.version);
        let signed = decode_and_verify::<Timestamp>(
            RoleType::Timestamp,
            &bytes,
            &self.keydb,
            min_version,
            now,
            false,
        )?;

        if self
            .timestamp
            .as_ref()
            .is_some_and(|old| old.signed.version == signed.signed.version)
        {
            return Ok(());
        }

        self.local.set(name, &bytes)?;
        self.timestamp = Some(signed);
        Ok(())
    }

    fn snapshot_path(&self, version: NonZeroU64) -> String {
        if self.consistent_snapshot {
            format!("{version}.snapshot.json")
        } else {
            "snapshot.json".to_string()
        }
    }

    fn targets_path(&self, version: NonZeroU64) -> String {
        if self.consistent_snapshot {
            format!("{version}.targets.json")
        } else {
            "targets.json".to_string()
        }
    }

    fn refresh_snapshot(&mut self, now: DateTime<Utc>) -> Result<()> {
        let timestamp = self
            .timestamp
            .as_ref()
            .expect("refresh_timestamp runs first");
        let meta = timestamp
            .signed
            .meta
            .get("snapshot.json")
            .ok_or(error::Error::MetaMissing {
                file: "snapshot.json",
                role: RoleType::Timestamp,
            })?
            .clone();

        let name = self.snapshot_path(meta.version);
        let (reader, _) = self.fetch_required_metadata(&name)?;
        let bytes = io::fetch_hashed(reader, meta.length, &meta.hashes, &name)?;

        let min_version = self
            .snapshot
            .as_ref()
            .map_or_else(|| NonZeroU64::new(1).unwrap(), |s| s.signed.version);
        let signed = decode_and_verify::<Snapshot>(
            RoleType::Snapshot,
            &bytes,
            &self.keydb,
            min_version,
            now,
            false,
        )?;
        ensure!(
            signed.signed.version == meta.version,
            error::VersionMismatch {
                role: RoleType::Snapshot,
                fetched: signed.signed.version,
                expected: meta.version,
            }
        );

        self.local.set("snapshot.json", &bytes)?;
        self.snapshot = Some(signed);
        Ok(())
    }

    fn refresh_targets(&mut self, now: DateTime<Utc>) -> Result<TargetsDelta> {
        let snapshot = self.snapshot.as_ref().expect("refresh_snapshot runs first");
        let meta = snapshot
            .signed
            .meta
            .get("targets.json")
            .ok_or(error::Error::MetaMissing {
                file: "targets.json",
                role: RoleType::Snapshot,
            })?
            .clone();
        // Strict resolution of the hashes-optional question: require hashes for
        // the top-level targets role even though strict TUF would tolerate their absence.
        let hashes = meta.hashes.ok_or(error::Error::MetaMissing {
            file: "targets.json hashes",
            role: RoleType::Snapshot,
        })?;
        let length = meta.length.unwrap_or(self.limits.max_targets_size);

        let name = self.targets_path(meta.version);
        let (reader, _) = self.fetch_required_metadata(&name)?;
        let bytes = io::fetch_hashed(reader, length, &hashes, &name)?;

        let min_version = self
            .targets
            .as_ref()
            .map_or_else(|| NonZeroU64::new(1).unwrap(), |s| s.signed.version);
        let signed = decode_and_verify::<Targets>(
            RoleType::Targets,
            &bytes,
            &self.keydb,
            min_version,
            now,
            false,
        )?;
        ensure!(
            signed.signed.version == meta.version,
            error::VersionMismatch {
                role: RoleType::Targets,
                fetched: signed.signed.version,
                expected: meta.version,
            }
        );

        let delta = diff_targets(self.targets.as_ref(), &signed.signed);

        self.local.set("targets.json", &bytes)?;
        self.targets = Some(signed);
        Ok(delta)
    }

    /// Returns the trusted targets map, keyed by target path.
    ///
    /// # Errors
    ///
    /// Returns [`error::Error::UpdateRequired`] if called before a successful [`Client::update`].
    pub fn targets(&self) -> Result<&HashMap<String, Target>> {
        ensure!(self.has_updated, error::UpdateRequired);
        Ok(&self.targets.as_ref().expect("has_updated implies targets is set").signed.targets)
    }

    /// Looks up a single target by path, without downloading it.
    pub fn target(&self, name: &str) -> Result<Option<&Target>> {
        let normalized = normalize_target_path(name);
        Ok(self.targets()?.get(normalized))
    }

    /// Downloads a target, verifying its length and hash before any byte reaches `dest`
    /// uninspected, and writes it to `dest`.
    ///
    /// On any failure (size mismatch, hash mismatch, I/O error), `dest.delete()` is called
    /// before the error is returned, so a caller's destination never ends up holding a partial,
    /// unverified file.
    pub fn download(&self, name: &str, dest: &mut dyn Destination) -> Result<()> {
        ensure!(self.has_updated, error::UpdateRequired);
        let normalized = normalize_target_path(name);
        let targets = self.targets.as_ref().expect("has_updated implies targets is set");
        let target = targets
            .signed
            .targets
            .get(normalized)
            .ok_or_else(|| error::Error::UnknownTarget {
                name: normalized.to_string(),
                snapshot_version: targets.signed.version,
            })?;

        let path = self.target_remote_path(normalized, target);
        let (reader, declared_size) = self.remote.fetch_target(&path)?;

        // Amplification pre-check: refuse to even start reading a body the server claims is
        // bigger than what the trusted targets metadata promised, before any bytes are read.
        if let Some(declared) = declared_size {
            ensure!(
                declared <= target.length,
                error::WrongSize {
                    name: normalized.to_string(),
                    actual: declared,
                    expected: target.length,
                }
            );
        }

        if let Err(e) = self.copy_target(reader, target, normalized, dest) {
            dest.delete().context(error::DownloadRollback {
                name: normalized.to_string(),
            })?;
            return Err(e);
        }
        Ok(())
    }

    fn target_remote_path(&self, name: &str, target: &Target) -> String {
        if self.consistent_snapshot {
            format!("{}.{}", hex::encode(target.hashes.sha256.as_ref()), name)
        } else {
            name.to_string()
        }
    }

    fn copy_target(
        &self,
        reader: Box<dyn Read + Send>,
        target: &Target,
        name: &str,
        dest: &mut dyn Destination,
    ) -> Result<()> {
        // `Read::take` rather than `io::LengthCappedRead`: a target download hard-stops at the
        // declared length and silently discards anything past it, instead of erroring, to
        // tolerate servers that over-send.
        let capped = reader.take(target.length);
        let mut hashing = io::HashingRead::new(capped, &target.hashes);

        let mut buf = [0u8; 8192];
        loop {
            let n = hashing
                .read(&mut buf)
                .context(error::FileRead { what: name.to_string() })?;
            if n == 0 {
                break;
            }
            dest.write(&buf[..n])
                .context(error::DownloadWrite { name: name.to_string() })?;
        }

        hashing.finish(name, &target.hashes, Some(target.length))
    }
}

/// Computes which targets in `new` are new or changed relative to `old` (or, if `old` is `None`,
/// every target in `new`).
fn diff_targets(old: Option<&Signed<Targets>>, new: &Targets) -> TargetsDelta {
    let mut delta = HashMap::new();
    for (path, target) in &new.targets {
        let changed = match old.and_then(|o| o.signed.targets.get(path)) {
            None => true,
            Some(prev) => prev.length != target.length || prev.hashes.sha256 != target.hashes.sha256,
        };
        if changed {
            delta.insert(path.clone(), target.clone());
        }
    }
    delta
}
