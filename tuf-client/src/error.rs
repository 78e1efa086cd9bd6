//! The crate-level error type.
//!
//! Every fallible operation in this crate returns this `Error` (or the lower-level
//! `schema::Error`, converted into a variant here at the boundary where schema concerns become
//! client concerns).

use crate::schema::RoleType;
use crate::transport::TransportError;
use chrono::{DateTime, Utc};
use snafu::{Backtrace, Snafu};
use std::num::NonZeroU64;
use std::path::PathBuf;

/// The result type returned by this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for this crate.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
#[non_exhaustive]
pub enum Error {
    /// A role's metadata failed signature/schema verification.
    #[snafu(display("failed to verify {role} metadata: {source}"))]
    Verify {
        role: RoleType,
        source: crate::schema::Error,
    },

    /// The root metadata shipped with the application has no usable keys for some role.
    #[snafu(display("root metadata has no keys for role {role}"))]
    NoRootKeys { role: RoleType },

    /// A role's metadata declared a version older than the version we already trust.
    #[snafu(display(
        "rollback attack? {role} version {new} is older than the trusted version {current}"
    ))]
    OlderMetadata {
        role: RoleType,
        current: NonZeroU64,
        new: NonZeroU64,
    },

    /// A role's metadata version didn't match what its parent role declared.
    #[snafu(display(
        "{role} is at version {fetched} but its parent declared version {expected}"
    ))]
    VersionMismatch {
        role: RoleType,
        fetched: NonZeroU64,
        expected: NonZeroU64,
    },

    /// `<N+1>.root.json` declared a version other than `N+1` during the root chain walk.
    #[snafu(display("root.json: fast-forward or rollback? got version {given}, expected {expected}"))]
    RootWrongVersion {
        given: NonZeroU64,
        expected: NonZeroU64,
    },

    /// A successor root failed to cross-sign with the predecessor (at the old threshold) or
    /// failed to self-sign at its own declared threshold.
    #[snafu(display("root.json version {version} failed signature verification: {source}"))]
    RootChainVerification {
        version: NonZeroU64,
        source: crate::schema::Error,
    },

    /// We downloaded more root.json updates than `max_root_updates` allows without reaching a
    /// terminal, self-consistent version.
    #[snafu(display("more than {max_root_updates} root updates needed, bailing out"))]
    MaxUpdatesExceeded { max_root_updates: u64 },

    /// Metadata that a parent role requires is not present on the remote repository (distinct
    /// from the root chain walk's expected "no N+1 yet" case, which is not an error).
    #[snafu(display("{name} is required but the repository doesn't have it"))]
    MissingRemoteMetadata { name: String },

    /// The remote repository doesn't have the requested file at all (e.g. a 404).
    #[snafu(display("{name} not found on the remote repository"))]
    NotFound { name: String },

    /// A role's metadata has expired.
    #[snafu(display("{role} metadata expired at {expiration}"))]
    ExpiredMetadata {
        role: RoleType,
        expiration: DateTime<Utc>,
    },

    /// The client's clock appears to have moved backward since the last time it was sampled.
    #[snafu(display(
        "current system time {sys_time} is before the latest known time {latest_known_time}"
    ))]
    SystemTimeSteppedBackward {
        sys_time: DateTime<Utc>,
        latest_known_time: DateTime<Utc>,
    },

    /// A higher-level role's metadata didn't mention the file we needed.
    #[snafu(display("{role} metadata doesn't list {file}"))]
    MetaMissing { file: &'static str, role: RoleType },

    /// The requested target isn't listed in the trusted targets metadata.
    #[snafu(display("target {name:?} not found (snapshot version {snapshot_version})"))]
    UnknownTarget {
        name: String,
        snapshot_version: NonZeroU64,
    },

    /// `targets()`/`target()`/`download()` were called before a successful `update()`.
    #[snafu(display("no trusted targets metadata yet; call update() first"))]
    UpdateRequired,

    /// A remote fetch declared (or delivered) more bytes than the caller is willing to accept.
    #[snafu(display("{name} exceeded the maximum allowed size of {max} bytes (got {size})"))]
    MetaTooLarge {
        name: String,
        size: u64,
        max: u64,
    },

    /// The number of bytes actually read didn't match the declared length.
    #[snafu(display("{name}: expected {expected} bytes, got {actual}"))]
    WrongSize {
        name: String,
        actual: u64,
        expected: u64,
    },

    /// The downloaded bytes didn't match the declared hash.
    #[snafu(display("{name}: expected sha256 {expected}, got {actual}"))]
    WrongHash {
        name: String,
        actual: String,
        expected: String,
    },

    /// Failed to parse a URL.
    #[snafu(display("failed to parse URL {url:?}: {source}"))]
    ParseUrl {
        url: String,
        source: url::ParseError,
    },

    /// Failed to join a relative path onto a base URL.
    #[snafu(display("failed to join {path:?} onto {url}: {source}"))]
    JoinUrl {
        path: String,
        url: url::Url,
        source: url::ParseError,
    },

    /// The transport failed to fetch a file.
    #[snafu(display("{source}"))]
    Transport { source: TransportError },

    /// Failed to parse a role's metadata as JSON.
    #[snafu(display("failed to parse {role} metadata: {source}"))]
    ParseMetadata {
        role: RoleType,
        source: serde_json::Error,
    },

    /// Failed to parse the trusted root metadata shipped with the application.
    #[snafu(display("failed to parse the trusted root metadata: {source}"))]
    ParseTrustedMetadata { source: serde_json::Error },

    /// Failed while reading a stream of bytes.
    #[snafu(display("failed reading {what}: {source}"))]
    FileRead {
        what: String,
        source: std::io::Error,
    },

    /// Failed to initialize the on-disk datastore.
    #[snafu(display("failed to initialize datastore: {source}"))]
    DatastoreInit { source: std::io::Error },

    /// Failed to open a datastore file.
    #[snafu(display("failed to open {}: {source}", path.display()))]
    DatastoreOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write a datastore file.
    #[snafu(display("failed to write {}: {source}", path.display()))]
    DatastoreCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize a value to be written to the datastore.
    #[snafu(display("failed to serialize {what} for the datastore: {source}"))]
    DatastoreSerialize {
        what: String,
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to remove a datastore file.
    #[snafu(display("failed to remove {}: {source}", path.display()))]
    DatastoreRemove {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A target's declared size or hash didn't match what was downloaded; the partially written
    /// destination could not be rolled back.
    #[snafu(display("failed to roll back a failed download of {name}: {source}"))]
    DownloadRollback {
        name: String,
        source: std::io::Error,
    },

    /// Failed to write downloaded target bytes to the destination.
    #[snafu(display("failed to write target {name} to its destination: {source}"))]
    DownloadWrite {
        name: String,
        source: std::io::Error,
    },

    /// Caller-supplied backtrace-carrying variant for otherwise-uncategorized JSON issues.
    #[snafu(display("JSON error: {source}"))]
    Json {
        source: serde_json::Error,
        backtrace: Backtrace,
    },
}
