#[cfg(feature = "http")]
use crate::{ClientSettings, HttpTransport};
use crate::error;
use crate::urlpath::encode_filename;
use dyn_clone::DynClone;
use snafu::{ResultExt, Snafu};
use std::fmt::Debug;
use std::io::{ErrorKind, Read};
use url::Url;

/// A trait to abstract over the method/protocol by which files are obtained.
///
/// The trait hides the underlying types involved by returning the `Read` object as a
/// `Box<dyn Read + Send>` and by requiring concrete type [`TransportError`] as the error type.
///
pub trait Transport: Debug + DynClone {
    /// Opens a `Read` object for the file specified by `url`.
    fn fetch(&self, url: Url) -> Result<Box<dyn Read + Send>, TransportError>;
}

// Implement `Clone` for `Transport` trait objects.
dyn_clone::clone_trait_object!(Transport);

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The kind of error that the transport object experienced during `fetch`.
///
/// # Why
///
/// Some TUF operations need to know if a [`Transport`] failure is a result of a file not being
/// found. In particular:
/// > 5.1.2. Try downloading version N+1 of the root metadata file `[...]` If this file is not
/// > available `[...]` then go to step 5.1.9.
///
/// To distinguish this case from other [`Transport`] failures, we use
/// `TransportErrorKind::FileNotFound`.
///
#[derive(Debug, Copy, Clone)]
#[non_exhaustive]
pub enum TransportErrorKind {
    /// The trait does not handle the URL scheme named in `String`. e.g. `file://` or `http://`.
    UnsupportedUrlScheme,
    /// The file cannot be found.
    FileNotFound,
    /// The transport failed for any other reason, e.g. IO error, HTTP broken pipe, etc.
    Other,
}

/// The error type that [`Transport`] `fetch` returns.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[snafu(display("{:?} error fetching '{}': {}", kind, url, source))]
pub struct TransportError {
    /// The kind of error that occurred.
    pub kind: TransportErrorKind,
    /// The URL that the transport was trying to fetch.
    pub url: String,
    /// The underlying error that occurred.
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportError {
    /// Creates a new [`TransportError`].
    pub fn new<S, E>(kind: TransportErrorKind, url: S, source_error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        S: AsRef<str>,
    {
        Self {
            kind,
            url: url.as_ref().into(),
            source: source_error.into(),
        }
    }

    /// Creates a [`TransportError`] for reporting an unhandled URL type.
    pub fn unsupported_scheme<S: AsRef<str>>(url: S) -> Self {
        TransportError::new(
            TransportErrorKind::UnsupportedUrlScheme,
            url,
            "Transport cannot handle the given URL scheme.".to_string(),
        )
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Provides a [`Transport`] for local files.
#[derive(Debug, Clone, Copy)]
pub struct FilesystemTransport;

impl Transport for FilesystemTransport {
    fn fetch(&self, url: Url) -> Result<Box<dyn Read + Send>, TransportError> {
        if url.scheme() != "file" {
            return Err(TransportError::unsupported_scheme(url));
        }

        let f = std::fs::File::open(url.path()).map_err(|e| {
            let kind = match e.kind() {
                ErrorKind::NotFound => TransportErrorKind::FileNotFound,
                _ => TransportErrorKind::Other,
            };
            TransportError::new(kind, url, e)
        })?;
        Ok(Box::new(f))
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A Transport that provides support for both local files and, if the `http` feature is enabled,
/// HTTP-transported files.
#[derive(Debug, Clone, Copy)]
pub struct DefaultTransport {
    file: FilesystemTransport,
    #[cfg(feature = "http")]
    http: HttpTransport,
}

impl Default for DefaultTransport {
    fn default() -> Self {
        Self {
            file: FilesystemTransport,
            #[cfg(feature = "http")]
            http: HttpTransport::default(),
        }
    }
}

impl DefaultTransport {
    /// Creates a new `DefaultTransport`. Same as `default()`.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "http")]
impl DefaultTransport {
    /// Create a new `DefaultTransport` using the given HTTP `ClientSettings`.
    #[allow(dead_code)]
    pub fn from_http_settings(settings: ClientSettings) -> Self {
        Self {
            file: FilesystemTransport,
            http: HttpTransport::from_settings(settings),
        }
    }
}

impl Transport for DefaultTransport {
    fn fetch(&self, url: Url) -> Result<Box<dyn Read + Send>, TransportError> {
        match url.scheme() {
            "file" => self.file.fetch(url),
            "http" | "https" => self.handle_http(url),
            _ => Err(TransportError::unsupported_scheme(url)),
        }
    }
}

impl DefaultTransport {
    #[cfg(not(feature = "http"))]
    #[allow(clippy::trivially_copy_pass_by_ref, clippy::unused_self)]
    fn handle_http(&self, url: Url) -> Result<Box<dyn Read + Send>, TransportError> {
        Err(TransportError::new(
            TransportErrorKind::UnsupportedUrlScheme,
            url,
            "The library was not compiled with the http feature enabled.",
        ))
    }

    #[cfg(feature = "http")]
    fn handle_http(&self, url: Url) -> Result<Box<dyn Read + Send>, TransportError> {
        self.http.fetch(url)
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The remote repository's metadata and targets, reachable by name rather than by full URL.
///
/// This sits one layer above [`Transport`]: the client engine deals in role/target *names* (e.g.
/// `"2.root.json"`, `"snapshot.json"`, a target's hashed or plain path) and this trait is
/// responsible for turning a name into a request against the repository's configured metadata or
/// targets base URL. `declared_size`, when the remote end can supply one (e.g. `Content-Length`),
/// lets the caller size its read cap before the parent role's own declared length is available;
/// a transport that can't supply one (chunked transfer, etc.) may always return
/// `None` and rely on the caller's own bound.
pub trait RemoteStore: Debug {
    /// Opens a reader for `name` under the repository's metadata base URL.
    fn fetch_metadata(&self, name: &str) -> crate::error::Result<(Box<dyn Read + Send>, Option<u64>)>;

    /// Opens a reader for `path` under the repository's targets base URL.
    fn fetch_target(&self, path: &str) -> crate::error::Result<(Box<dyn Read + Send>, Option<u64>)>;
}

/// A [`RemoteStore`] backed by any [`Transport`], joining names onto a pair of base URLs.
///
/// This is the `RemoteStore` every concrete `Transport` (filesystem, HTTP) gets for free: the
/// base URLs name the repository, and `fetch_metadata`/`fetch_target` just percent-encode the
/// caller's name onto the right one and hand it to the transport.
#[derive(Debug, Clone)]
pub struct TransportRemoteStore<T: Transport> {
    transport: T,
    metadata_base_url: Url,
    targets_base_url: Url,
}

impl<T: Transport> TransportRemoteStore<T> {
    /// Creates a new store that fetches metadata under `metadata_base_url` and targets under
    /// `targets_base_url` using `transport`. Both base URLs should end in `/` so that joining a
    /// name doesn't discard the last path segment of the base.
    pub fn new(transport: T, metadata_base_url: Url, targets_base_url: Url) -> Self {
        Self {
            transport,
            metadata_base_url,
            targets_base_url,
        }
    }

    fn fetch(
        &self,
        base: &Url,
        name: &str,
    ) -> crate::error::Result<(Box<dyn Read + Send>, Option<u64>)> {
        let encoded = encode_filename(name);
        let url = base.join(&encoded).context(error::JoinUrl {
            path: name.to_string(),
            url: base.clone(),
        })?;
        let reader = self.transport.fetch(url).map_err(|e| {
            if matches!(e.kind, TransportErrorKind::FileNotFound) {
                error::Error::NotFound {
                    name: name.to_string(),
                }
            } else {
                error::Error::Transport { source: e }
            }
        })?;
        Ok((reader, None))
    }
}

impl<T: Transport> RemoteStore for TransportRemoteStore<T> {
    fn fetch_metadata(&self, name: &str) -> crate::error::Result<(Box<dyn Read + Send>, Option<u64>)> {
        self.fetch(&self.metadata_base_url, name)
    }

    fn fetch_target(&self, path: &str) -> crate::error::Result<(Box<dyn Read + Send>, Option<u64>)> {
        self.fetch(&self.targets_base_url, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> TransportRemoteStore<FilesystemTransport> {
        let metadata = dir.path().join("metadata");
        let targets = dir.path().join("targets");
        std::fs::create_dir_all(&metadata).unwrap();
        std::fs::create_dir_all(&targets).unwrap();
        TransportRemoteStore::new(
            FilesystemTransport,
            Url::from_directory_path(&metadata).unwrap(),
            Url::from_directory_path(&targets).unwrap(),
        )
    }

    #[test]
    fn fetches_metadata_and_targets_by_name() {
        let dir = TempDir::new().unwrap();
        let remote = store(&dir);
        std::fs::write(dir.path().join("metadata/2.root.json"), b"root bytes").unwrap();
        std::fs::write(dir.path().join("targets/file.txt"), b"target bytes").unwrap();

        let (mut reader, size) = remote.fetch_metadata("2.root.json").unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"root bytes");
        assert_eq!(size, None);

        let (mut reader, _) = remote.fetch_target("file.txt").unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"target bytes");
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let dir = TempDir::new().unwrap();
        let remote = store(&dir);
        let err = remote.fetch_metadata("timestamp.json").unwrap_err();
        assert!(matches!(err, error::Error::NotFound { .. }));
    }

    #[test]
    fn percent_encodes_traversal_attempts() {
        let dir = TempDir::new().unwrap();
        let remote = store(&dir);
        // A name containing a path separator must not escape the targets directory; it's encoded
        // into a single (nonexistent) segment and fails as NotFound, not as a read of a sibling
        // file.
        std::fs::write(dir.path().join("secret.txt"), b"nope").unwrap();
        let err = remote.fetch_target("../secret.txt").unwrap_err();
        assert!(matches!(err, error::Error::NotFound { .. }));
    }
}
