//! URL path helpers: turning a metadata/target name into a safe URL path segment, and mapping a
//! `file://` URL back to a filesystem path without reintroducing traversal characters.

use percent_encoding::{AsciiSet, CONTROLS};
use std::path::PathBuf;
use url::Url;

/// Converts a file URL into a file path.
/// Needed because `url.to_file_path()` will decode any percent encoding, which could restore path
/// traversal characters, and `url.path()` roots paths to '/' on Windows.
pub(crate) trait SafeUrlPath {
    /// Returns the path component of a URL as a filesystem path.
    fn safe_url_filepath(&self) -> PathBuf;
}

#[cfg(windows)]
impl SafeUrlPath for Url {
    fn safe_url_filepath(&self) -> PathBuf {
        let url_path = self.path();

        // Windows filepaths when written as `file://` URLs have path components prefixed with a /.
        PathBuf::from(if let Some(stripped) = url_path.strip_prefix('/') {
            stripped
        } else {
            url_path
        })
    }
}

#[cfg(unix)]
impl SafeUrlPath for Url {
    fn safe_url_filepath(&self) -> PathBuf {
        PathBuf::from(self.path())
    }
}

/// Characters a target path or role name must not carry unescaped into a URL path segment: `/`
/// so a malicious name can never introduce an extra path segment (and, in particular, can never
/// traverse above the base URL it's joined onto), plus the usual reserved/control set.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%');

/// Percent-encodes `name` for use as a single URL path segment.
pub(crate) fn encode_filename(name: &str) -> String {
    percent_encoding::utf8_percent_encode(name, PATH_SEGMENT).to_string()
}

/// Normalizes a caller-supplied target path: strips exactly one leading `/` if
/// present. A caller-supplied path of `/foo` and `foo` name the same target.
pub(crate) fn normalize_target_path(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    }

    #[test]
    fn test_safe_simple() {
        let cargo_toml = manifest_dir().join("Cargo.toml");
        let cargo_toml_url = Url::from_file_path(&cargo_toml)
            .expect("Could not create URL from Cargo.toml filepath");

        let safe_url_path = cargo_toml_url.safe_url_filepath();

        assert_eq!(cargo_toml, safe_url_path);
        assert!(safe_url_path.is_absolute());
    }

    #[test]
    fn test_safe_traversals() {
        let url_base = Url::from_directory_path(manifest_dir())
            .expect("Could not create URL from CARGO_MANIFEST_DIR");

        let escaped_test_path = encode_filename("a/../b/././c/..");
        let traversal_url = url_base.join(&escaped_test_path).unwrap_or_else(|_| {
            panic!(
                "Could not create URL from unusual traversal path '{}' + '{}'",
                url_base, escaped_test_path
            )
        });

        assert_eq!(
            manifest_dir().join("a%2F..%2Fb%2F.%2F.%2Fc%2F.."),
            traversal_url.safe_url_filepath(),
        );
    }

    #[test]
    fn normalize_strips_exactly_one_leading_slash() {
        assert_eq!(normalize_target_path("/foo.txt"), "foo.txt");
        assert_eq!(normalize_target_path("foo.txt"), "foo.txt");
        assert_eq!(normalize_target_path("//foo.txt"), "/foo.txt");
    }
}
