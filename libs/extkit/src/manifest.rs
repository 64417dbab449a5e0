//! Reading extension manifests from disk or any byte stream.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::error::ExtensionError;
use crate::model::ExtensionManifest;

/// Parse the JSON manifest stored at `path`.
///
/// # Errors
/// Returns `ExtensionError::ManifestUnreadable` carrying `path` if the file
/// cannot be opened or its content is not a valid manifest.
pub fn parse_manifest(path: impl AsRef<Path>) -> Result<ExtensionManifest, ExtensionError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| unreadable(path, source))?;
    parse_manifest_from_reader(path, BufReader::new(file))
}

/// Parse a JSON manifest from `reader`; `location` only feeds error reports.
///
/// # Errors
/// Returns `ExtensionError::ManifestUnreadable` if reading or decoding fails.
pub fn parse_manifest_from_reader<R: Read>(
    location: impl AsRef<Path>,
    reader: R,
) -> Result<ExtensionManifest, ExtensionError> {
    let manifest: ExtensionManifest = serde_json::from_reader(reader)
        .map_err(|e| unreadable(location.as_ref(), io::Error::from(e)))?;
    if manifest.name.trim().is_empty() {
        return Err(unreadable(
            location.as_ref(),
            io::Error::new(io::ErrorKind::InvalidData, "manifest name is blank"),
        ));
    }
    tracing::debug!(
        location = %location.as_ref().display(),
        name = %manifest.name,
        version = %manifest.version,
        "parsed extension manifest"
    );
    Ok(manifest)
}

fn unreadable(location: &Path, source: io::Error) -> ExtensionError {
    ExtensionError::ManifestUnreadable {
        location: location.to_path_buf(),
        source,
    }
}
