//! Materialises the bootstrap SSH key for the duration of a gather.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::assets::{AssetError, AssetStore, load_key_pair};

/// Errors raised while writing the bootstrap key to disk.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Raised when the key pair asset cannot be loaded.
    #[error("failed to load the bootstrap SSH key pair: {0}")]
    Asset(#[from] AssetError),
    /// Raised when the temporary key file cannot be written.
    #[error("failed to write the bootstrap SSH key to a temporary file: {0}")]
    Write(#[source] std::io::Error),
    /// Raised when the temporary directory path is not UTF-8.
    #[error("temporary key path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
}

/// Private key written to an owner-only temporary file.
///
/// The file is removed when the value is dropped, on success and failure
/// paths alike.
#[derive(Debug)]
pub struct BootstrapKey {
    file: NamedTempFile,
    path: Utf8PathBuf,
}

impl BootstrapKey {
    /// Fetches the bootstrap key pair and writes its private half to disk.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] when the asset is unavailable or the file cannot
    /// be written.
    pub fn materialize(store: &dyn AssetStore) -> Result<Self, KeyError> {
        let pair = load_key_pair(store)?;
        let mut file = tempfile::Builder::new()
            .prefix("bootstrap-ssh")
            .tempfile()
            .map_err(KeyError::Write)?;
        file.write_all(pair.private.as_bytes())
            .map_err(KeyError::Write)?;
        file.flush().map_err(KeyError::Write)?;

        let path = Utf8PathBuf::from_path_buf(file.path().to_path_buf())
            .map_err(|path| KeyError::NonUtf8Path(path.display().to_string()))?;
        debug!(path = %path, "wrote bootstrap SSH key");
        Ok(Self { file, path })
    }

    /// Location of the key file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns `keys` with this key appended.
    #[must_use]
    pub fn append_to(&self, keys: &[Utf8PathBuf]) -> Vec<Utf8PathBuf> {
        let mut all = keys.to_vec();
        all.push(self.path.clone());
        all
    }

    /// Removes the key file now, logging rather than failing on error.
    pub fn remove(self) {
        let Self { file, path } = self;
        if let Err(err) = file.close() {
            warn!(path = %path, error = %err, "failed to remove temporary bootstrap key");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryAssetStore;
    use rstest::rstest;
    use std::fs;

    #[rstest]
    fn materialize_writes_private_key() {
        let store = MemoryAssetStore::new().with_key_pair("PRIVATE KEY BODY");

        let key = BootstrapKey::materialize(&store).expect("key should be written");

        assert_eq!(
            fs::read_to_string(key.path()).expect("read key"),
            "PRIVATE KEY BODY"
        );
        assert!(
            key.path()
                .file_name()
                .is_some_and(|name| name.starts_with("bootstrap-ssh"))
        );
    }

    #[cfg(unix)]
    #[rstest]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let store = MemoryAssetStore::new().with_key_pair("k");
        let key = BootstrapKey::materialize(&store).expect("key should be written");

        let mode = fs::metadata(key.path()).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o077, 0, "mode {mode:o} grants group or other access");
    }

    #[rstest]
    fn dropping_the_key_removes_the_file() {
        let store = MemoryAssetStore::new().with_key_pair("k");
        let key = BootstrapKey::materialize(&store).expect("key should be written");
        let path = key.path().to_path_buf();

        drop(key);

        assert!(!path.exists());
    }

    #[rstest]
    fn remove_deletes_the_file() {
        let store = MemoryAssetStore::new().with_key_pair("k");
        let key = BootstrapKey::materialize(&store).expect("key should be written");
        let path = key.path().to_path_buf();

        key.remove();

        assert!(!path.exists());
    }

    #[rstest]
    fn append_to_keeps_caller_keys_first() {
        let store = MemoryAssetStore::new().with_key_pair("k");
        let key = BootstrapKey::materialize(&store).expect("key should be written");

        let keys = key.append_to(&[Utf8PathBuf::from("k.pem")]);

        assert_eq!(keys, vec![Utf8PathBuf::from("k.pem"), key.path().to_path_buf()]);
    }

    #[rstest]
    fn missing_key_pair_is_reported() {
        let err = BootstrapKey::materialize(&MemoryAssetStore::new())
            .expect_err("no key pair seeded");
        assert!(matches!(err, KeyError::Asset(AssetError::Missing { .. })), "{err}");
    }
}
