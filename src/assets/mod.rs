//! Access to the assets persisted in an install directory.
//!
//! The gather pipeline never generates assets; it reads them through the
//! [`AssetStore`] contract. [`DirectoryAssetStore`] serves them from
//! `metadata.json` and `.install_state.json` in the install directory.

use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

mod metadata;

pub use metadata::{AzureMetadata, ClusterMetadata, DEFAULT_AZURE_CLOUD};

/// File holding the cluster metadata written after provisioning.
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// File holding the persisted state of generated assets, keyed by name.
pub const STATE_FILE_NAME: &str = ".install_state.json";

/// Assets the gather pipeline consumes.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Asset {
    /// SSH key pair installed on the bootstrap host.
    BootstrapSshKeyPair,
    /// The user supplied install configuration.
    InstallConfig,
    /// Metadata describing the provisioned cluster.
    ClusterMetadata,
}

impl Asset {
    /// Name under which the asset is persisted.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BootstrapSshKeyPair => "bootstrap-ssh-key-pair",
            Self::InstallConfig => "install-config",
            Self::ClusterMetadata => "cluster-metadata",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised while fetching or decoding assets.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AssetError {
    /// Raised when the asset has not been generated.
    #[error("asset {asset} is not available in the install directory")]
    Missing {
        /// Asset that was requested.
        asset: Asset,
    },
    /// Raised when the backing file cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// File that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when asset content cannot be decoded.
    #[error("failed to decode asset {asset}: {message}")]
    Decode {
        /// Asset whose content was malformed.
        asset: Asset,
        /// Human-readable error message.
        message: String,
    },
}

/// Source of persisted assets.
pub trait AssetStore: Send + Sync {
    /// Returns the raw bytes of `asset`.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::Missing`] when the asset does not exist, and
    /// other [`AssetError`] variants when it cannot be read.
    fn fetch(&self, asset: Asset) -> Result<Vec<u8>, AssetError>;
}

/// Serves assets from an install directory.
#[derive(Debug)]
pub struct DirectoryAssetStore {
    root: Utf8PathBuf,
    dir: Dir,
}

impl DirectoryAssetStore {
    /// Opens `root` for reading.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::Io`] when the directory cannot be opened.
    pub fn open(root: &Utf8Path) -> Result<Self, AssetError> {
        let dir = Dir::open_ambient_dir(root, ambient_authority()).map_err(|err| {
            AssetError::Io {
                path: root.to_path_buf(),
                message: err.to_string(),
            }
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            dir,
        })
    }

    /// Install directory backing this store.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn read(&self, name: &str, asset: Asset) -> Result<Vec<u8>, AssetError> {
        self.dir.read(name).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                AssetError::Missing { asset }
            } else {
                AssetError::Io {
                    path: self.root.join(name),
                    message: err.to_string(),
                }
            }
        })
    }

    fn read_state_entry(&self, asset: Asset) -> Result<Vec<u8>, AssetError> {
        let raw = self.read(STATE_FILE_NAME, asset)?;
        let mut state: serde_json::Map<String, Value> =
            serde_json::from_slice(&raw).map_err(|err| AssetError::Io {
                path: self.root.join(STATE_FILE_NAME),
                message: err.to_string(),
            })?;
        let entry = state
            .remove(asset.name())
            .ok_or(AssetError::Missing { asset })?;
        serde_json::to_vec(&entry).map_err(|err| AssetError::Decode {
            asset,
            message: err.to_string(),
        })
    }
}

impl AssetStore for DirectoryAssetStore {
    fn fetch(&self, asset: Asset) -> Result<Vec<u8>, AssetError> {
        match asset {
            Asset::ClusterMetadata => self.read(METADATA_FILE_NAME, asset),
            Asset::BootstrapSshKeyPair | Asset::InstallConfig => self.read_state_entry(asset),
        }
    }
}

/// Bootstrap SSH key pair.
#[derive(Clone, Deserialize, Eq, PartialEq)]
pub struct KeyPair {
    /// PEM encoded private key.
    pub private: String,
    /// Public key in `authorized_keys` format.
    #[serde(default)]
    pub public: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private", &"<redacted>")
            .field("public", &self.public)
            .finish()
    }
}

/// The parts of the install configuration the gather pipeline reads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstallConfig {
    platform: String,
}

impl InstallConfig {
    /// Creates a configuration for `platform`.
    #[must_use]
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
        }
    }

    /// Name of the configured platform, for example `azure`.
    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }
}

#[derive(Deserialize)]
struct RawInstallConfig {
    #[serde(default)]
    platform: serde_json::Map<String, Value>,
}

fn decode<T: for<'de> Deserialize<'de>>(asset: Asset, raw: &[u8]) -> Result<T, AssetError> {
    serde_json::from_slice(raw).map_err(|err| AssetError::Decode {
        asset,
        message: err.to_string(),
    })
}

/// Fetches and decodes the bootstrap key pair.
///
/// # Errors
///
/// Returns [`AssetError`] when the asset is missing or malformed.
pub fn load_key_pair(store: &dyn AssetStore) -> Result<KeyPair, AssetError> {
    let asset = Asset::BootstrapSshKeyPair;
    let pair: KeyPair = decode(asset, &store.fetch(asset)?)?;
    if pair.private.trim().is_empty() {
        return Err(AssetError::Decode {
            asset,
            message: String::from("private key is empty"),
        });
    }
    Ok(pair)
}

/// Fetches the install configuration and determines its platform.
///
/// # Errors
///
/// Returns [`AssetError`] when the asset is missing, malformed, or names no
/// platform.
pub fn load_install_config(store: &dyn AssetStore) -> Result<InstallConfig, AssetError> {
    let asset = Asset::InstallConfig;
    let raw: RawInstallConfig = decode(asset, &store.fetch(asset)?)?;
    let platform = raw
        .platform
        .keys()
        .next()
        .ok_or_else(|| AssetError::Decode {
            asset,
            message: String::from("no platform configured"),
        })?;
    Ok(InstallConfig::new(platform.as_str()))
}

/// Fetches and decodes the cluster metadata.
///
/// # Errors
///
/// Returns [`AssetError`] when the asset is missing or malformed.
pub fn load_cluster_metadata(store: &dyn AssetStore) -> Result<ClusterMetadata, AssetError> {
    let asset = Asset::ClusterMetadata;
    decode(asset, &store.fetch(asset)?)
}
