//! Core library for the `bootstrap-gather` diagnostics tool.
//!
//! When a cluster bootstrap fails, the tool resolves the bootstrap and
//! control-plane addresses from the install directory, pulls platform console
//! logs through a cloud backend (Azure boot diagnostics today), runs the
//! diagnostic script on the bootstrap host over SSH, and merges everything
//! into one combined bundle for offline analysis.

pub mod analysis;
pub mod archive;
pub mod assets;
pub mod azure;
pub mod backend;
pub mod config;
pub mod gather;
pub mod hosts;
pub mod keys;
pub mod registry;
pub mod ssh;
pub mod test_support;

pub use analysis::{BundleAnalyzer, BundleInventory, InventoryAnalyzer};
pub use archive::{ArchiveError, SERIAL_LOGS_DIR, create_archive, merge_archives};
pub use assets::{AssetStore, ClusterMetadata, DirectoryAssetStore};
pub use azure::{AzureConfig, AzureError, AzureGather};
pub use backend::{AggregateError, BackendError, GatherParams, SerialGather};
pub use config::{ConfigError, GatherConfig};
pub use gather::{GatherError, GatherId, GatherOrchestrator, GatherOutcome, GatherRequest};
pub use hosts::{HostAddressSet, HostResolver, ResolveError};
pub use registry::{BackendRegistry, RegistryBuilder};
pub use ssh::{CommandRunner, ProcessCommandRunner, RemoteShell, RemoteShellError};
