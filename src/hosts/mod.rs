//! Host resolution for the gather pipeline.
//!
//! Hosts come either from the operator (bootstrap and control-plane
//! addresses together) or from the persisted provisioning state, read by an
//! ordered list of per-platform [`HostStage`] extractors. Supplying only one
//! of the two explicit inputs is rejected rather than completed from state.
//!
//! Stage results are overlaid field by field: a later stage only replaces
//! the fields it actually reports.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::assets::{AssetError, AssetStore, InstallConfig, load_install_config};

mod stages;

pub use stages::{AttributeSelector, TerraformStage, stages_for_platform};

/// SSH port used when neither the operator nor a stage supplies one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Hosts to gather from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostAddressSet {
    /// Bootstrap host address.
    pub bootstrap: String,
    /// Cloud instance identifier of the bootstrap host, when known.
    pub bootstrap_id: Option<String>,
    /// Control-plane host addresses in discovery order.
    pub masters: Vec<String>,
    /// Cloud instance identifiers of the control-plane hosts, when known.
    pub master_ids: Vec<String>,
    /// SSH port on the bootstrap host.
    pub port: u16,
}

impl HostAddressSet {
    fn empty() -> Self {
        Self {
            bootstrap: String::new(),
            bootstrap_id: None,
            masters: Vec::new(),
            master_ids: Vec::new(),
            port: DEFAULT_SSH_PORT,
        }
    }

    fn overlay_addresses(&mut self, found: HostAddresses) {
        if let Some(bootstrap) = found.bootstrap.filter(|value| !value.is_empty()) {
            self.bootstrap = bootstrap;
        }
        if let Some(port) = found.port.filter(|value| *value != 0) {
            self.port = port;
        }
        if !found.masters.is_empty() {
            self.masters = found.masters;
        }
    }

    fn overlay_ids(&mut self, found: HostIds) {
        if let Some(id) = found.bootstrap.filter(|value| !value.is_empty()) {
            self.bootstrap_id = Some(id);
        }
        if !found.masters.is_empty() {
            self.master_ids = found.masters;
        }
    }
}

/// Addresses reported by one stage. Absent fields leave earlier values
/// untouched.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HostAddresses {
    /// Bootstrap host address.
    pub bootstrap: Option<String>,
    /// Non-default SSH port.
    pub port: Option<u16>,
    /// Control-plane host addresses.
    pub masters: Vec<String>,
}

/// Instance identifiers reported by one stage.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HostIds {
    /// Bootstrap instance identifier.
    pub bootstrap: Option<String>,
    /// Control-plane instance identifiers.
    pub masters: Vec<String>,
}

/// A provisioning stage able to report the hosts it created.
pub trait HostStage: Send + Sync {
    /// Stage name, for example `bootstrap`.
    fn name(&self) -> &str;

    /// Reports host addresses recorded by this stage.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the stage state exists but cannot be
    /// read.
    fn extract_host_addresses(
        &self,
        dir: &Utf8Path,
        config: &InstallConfig,
    ) -> Result<HostAddresses, ResolveError>;

    /// Reports instance identifiers recorded by this stage.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the stage state exists but cannot be
    /// read.
    fn extract_host_ids(
        &self,
        dir: &Utf8Path,
        config: &InstallConfig,
    ) -> Result<HostIds, ResolveError>;
}

/// Produces the ordered stages for a platform name.
pub type StageCatalogue = Box<dyn Fn(&str) -> Vec<Box<dyn HostStage>> + Send + Sync>;

/// Errors raised while resolving hosts. All of them are configuration
/// errors: the operator must correct the input or the install directory.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Raised when a bootstrap host is given without control-plane hosts.
    #[error(
        "a bootstrap host was provided without control-plane hosts; pass --master as well, or omit both to use the provisioning state"
    )]
    MissingMasters,
    /// Raised when control-plane hosts are given without a bootstrap host.
    #[error(
        "control-plane hosts were provided without a bootstrap host; pass --bootstrap as well, or omit both to use the provisioning state"
    )]
    MissingBootstrap,
    /// Raised when the install configuration cannot be loaded.
    #[error("failed to load the install configuration: {0}")]
    Asset(#[from] AssetError),
    /// Raised when a stage's persisted state is unreadable.
    #[error("failed to read provisioning state {path}: {message}")]
    State {
        /// State file that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a stage fails for a reason other than its state file.
    #[error("stage {stage} failed: {message}")]
    Stage {
        /// Stage that failed.
        stage: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when discovery completes without finding a required piece.
    #[error(
        "failed to discover the {piece} from the provisioning state for platform {platform}; provide --bootstrap and --master explicitly"
    )]
    Undiscovered {
        /// The piece still missing, for example `bootstrap host`.
        piece: &'static str,
        /// Platform whose stages were consulted.
        platform: String,
    },
}

/// Resolves the hosts a gather should target.
pub struct HostResolver {
    catalogue: StageCatalogue,
}

impl Default for HostResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostResolver").finish_non_exhaustive()
    }
}

impl HostResolver {
    /// Creates a resolver backed by the built-in stage catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::with_catalogue(Box::new(stages_for_platform))
    }

    /// Creates a resolver backed by a custom stage catalogue.
    #[must_use]
    pub fn with_catalogue(catalogue: StageCatalogue) -> Self {
        Self { catalogue }
    }

    /// Resolves hosts from explicit input or, when both inputs are empty,
    /// from the provisioning state in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::MissingMasters`] or
    /// [`ResolveError::MissingBootstrap`] for partial explicit input, and
    /// other [`ResolveError`] variants when discovery fails.
    pub fn resolve(
        &self,
        bootstrap: &str,
        masters: &[String],
        dir: &Utf8Path,
        assets: &dyn AssetStore,
    ) -> Result<HostAddressSet, ResolveError> {
        let explicit_bootstrap = bootstrap.trim();
        match (explicit_bootstrap.is_empty(), masters.is_empty()) {
            (false, false) => Ok(HostAddressSet {
                bootstrap: explicit_bootstrap.to_owned(),
                masters: masters.to_vec(),
                ..HostAddressSet::empty()
            }),
            (false, true) => Err(ResolveError::MissingMasters),
            (true, false) => Err(ResolveError::MissingBootstrap),
            (true, true) => self.discover(dir, assets),
        }
    }

    fn discover(
        &self,
        dir: &Utf8Path,
        assets: &dyn AssetStore,
    ) -> Result<HostAddressSet, ResolveError> {
        let config = load_install_config(assets)?;
        let mut hosts = HostAddressSet::empty();

        for stage in (self.catalogue)(config.platform()) {
            let addresses = stage.extract_host_addresses(dir, &config)?;
            debug!(stage = stage.name(), ?addresses, "extracted host addresses");
            hosts.overlay_addresses(addresses);

            match stage.extract_host_ids(dir, &config) {
                Ok(ids) => hosts.overlay_ids(ids),
                Err(err) => {
                    debug!(stage = stage.name(), error = %err, "failed to extract host IDs");
                }
            }
        }

        if hosts.bootstrap.is_empty() {
            return Err(ResolveError::Undiscovered {
                piece: "bootstrap host",
                platform: config.platform().to_owned(),
            });
        }
        if hosts.masters.is_empty() {
            return Err(ResolveError::Undiscovered {
                piece: "control-plane hosts",
                platform: config.platform().to_owned(),
            });
        }
        Ok(hosts)
    }
}
