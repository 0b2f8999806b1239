//! Bootstrap failure gather pipeline.
//!
//! [`GatherOrchestrator::gather_bootstrap`] resolves the hosts, writes the
//! bootstrap key, pulls console logs through the platform backend, pulls
//! the diagnostic bundle over SSH, and merges both into one combined bundle.
//! Only host resolution, key material, the SSH stage, and the merge are
//! fatal; the platform stage is best effort.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use thiserror::Error;
use tracing::{info, warn};

use crate::archive::{ArchiveError, merge_archives};
use crate::assets::{AssetStore, load_cluster_metadata};
use crate::backend::GatherParams;
use crate::hosts::{HostAddressSet, HostResolver, ResolveError};
use crate::keys::{BootstrapKey, KeyError};
use crate::registry::BackendRegistry;
use crate::ssh::{CommandRunner, RemoteShell, RemoteShellError, render_command};

/// Timestamp token shared by every artifact of one gather.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GatherId(String);

impl GatherId {
    /// Creates an identifier from the local time, formatted `YYYYMMDDhhmmss`.
    #[must_use]
    pub fn now() -> Self {
        Self(Local::now().format("%Y%m%d%H%M%S").to_string())
    }

    /// Borrowed identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GatherId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for GatherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Label namespacing the combined bundle, `log-bundle-<id>`.
#[must_use]
pub fn bundle_label(id: &GatherId) -> String {
    format!("log-bundle-{id}")
}

/// `<dir>/serial-log-bundle-<id>.tar.gz`
#[must_use]
pub fn serial_bundle_path(dir: &Utf8Path, id: &GatherId) -> Utf8PathBuf {
    dir.join(format!("serial-log-bundle-{id}.tar.gz"))
}

/// `<dir>/log-bundle-<id>.tar.gz`
#[must_use]
pub fn ssh_bundle_path(dir: &Utf8Path, id: &GatherId) -> Utf8PathBuf {
    dir.join(format!("{}.tar.gz", bundle_label(id)))
}

/// `<dir>/combined-log-bundle-<id>.tar.gz`
#[must_use]
pub fn combined_bundle_path(dir: &Utf8Path, id: &GatherId) -> Utf8PathBuf {
    dir.join(format!("combined-log-bundle-{id}.tar.gz"))
}

/// Operator input for one gather.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GatherRequest {
    /// Explicit bootstrap host; empty to discover.
    pub bootstrap: String,
    /// Explicit control-plane hosts; empty to discover.
    pub masters: Vec<String>,
    /// Private keys offered before the bootstrap key.
    pub keys: Vec<Utf8PathBuf>,
    /// Identifier namespacing the produced bundles.
    pub gather_id: GatherId,
}

/// Bundles produced by a successful gather.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GatherOutcome {
    /// Platform console bundle, when the platform stage wrote one.
    pub serial_bundle: Option<Utf8PathBuf>,
    /// Bundle pulled from the bootstrap host.
    pub ssh_bundle: Utf8PathBuf,
    /// Merged bundle.
    pub combined_bundle: Utf8PathBuf,
}

/// Fatal gather failures.
#[derive(Debug, Error)]
pub enum GatherError {
    /// Raised when the hosts cannot be resolved.
    #[error(transparent)]
    Configuration(#[from] ResolveError),
    /// Raised when the bootstrap key cannot be written.
    #[error(transparent)]
    KeyMaterial(#[from] KeyError),
    /// Raised when the bootstrap host refuses or drops the connection.
    #[error("failed to connect to the bootstrap machine: {source}")]
    HostUnreachable {
        /// Underlying connection error.
        source: RemoteShellError,
    },
    /// Raised when an SSH session cannot be set up for another reason.
    #[error("failed to create SSH client: {source}")]
    SshSetup {
        /// Underlying connection error.
        source: RemoteShellError,
    },
    /// Raised when the diagnostic script fails.
    #[error("failed to run remote command: {source}")]
    RemoteCommand {
        /// Underlying command error.
        source: RemoteShellError,
    },
    /// Raised when the remote bundle cannot be copied back.
    #[error("failed to pull log file from remote: {source}")]
    PullFile {
        /// Underlying copy error.
        source: RemoteShellError,
    },
    /// Raised when the bundles cannot be merged.
    #[error("failed to merge log bundles: {0}")]
    Merge(#[from] ArchiveError),
}

impl GatherError {
    fn from_connect(source: RemoteShellError) -> Self {
        match source {
            RemoteShellError::HostUnreachable { .. } => Self::HostUnreachable { source },
            _ => Self::SshSetup { source },
        }
    }
}

/// Sequences the gather stages.
pub struct GatherOrchestrator<R: CommandRunner> {
    install_dir: Utf8PathBuf,
    assets: Box<dyn AssetStore>,
    registry: BackendRegistry,
    shell: RemoteShell<R>,
    resolver: HostResolver,
}

impl<R: CommandRunner> fmt::Debug for GatherOrchestrator<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatherOrchestrator")
            .field("install_dir", &self.install_dir)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<R: CommandRunner> GatherOrchestrator<R> {
    /// Creates an orchestrator writing bundles into `install_dir`, which
    /// should be absolute.
    #[must_use]
    pub fn new(
        install_dir: Utf8PathBuf,
        assets: Box<dyn AssetStore>,
        registry: BackendRegistry,
        shell: RemoteShell<R>,
    ) -> Self {
        Self {
            install_dir,
            assets,
            registry,
            shell,
            resolver: HostResolver::new(),
        }
    }

    /// Replaces the host resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: HostResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Install directory bundles are written to.
    #[must_use]
    pub fn install_dir(&self) -> &Utf8Path {
        &self.install_dir
    }

    /// Runs the whole pipeline.
    ///
    /// The temporary bootstrap key is removed before returning, whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns [`GatherError`] when host resolution, key material, the SSH
    /// stage, or the merge fails. Platform stage failures are only logged.
    pub async fn gather_bootstrap(
        &self,
        request: &GatherRequest,
    ) -> Result<GatherOutcome, GatherError> {
        let hosts = self.resolver.resolve(
            &request.bootstrap,
            &request.masters,
            &self.install_dir,
            self.assets.as_ref(),
        )?;
        let key = BootstrapKey::materialize(self.assets.as_ref())?;
        let keys = key.append_to(&request.keys);

        let result = self.gather_with_keys(request, &hosts, &keys).await;
        key.remove();
        result
    }

    async fn gather_with_keys(
        &self,
        request: &GatherRequest,
        hosts: &HostAddressSet,
        keys: &[Utf8PathBuf],
    ) -> Result<GatherOutcome, GatherError> {
        let id = &request.gather_id;
        let serial_bundle = serial_bundle_path(&self.install_dir, id);

        info!("Pulling platform specific console logs from the bootstrap machine");
        self.gather_serial(id, hosts, &serial_bundle).await;
        let serial = serial_bundle.is_file().then_some(serial_bundle.as_path());

        info!("Pulling debug logs from the bootstrap machine");
        let ssh_bundle = match self.gather_ssh(id, hosts, keys).await {
            Ok(path) => path,
            Err(err) => {
                if let Some(path) = serial {
                    info!(path = %path, "Serial console logs are available");
                }
                return Err(err);
            }
        };

        info!("Combining serial and bootstrap log bundles");
        let combined_bundle = combined_bundle_path(&self.install_dir, id);
        merge_archives(
            Some(&ssh_bundle),
            serial,
            &combined_bundle,
            &bundle_label(id),
        )?;

        Ok(GatherOutcome {
            serial_bundle: serial.map(Utf8Path::to_path_buf),
            ssh_bundle,
            combined_bundle,
        })
    }

    async fn gather_serial(&self, id: &GatherId, hosts: &HostAddressSet, bundle: &Utf8Path) {
        let metadata = match load_cluster_metadata(self.assets.as_ref()) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(error = %err, "skipping platform specific console logs");
                return;
            }
        };
        let params = GatherParams {
            serial_bundle: bundle.to_path_buf(),
            install_dir: self.install_dir.clone(),
            gather_id: id.to_string(),
            bootstrap: hosts.bootstrap.clone(),
            bootstrap_id: hosts.bootstrap_id.clone(),
            masters: hosts.masters.clone(),
            master_ids: hosts.master_ids.clone(),
            metadata,
        };
        let backend = match self.registry.construct(&params) {
            Ok(backend) => backend,
            Err(err) => {
                warn!(error = %err, "skipping platform specific console logs");
                return;
            }
        };
        if let Err(err) = backend.run().await {
            warn!(
                failures = err.len(),
                error = %err,
                "platform specific console log gather reported errors"
            );
        }
    }

    async fn gather_ssh(
        &self,
        id: &GatherId,
        hosts: &HostAddressSet,
        keys: &[Utf8PathBuf],
    ) -> Result<Utf8PathBuf, GatherError> {
        let config = self.shell.config();
        let session = self
            .shell
            .connect(&config.ssh_user, &hosts.bootstrap, hosts.port, keys)
            .await
            .map_err(GatherError::from_connect)?;

        let mut args = vec![String::from("--id"), id.to_string()];
        args.extend(hosts.masters.iter().cloned());
        let command = render_command(&config.remote_script, &args);
        self.shell
            .run(&session, &command)
            .await
            .map_err(|source| GatherError::RemoteCommand { source })?;

        let remote = format!("/home/{}/{}.tar.gz", config.ssh_user, bundle_label(id));
        let local = ssh_bundle_path(&self.install_dir, id);
        self.shell
            .pull_file(&session, &remote, &local)
            .await
            .map_err(|source| GatherError::PullFile { source })?;
        Ok(local)
    }
}
