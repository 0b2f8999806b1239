//! Azure cloud-native gather.
//!
//! Walks the virtual machines of the cluster resource group, collects the
//! boot diagnostics artifacts (console screenshot and serial log) of every
//! machine with boot diagnostics enabled, and archives them into the serial
//! bundle. Downloads of signed URLs are issued directly; other locations are
//! tried with each storage account key of the resource group in turn.

use std::io;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use reqwest::Url;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::archive::create_archive_entries;
use crate::backend::{AggregateError, BackendError, GatherFuture, GatherParams, SerialGather};
use crate::registry::RegistryBuilder;

mod api;
mod client;
mod config;
mod error;
mod shared_key;
mod types;

pub use api::{ApiFuture, AzureApi};
pub use client::{ArmClient, AzureEnvironment};
pub use config::{AzureConfig, AzureCredential};
pub use error::AzureError;
pub use shared_key::{STORAGE_API_VERSION, SharedKeyCredential, is_signed_url};
pub use types::{
    BootDiagnostics, BootDiagnosticsInstanceView, DiagnosticsProfile, InstanceView,
    VirtualMachine, VirtualMachinePage, VirtualMachineProperties,
};

/// Platform name the backend is registered under.
pub const PLATFORM: &str = "azure";

/// Leading entry segment used when the install directory has no name.
const UNNAMED_INSTALL_DIR: &str = "install";

/// Registers the Azure backend.
///
/// The constructor loads [`AzureConfig`] when a gather actually targets
/// Azure, so other platforms never need Azure credentials.
pub fn register(builder: &mut RegistryBuilder, api_timeout: Duration) {
    builder.register(
        PLATFORM,
        Box::new(move |params: &GatherParams| {
            let config = AzureConfig::load_without_cli_args()
                .map_err(|err| BackendError::Configuration(err.to_string()))?;
            build(&config, params, api_timeout)
        }),
    );
}

fn build(
    config: &AzureConfig,
    params: &GatherParams,
    api_timeout: Duration,
) -> Result<Box<dyn SerialGather>, BackendError> {
    let metadata = params
        .metadata
        .azure
        .as_ref()
        .ok_or_else(|| BackendError::MissingMetadata {
            platform: PLATFORM.to_owned(),
        })?;
    config
        .validate()
        .map_err(|err| BackendError::Configuration(err.to_string()))?;
    let environment = AzureEnvironment::resolve(
        metadata.cloud_name(),
        metadata.arm_endpoint.as_deref(),
        config.authority_host.as_deref(),
    )
    .map_err(|err| BackendError::Configuration(err.to_string()))?;
    let client = ArmClient::new(config, environment, api_timeout)
        .map_err(|err| BackendError::Configuration(err.to_string()))?;
    let resource_group = metadata.resource_group(&params.metadata.infra_id);
    Ok(Box::new(AzureGather::new(
        client,
        resource_group,
        params,
        api_timeout,
    )))
}

/// Gathers boot diagnostics artifacts from one resource group.
#[derive(Debug)]
pub struct AzureGather<A> {
    api: A,
    resource_group: String,
    serial_bundle: Utf8PathBuf,
    install_dir: Utf8PathBuf,
    api_timeout: Duration,
}

impl<A: AzureApi> AzureGather<A> {
    /// Creates a gather writing to `params.serial_bundle`.
    #[must_use]
    pub fn new(
        api: A,
        resource_group: impl Into<String>,
        params: &GatherParams,
        api_timeout: Duration,
    ) -> Self {
        Self {
            api,
            resource_group: resource_group.into(),
            serial_bundle: params.serial_bundle.clone(),
            install_dir: params.install_dir.clone(),
            api_timeout,
        }
    }

    /// Resource group being inspected.
    #[must_use]
    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    /// Name of the staging directory: the bundle file name without
    /// `.tar.gz`.
    #[must_use]
    pub fn staging_name(&self) -> String {
        let file_name = self.serial_bundle.file_name().unwrap_or("serial-log-bundle");
        file_name
            .strip_suffix(".tar.gz")
            .unwrap_or(file_name)
            .to_owned()
    }

    /// Staging directory downloads are written to.
    #[must_use]
    pub fn staging_dir(&self) -> Utf8PathBuf {
        self.install_dir.join(self.staging_name())
    }

    async fn call<T>(&self, operation: &str, request: ApiFuture<'_, T>) -> Result<T, AzureError> {
        timeout(self.api_timeout, request)
            .await
            .unwrap_or_else(|_| {
                Err(AzureError::Timeout {
                    operation: operation.to_owned(),
                    seconds: self.api_timeout.as_secs(),
                })
            })
    }

    async fn gather(&self) -> Result<(), AggregateError> {
        let mut errors = AggregateError::new();

        let machines = self.list_machines(&mut errors).await;
        let uris = self.artifact_uris(&machines, &mut errors).await;
        let credentials = if uris.iter().any(|uri| !is_signed_url(uri)) {
            self.load_credentials(&mut errors).await
        } else {
            Vec::new()
        };

        let staging = self.staging_dir();
        let mut downloaded = Vec::new();
        for uri in &uris {
            match self.download(uri, &credentials, &staging).await {
                Ok(file_name) => downloaded.push(file_name),
                Err(err) => {
                    debug!(%uri, error = %err, "failed to download boot diagnostics artifact");
                    errors.push(err);
                }
            }
        }

        if !downloaded.is_empty() {
            self.archive(&downloaded, &mut errors);
        }
        self.remove_staging();

        errors.into_result()
    }

    async fn list_machines(&self, errors: &mut AggregateError) -> Vec<VirtualMachine> {
        let mut machines = Vec::new();
        let mut next_link: Option<String> = None;
        loop {
            // Retry a failed page once; without it the next link is unknown.
            let current = match self.fetch_page(next_link.as_deref()).await {
                Ok(found) => found,
                Err(err) => {
                    debug!(error = %err, "failed to list virtual machines; retrying page");
                    errors.push(err);
                    match self.fetch_page(next_link.as_deref()).await {
                        Ok(retried) => retried,
                        Err(retry_err) => {
                            debug!(error = %retry_err, "failed to list virtual machines");
                            errors.push(retry_err);
                            break;
                        }
                    }
                }
            };
            machines.extend(current.value);
            match current.next_link.filter(|link| !link.is_empty()) {
                Some(link) => next_link = Some(link),
                None => break,
            }
        }
        machines
    }

    async fn fetch_page(&self, next_link: Option<&str>) -> Result<VirtualMachinePage, AzureError> {
        self.call(
            "list virtual machines",
            self.api.list_virtual_machines(&self.resource_group, next_link),
        )
        .await
    }

    async fn artifact_uris(
        &self,
        machines: &[VirtualMachine],
        errors: &mut AggregateError,
    ) -> Vec<String> {
        let mut uris = Vec::new();
        for machine in machines {
            if !machine.boot_diagnostics_enabled() {
                debug!(vm = %machine.name, "boot diagnostics disabled; skipping");
                continue;
            }
            let view = self
                .call(
                    "get instance view",
                    self.api.instance_view(&self.resource_group, &machine.name),
                )
                .await;
            match view {
                Ok(found) => uris.extend(found.artifact_uris()),
                Err(err) => {
                    debug!(vm = %machine.name, error = %err, "failed to get instance view");
                    errors.push(err);
                }
            }
        }
        uris
    }

    async fn load_credentials(&self, errors: &mut AggregateError) -> Vec<SharedKeyCredential> {
        let listed = self
            .call(
                "list storage accounts",
                self.api.list_storage_accounts(&self.resource_group),
            )
            .await;
        let accounts = match listed {
            Ok(found) => found,
            Err(err) => {
                debug!(error = %err, "could not find any storage accounts");
                errors.push(err);
                return Vec::new();
            }
        };

        let mut credentials = Vec::new();
        for account in &accounts {
            let listed_keys = self
                .call(
                    "list account keys",
                    self.api.list_account_keys(&self.resource_group, account),
                )
                .await;
            let Ok(keys) = listed_keys.inspect_err(|err| {
                debug!(%account, error = %err, "failed to list keys");
            }) else {
                continue;
            };
            for key in keys {
                match SharedKeyCredential::new(account.as_str(), key) {
                    Ok(credential) => credentials.push(credential),
                    Err(err) => debug!(%account, error = %err, "failed to get shared key"),
                }
            }
        }
        credentials
    }

    async fn download(
        &self,
        uri: &str,
        credentials: &[SharedKeyCredential],
        staging: &Utf8Path,
    ) -> Result<String, AzureError> {
        debug!(%uri, "attempting to download");
        let file_name = blob_file_name(uri)?;
        let contents = if is_signed_url(uri) {
            self.call(&format!("download {uri}"), self.api.download_blob(uri, None))
                .await?
        } else {
            self.download_with_credentials(uri, credentials).await?
        };
        write_file(staging, &file_name, &contents)?;
        Ok(file_name)
    }

    async fn download_with_credentials(
        &self,
        uri: &str,
        credentials: &[SharedKeyCredential],
    ) -> Result<Vec<u8>, AzureError> {
        for credential in credentials {
            let attempt = self
                .call(
                    &format!("download {uri}"),
                    self.api.download_blob(uri, Some(credential)),
                )
                .await;
            match attempt {
                Ok(contents) => return Ok(contents),
                Err(err) => {
                    debug!(%uri, account = credential.account(), error = %err, "credential rejected");
                }
            }
        }
        Err(AzureError::NoCredential {
            uri: uri.to_owned(),
            attempts: credentials.len(),
        })
    }

    fn archive(&self, files: &[String], errors: &mut AggregateError) {
        match self.write_bundle(files) {
            Ok(()) => info!(
                path = %self.serial_bundle,
                files = files.len(),
                "wrote serial log bundle"
            ),
            Err(err) => {
                debug!(error = %err, "failed to create archive");
                errors.push(err);
                self.remove_partial_bundle();
            }
        }
    }

    fn write_bundle(&self, files: &[String]) -> Result<(), AzureError> {
        create_archive_entries(&self.bundle_entries(files), &self.serial_bundle)?;
        Ok(())
    }

    /// Pairs each staged file with its entry name,
    /// `<install dir name>/<staging>/<file>`, so that merging keeps only
    /// `<file>` under the serial-logs directory.
    fn bundle_entries(&self, files: &[String]) -> Vec<(Utf8PathBuf, Utf8PathBuf)> {
        let staging_dir = self.staging_dir();
        let prefix = Utf8Path::new(self.install_dir.file_name().unwrap_or(UNNAMED_INSTALL_DIR))
            .join(self.staging_name());
        files
            .iter()
            .map(|file| (staging_dir.join(file), prefix.join(file)))
            .collect()
    }

    fn remove_partial_bundle(&self) {
        let (Some(parent), Some(file_name)) =
            (self.serial_bundle.parent(), self.serial_bundle.file_name())
        else {
            return;
        };
        let result = Dir::open_ambient_dir(parent, ambient_authority())
            .and_then(|dir| dir.remove_file(file_name));
        match result {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.serial_bundle, error = %err, "failed to remove partial serial log bundle");
            }
        }
    }

    fn remove_staging(&self) {
        let staging = self.staging_name();
        let result = Dir::open_ambient_dir(&self.install_dir, ambient_authority())
            .and_then(|dir| dir.remove_dir_all(&staging));
        match result {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.staging_dir(), error = %err, "failed to remove archive directory");
            }
        }
    }
}

impl<A: AzureApi> SerialGather for AzureGather<A> {
    fn run(&self) -> GatherFuture<'_> {
        Box::pin(self.gather())
    }
}

fn blob_file_name(uri: &str) -> Result<String, AzureError> {
    let invalid = |message: &str| AzureError::InvalidUri {
        uri: uri.to_owned(),
        message: message.to_owned(),
    };
    let url = Url::parse(uri).map_err(|err| invalid(&err.to_string()))?;
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_owned)
        .ok_or_else(|| invalid("location has no file name"))
}

fn write_file(staging: &Utf8Path, file_name: &str, contents: &[u8]) -> Result<(), AzureError> {
    let io_error = |err: io::Error| AzureError::Io {
        path: staging.join(file_name),
        message: err.to_string(),
    };
    Dir::create_ambient_dir_all(staging, ambient_authority()).map_err(io_error)?;
    let dir = Dir::open_ambient_dir(staging, ambient_authority()).map_err(io_error)?;
    dir.write(file_name, contents).map_err(io_error)
}
