//! Shared fixtures for gather BDD scenarios.

use std::sync::Arc;
use std::time::Duration;

use bootstrap_gather::azure::AzureGather;
use bootstrap_gather::test_support::{
    CommandInvocation, FakeAzureApi, MemoryAssetStore, ScriptedRunner, write_bundle,
};
use bootstrap_gather::{
    BackendError, BackendRegistry, GatherConfig, GatherError, GatherId, GatherOrchestrator,
    GatherOutcome, GatherParams, GatherRequest, RegistryBuilder, RemoteShell, RemoteShellError,
    SerialGather,
};
use camino::Utf8PathBuf;
use rstest::fixture;
use tempfile::TempDir;

pub const GATHER_ID: &str = "7";
pub const SERIAL_URI: &str =
    "https://sabootstrap.blob.core.windows.net/bootdiagnostics-boot/bootstrap.serialconsole.log";
pub const STORAGE_KEY: &str = "a2V5LW9uZQ==";
pub const HOST_ENTRIES: [(&str, &str); 2] = [
    ("log-bundle-7/bootstrap/journal.log", "journal"),
    ("log-bundle-7/control-plane/10.0.0.6/kubelet.log", "kubelet"),
];

#[derive(Clone, Debug)]
pub enum GatherResult {
    Success(GatherOutcome),
    Failure { kind: String, message: String },
}

#[derive(Clone, Debug)]
pub struct GatherContext {
    pub runner: ScriptedRunner,
    pub api: FakeAzureApi,
    pub assets: MemoryAssetStore,
    pub request: GatherRequest,
    pub with_backend: bool,
    pub install_dir: Utf8PathBuf,
    pub result: Option<GatherResult>,
    pub(crate) _tmp: Arc<TempDir>,
}

#[fixture]
pub fn gather_context() -> GatherContext {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("create install temp directory: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be valid UTF-8: {}", path.display()));
    let install_dir = root.join("install");
    std::fs::create_dir(&install_dir)
        .unwrap_or_else(|err| panic!("create install directory {install_dir}: {err}"));

    GatherContext {
        runner: ScriptedRunner::new(),
        api: FakeAzureApi::new(),
        assets: MemoryAssetStore::new()
            .with_key_pair("BOOTSTRAP KEY")
            .with_azure_metadata("infra"),
        request: GatherRequest {
            bootstrap: String::from("10.0.0.5"),
            masters: vec![String::from("10.0.0.6")],
            keys: Vec::new(),
            gather_id: GatherId::from(GATHER_ID),
        },
        with_backend: true,
        install_dir,
        result: None,
        _tmp: Arc::new(tmp),
    }
}

impl GatherContext {
    /// Places the host bundle where `scp` would have written it.
    pub fn seed_host_bundle(&self) {
        let path = self.host_bundle();
        write_bundle(&path, &HOST_ENTRIES)
            .unwrap_or_else(|err| panic!("write host bundle {path}: {err}"));
    }

    pub fn host_bundle(&self) -> Utf8PathBuf {
        self.install_dir.join(format!("log-bundle-{GATHER_ID}.tar.gz"))
    }

    pub fn serial_bundle(&self) -> Utf8PathBuf {
        self.install_dir
            .join(format!("serial-log-bundle-{GATHER_ID}.tar.gz"))
    }

    pub fn orchestrator(&self) -> Result<GatherOrchestrator<ScriptedRunner>, RemoteShellError> {
        let shell = RemoteShell::new(GatherConfig::default(), self.runner.clone())?;
        Ok(GatherOrchestrator::new(
            self.install_dir.clone(),
            Box::new(self.assets.clone()),
            self.registry(),
            shell,
        ))
    }

    fn registry(&self) -> BackendRegistry {
        if !self.with_backend {
            return BackendRegistry::default();
        }
        let api = self.api.clone();
        let mut builder = RegistryBuilder::new();
        builder.register(
            "azure",
            Box::new(
                move |params: &GatherParams| -> Result<Box<dyn SerialGather>, BackendError> {
                    Ok(Box::new(AzureGather::new(
                        api.clone(),
                        "infra-rg",
                        params,
                        Duration::from_secs(5),
                    )))
                },
            ),
        );
        builder.build()
    }

    /// Key files passed to `ssh -i` or `scp -i`.
    pub fn offered_keys(&self) -> Vec<Utf8PathBuf> {
        self.runner
            .invocations()
            .iter()
            .flat_map(key_arguments)
            .collect()
    }
}

fn key_arguments(invocation: &CommandInvocation) -> Vec<Utf8PathBuf> {
    let args: Vec<String> = invocation
        .args
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    args.windows(2)
        .filter_map(|pair| match pair {
            [flag, value] if flag == "-i" => Some(Utf8PathBuf::from(value)),
            _ => None,
        })
        .collect()
}

pub fn failure_kind(err: &GatherError) -> &'static str {
    match err {
        GatherError::Configuration(_) => "configuration",
        GatherError::KeyMaterial(_) => "key material",
        GatherError::HostUnreachable { .. } => "host unreachable",
        GatherError::SshSetup { .. } => "ssh setup",
        GatherError::RemoteCommand { .. } => "remote command",
        GatherError::PullFile { .. } => "pull file",
        GatherError::Merge(_) => "merge",
    }
}
