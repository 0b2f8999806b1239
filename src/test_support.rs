//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::Utf8Path;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder, EntryType, Header};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::assets::{Asset, AssetError, AssetStore};
use crate::azure::{
    ApiFuture, AzureApi, AzureError, BootDiagnostics, BootDiagnosticsInstanceView,
    DiagnosticsProfile, InstanceView, SharedKeyCredential, VirtualMachine, VirtualMachinePage,
    VirtualMachineProperties,
};
use crate::ssh::{CommandFuture, CommandOutput, CommandRunner, RemoteShellError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<Result<CommandOutput, RemoteShellError>>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Deadline the caller attached to the invocation.
    pub timeout: Duration,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes the output `ssh` produces when the host refuses connections.
    pub fn push_connection_refused(&self) {
        self.push_output(
            Some(255),
            "",
            "ssh: connect to host 10.0.0.5 port 22: Connection refused",
        );
    }

    /// Pushes a runner-level timeout.
    pub fn push_timeout(&self, program: &str) {
        lock(&self.responses).push_back(Err(RemoteShellError::Timeout {
            program: program.to_owned(),
            seconds: 1,
        }));
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(Ok(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        timeout: Duration,
    ) -> CommandFuture<'a> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            timeout,
        });
        let response = lock(&self.responses).pop_front();
        Box::pin(async move {
            response.unwrap_or_else(|| {
                Err(RemoteShellError::Spawn {
                    program: program.to_owned(),
                    message: String::from("no scripted response available"),
                })
            })
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    /// A `None` value removes the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Writes a gzip-compressed tar bundle whose entries carry the given names
/// and contents.
///
/// # Errors
///
/// Returns any I/O error raised while writing the bundle.
pub fn write_bundle(path: &Utf8Path, entries: &[(&str, &str)]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut builder = Builder::new(GzEncoder::new(BufWriter::new(file), Compression::fast()));
    for (name, contents) in entries {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(contents.len() as u64);
        builder.append_data(&mut header, name, contents.as_bytes())?;
    }
    let mut writer = builder.into_inner()?.finish()?;
    writer.flush()
}

/// Reads every entry of a bundle as `(name, bytes)` pairs in stream order.
///
/// # Errors
///
/// Returns any I/O error raised while decoding the bundle.
pub fn read_bundle(path: &Utf8Path) -> io::Result<Vec<(String, Vec<u8>)>> {
    let file = File::open(path)?;
    let mut archive = Archive::new(MultiGzDecoder::new(BufReader::new(file)));
    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let mut found = entry?;
        let name = String::from_utf8_lossy(&found.path_bytes()).into_owned();
        let mut contents = Vec::new();
        found.read_to_end(&mut contents)?;
        entries.push((name, contents));
    }
    Ok(entries)
}

/// In-memory [`AssetStore`] seeded with raw asset bytes.
#[derive(Clone, Debug, Default)]
pub struct MemoryAssetStore {
    assets: BTreeMap<Asset, Vec<u8>>,
}

impl MemoryAssetStore {
    /// Creates an empty store; every fetch reports a missing asset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds raw bytes for `asset`.
    #[must_use]
    pub fn with(mut self, asset: Asset, bytes: impl Into<Vec<u8>>) -> Self {
        self.assets.insert(asset, bytes.into());
        self
    }

    /// Adds a bootstrap key pair with the given private key text.
    #[must_use]
    pub fn with_key_pair(self, private: &str) -> Self {
        let body = serde_json::json!({ "private": private, "public": "ssh-ed25519 AAAA test" });
        self.with(Asset::BootstrapSshKeyPair, body.to_string())
    }

    /// Adds an install config for `platform`.
    #[must_use]
    pub fn with_install_config(self, platform: &str) -> Self {
        let mut platforms = serde_json::Map::new();
        platforms.insert(platform.to_owned(), serde_json::json!({}));
        let body = serde_json::json!({ "platform": platforms });
        self.with(Asset::InstallConfig, body.to_string())
    }

    /// Adds Azure cluster metadata for the given infrastructure ID.
    #[must_use]
    pub fn with_azure_metadata(self, infra_id: &str) -> Self {
        let body = serde_json::json!({
            "clusterName": "test",
            "clusterID": "00000000-0000-0000-0000-000000000000",
            "infraID": infra_id,
            "azure": { "region": "eastus" }
        });
        self.with(Asset::ClusterMetadata, body.to_string())
    }
}

impl AssetStore for MemoryAssetStore {
    fn fetch(&self, asset: Asset) -> Result<Vec<u8>, AssetError> {
        self.assets
            .get(&asset)
            .cloned()
            .ok_or(AssetError::Missing { asset })
    }
}

/// Builds a virtual machine whose boot diagnostics are `enabled` or not.
#[must_use]
pub fn virtual_machine(name: &str, enabled: bool) -> VirtualMachine {
    VirtualMachine {
        name: name.to_owned(),
        properties: VirtualMachineProperties {
            diagnostics_profile: Some(DiagnosticsProfile {
                boot_diagnostics: Some(BootDiagnostics {
                    enabled,
                    storage_uri: None,
                }),
            }),
        },
    }
}

/// Builds an instance view exposing the given artifact locations.
#[must_use]
pub fn instance_view(screenshot: Option<&str>, serial_log: Option<&str>) -> InstanceView {
    InstanceView {
        boot_diagnostics: Some(BootDiagnosticsInstanceView {
            console_screenshot_blob_uri: screenshot.map(str::to_owned),
            serial_console_log_blob_uri: serial_log.map(str::to_owned),
        }),
    }
}

#[derive(Debug, Default)]
struct FakeAzureState {
    pages: Vec<Result<Vec<VirtualMachine>, String>>,
    page_hiccups: BTreeMap<usize, String>,
    views: BTreeMap<String, Result<InstanceView, String>>,
    hanging_views: BTreeSet<String>,
    accounts: Vec<String>,
    account_failure: Option<String>,
    keys: BTreeMap<String, Vec<String>>,
    blobs: BTreeMap<String, (Option<String>, Vec<u8>)>,
    downloads: Vec<(String, Option<String>)>,
    view_calls: Vec<String>,
}

/// Scripted [`AzureApi`] backed by in-memory inventories and blobs.
///
/// Pages are linked with synthetic `page-<n>` continuation tokens. A blob
/// registered with a key only downloads with a credential carrying that key;
/// a blob registered without one behaves like a signed URL.
#[derive(Clone, Debug, Default)]
pub struct FakeAzureApi {
    state: Arc<Mutex<FakeAzureState>>,
}

impl FakeAzureApi {
    /// Creates an API with an empty inventory and no storage accounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a page of virtual machines.
    pub fn push_page(&self, machines: Vec<VirtualMachine>) {
        lock(&self.state).pages.push(Ok(machines));
    }

    /// Appends a page that fails to load.
    pub fn push_failed_page(&self, message: &str) {
        lock(&self.state).pages.push(Err(message.to_owned()));
    }

    /// Appends a page whose first fetch fails and whose second succeeds.
    pub fn push_flaky_page(&self, machines: Vec<VirtualMachine>, message: &str) {
        let mut state = lock(&self.state);
        let index = state.pages.len();
        state.pages.push(Ok(machines));
        state.page_hiccups.insert(index, message.to_owned());
    }

    /// Makes the instance view lookup for `machine` never complete.
    pub fn hang_instance_view(&self, machine: &str) {
        lock(&self.state).hanging_views.insert(machine.to_owned());
    }

    /// Registers the instance view returned for `machine`.
    pub fn set_instance_view(&self, machine: &str, view: InstanceView) {
        lock(&self.state)
            .views
            .insert(machine.to_owned(), Ok(view));
    }

    /// Makes the instance view lookup for `machine` fail.
    pub fn fail_instance_view(&self, machine: &str, message: &str) {
        lock(&self.state)
            .views
            .insert(machine.to_owned(), Err(message.to_owned()));
    }

    /// Registers a storage account and its access keys.
    pub fn add_account(&self, account: &str, keys: &[&str]) {
        let mut state = lock(&self.state);
        state.accounts.push(account.to_owned());
        state.keys.insert(
            account.to_owned(),
            keys.iter().map(|key| (*key).to_owned()).collect(),
        );
    }

    /// Makes storage account listing fail.
    pub fn fail_account_listing(&self, message: &str) {
        lock(&self.state).account_failure = Some(message.to_owned());
    }

    /// Registers blob content reachable only with `key`, or directly when
    /// `key` is `None`.
    pub fn add_blob(&self, uri: &str, key: Option<&str>, contents: &[u8]) {
        lock(&self.state)
            .blobs
            .insert(uri.to_owned(), (key.map(str::to_owned), contents.to_vec()));
    }

    /// Returns every download attempt as `(uri, credential account)`.
    #[must_use]
    pub fn downloads(&self) -> Vec<(String, Option<String>)> {
        lock(&self.state).downloads.clone()
    }

    /// Returns the machines whose instance view was requested.
    #[must_use]
    pub fn instance_view_calls(&self) -> Vec<String> {
        lock(&self.state).view_calls.clone()
    }
}

fn fake_failure(operation: &str, message: &str) -> AzureError {
    AzureError::Status {
        operation: operation.to_owned(),
        status: 500,
        body: message.to_owned(),
    }
}

impl AzureApi for FakeAzureApi {
    fn list_virtual_machines<'a>(
        &'a self,
        _resource_group: &'a str,
        next_link: Option<&'a str>,
    ) -> ApiFuture<'a, VirtualMachinePage> {
        let index = next_link
            .and_then(|link| link.strip_prefix("page-"))
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(0);
        let mut state = lock(&self.state);
        if let Some(message) = state.page_hiccups.remove(&index) {
            drop(state);
            return Box::pin(async move { Err(fake_failure("list virtual machines", &message)) });
        }
        let result = match state.pages.get(index) {
            None if index == 0 => Ok(VirtualMachinePage::default()),
            None => Err(fake_failure("list virtual machines", "unknown page")),
            Some(Err(message)) => Err(fake_failure("list virtual machines", message)),
            Some(Ok(machines)) => Ok(VirtualMachinePage {
                value: machines.clone(),
                next_link: (index + 1 < state.pages.len()).then(|| format!("page-{}", index + 1)),
            }),
        };
        drop(state);
        Box::pin(async move { result })
    }

    fn instance_view<'a>(
        &'a self,
        _resource_group: &'a str,
        machine: &'a str,
    ) -> ApiFuture<'a, InstanceView> {
        let mut state = lock(&self.state);
        state.view_calls.push(machine.to_owned());
        if state.hanging_views.contains(machine) {
            drop(state);
            return Box::pin(std::future::pending());
        }
        let result = match state.views.get(machine) {
            Some(Ok(view)) => Ok(view.clone()),
            Some(Err(message)) => Err(fake_failure("get instance view", message)),
            None => Ok(InstanceView::default()),
        };
        drop(state);
        Box::pin(async move { result })
    }

    fn list_storage_accounts<'a>(&'a self, _resource_group: &'a str) -> ApiFuture<'a, Vec<String>> {
        let state = lock(&self.state);
        let result = state.account_failure.as_ref().map_or_else(
            || Ok(state.accounts.clone()),
            |message| Err(fake_failure("list storage accounts", message)),
        );
        drop(state);
        Box::pin(async move { result })
    }

    fn list_account_keys<'a>(
        &'a self,
        _resource_group: &'a str,
        account: &'a str,
    ) -> ApiFuture<'a, Vec<String>> {
        let result = lock(&self.state)
            .keys
            .get(account)
            .cloned()
            .ok_or_else(|| fake_failure("list account keys", "unknown account"));
        Box::pin(async move { result })
    }

    fn download_blob<'a>(
        &'a self,
        uri: &'a str,
        credential: Option<&'a SharedKeyCredential>,
    ) -> ApiFuture<'a, Vec<u8>> {
        let mut state = lock(&self.state);
        state.downloads.push((
            uri.to_owned(),
            credential.map(|cred| cred.account().to_owned()),
        ));
        let result = match state.blobs.get(uri) {
            None => Err(AzureError::Status {
                operation: format!("download {uri}"),
                status: 404,
                body: String::from("BlobNotFound"),
            }),
            Some((None, contents)) => Ok(contents.clone()),
            Some((Some(key), contents)) => match credential {
                Some(cred) if cred.key() == key.as_str() => Ok(contents.clone()),
                _ => Err(AzureError::Status {
                    operation: format!("download {uri}"),
                    status: 403,
                    body: String::from("AuthenticationFailed"),
                }),
            },
        };
        drop(state);
        Box::pin(async move { result })
    }
}
