//! Remote shell client built on the system `ssh` and `scp` binaries.
//!
//! A [`RemoteShell`] opens a [`Session`] by probing the host, runs a single
//! command per call, and copies named files back to local disk. Connection
//! failures are split into [`RemoteShellError::HostUnreachable`] (refused or
//! timed out) and [`RemoteShellError::Setup`] (everything else) so callers
//! can tell an unbooted host from a broken key.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use tracing::debug;

use crate::config::GatherConfig;

mod error;
mod types;

pub use error::RemoteShellError;
pub use types::{CommandFuture, CommandOutput, CommandRunner, ProcessCommandRunner};

/// Exit status `ssh` reserves for its own failures.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Stderr fragments that identify a host that is not accepting connections.
const UNREACHABLE_MARKERS: [&str; 2] = ["connection refused", "timed out"];

/// Command run to prove a session can be established.
const PROBE_COMMAND: &str = "true";

/// An authenticated target for subsequent commands and copies.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    user: String,
    host: String,
    port: u16,
    keys: Vec<Utf8PathBuf>,
}

impl Session {
    /// Remote user the session authenticates as.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Host address the session targets.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port used for SSH.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Private key files offered during authentication, in order.
    #[must_use]
    pub fn keys(&self) -> &[Utf8PathBuf] {
        &self.keys
    }

    fn login(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn remote_spec(&self, remote_path: &str) -> String {
        if self.host.contains(':') {
            format!("{}@[{}]:{remote_path}", self.user, self.host)
        } else {
            format!("{}@{}:{remote_path}", self.user, self.host)
        }
    }
}

/// Runs commands and copies files over SSH through a [`CommandRunner`].
#[derive(Clone, Debug)]
pub struct RemoteShell<R: CommandRunner> {
    config: GatherConfig,
    runner: R,
}

impl RemoteShell<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteShellError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: GatherConfig) -> Result<Self, RemoteShellError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> RemoteShell<R> {
    /// Creates a shell client using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteShellError::InvalidConfig`] when configuration
    /// validation fails.
    pub fn new(config: GatherConfig, runner: R) -> Result<Self, RemoteShellError> {
        config
            .validate()
            .map_err(|err| RemoteShellError::InvalidConfig(err.to_string()))?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &GatherConfig {
        &self.config
    }

    /// Opens a session by running a no-op command on `host`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteShellError::HostUnreachable`] when the connection is
    /// refused or times out, and [`RemoteShellError::Setup`] for any other
    /// failure.
    pub async fn connect(
        &self,
        user: &str,
        host: &str,
        port: u16,
        keys: &[Utf8PathBuf],
    ) -> Result<Session, RemoteShellError> {
        let session = Session {
            user: user.to_owned(),
            host: host.to_owned(),
            port,
            keys: keys.to_vec(),
        };
        let args = self.build_ssh_args(&session, PROBE_COMMAND);
        debug!(host, port, "probing SSH connectivity");
        let output = match self
            .runner
            .run(&self.config.ssh_bin, &args, self.config.command_timeout())
            .await
        {
            Ok(output) => output,
            Err(RemoteShellError::Timeout { seconds, .. }) => {
                return Err(RemoteShellError::HostUnreachable {
                    host: host.to_owned(),
                    message: format!("connection attempt timed out after {seconds}s"),
                });
            }
            Err(RemoteShellError::Spawn { program, message }) => {
                return Err(RemoteShellError::Setup {
                    host: host.to_owned(),
                    message: format!("failed to spawn {program}: {message}"),
                });
            }
            Err(other) => return Err(other),
        };

        if output.is_success() {
            return Ok(session);
        }
        Err(classify_connect_failure(host, &output))
    }

    /// Runs `command` on the session host.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteShellError::RemoteCommand`] when the command (or the
    /// transport) exits non-zero, and runner errors unchanged.
    ///
    /// # Security
    ///
    /// `command` is passed verbatim to the remote shell; build it with
    /// [`render_command`] when it carries untrusted arguments.
    pub async fn run(
        &self,
        session: &Session,
        command: &str,
    ) -> Result<CommandOutput, RemoteShellError> {
        let args = self.build_ssh_args(session, command);
        let output = self
            .runner
            .run(&self.config.ssh_bin, &args, self.config.command_timeout())
            .await?;
        if output.is_success() {
            return Ok(output);
        }

        Err(RemoteShellError::RemoteCommand {
            host: session.host.clone(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr,
        })
    }

    /// Copies `remote_path` from the session host to `local_path`. A single
    /// attempt is made.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteShellError::PullFile`] when the copy fails for any
    /// reason.
    pub async fn pull_file(
        &self,
        session: &Session,
        remote_path: &str,
        local_path: &Utf8Path,
    ) -> Result<(), RemoteShellError> {
        let pull_error = |message: String| RemoteShellError::PullFile {
            host: session.host.clone(),
            remote: remote_path.to_owned(),
            local: local_path.to_path_buf(),
            message,
        };

        let args = self.build_scp_args(session, remote_path, local_path);
        let output = self
            .runner
            .run(&self.config.scp_bin, &args, self.config.command_timeout())
            .await
            .map_err(|err| pull_error(err.to_string()))?;
        if output.is_success() {
            return Ok(());
        }
        Err(pull_error(format!(
            "{} exited with status {}: {}",
            self.config.scp_bin,
            output.status_text(),
            output.stderr.trim()
        )))
    }

    fn build_ssh_args(&self, session: &Session, command: &str) -> Vec<OsString> {
        let mut args = self.common_options("-p", session);
        args.push(OsString::from(session.login()));
        args.push(OsString::from(command));
        args
    }

    fn build_scp_args(
        &self,
        session: &Session,
        remote_path: &str,
        local_path: &Utf8Path,
    ) -> Vec<OsString> {
        let mut args = self.common_options("-P", session);
        args.push(OsString::from(session.remote_spec(remote_path)));
        args.push(OsString::from(local_path.as_str()));
        args
    }

    fn common_options(&self, port_flag: &str, session: &Session) -> Vec<OsString> {
        let mut args = vec![
            OsString::from(port_flag),
            OsString::from(session.port.to_string()),
        ];

        for key in &session.keys {
            args.push(OsString::from("-i"));
            args.push(OsString::from(key.as_str()));
        }

        if self.config.ssh_batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )));
        }

        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ConnectTimeout={}",
            self.config.ssh_connect_timeout_secs
        )));

        args
    }
}

/// Joins `program` and `args` into one shell-escaped command line.
#[must_use]
pub fn render_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(|part| escape(part.into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn classify_connect_failure(host: &str, output: &CommandOutput) -> RemoteShellError {
    let stderr = output.stderr.trim();
    let lowered = stderr.to_lowercase();
    if output.code == Some(SSH_TRANSPORT_FAILURE)
        && UNREACHABLE_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
    {
        return RemoteShellError::HostUnreachable {
            host: host.to_owned(),
            message: stderr.to_owned(),
        };
    }

    let message = if stderr.is_empty() {
        format!("ssh exited with status {}", output.status_text())
    } else {
        stderr.to_owned()
    };
    RemoteShellError::Setup {
        host: host.to_owned(),
        message,
    }
}
