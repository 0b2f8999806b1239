//! Errors raised by the remote shell client.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors surfaced while connecting to, running on, or copying from a host.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteShellError {
    /// Raised when the shell settings are unusable.
    #[error("invalid remote shell settings: {0}")]
    InvalidConfig(String),
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a command outlives its deadline.
    #[error("{program} did not finish within {seconds}s")]
    Timeout {
        /// Command that was abandoned.
        program: String,
        /// Deadline that elapsed.
        seconds: u64,
    },
    /// Raised when the host refused the connection or the handshake timed
    /// out.
    #[error("host {host} is unreachable: {message}")]
    HostUnreachable {
        /// Host that could not be reached.
        host: String,
        /// Transport diagnostic reported by the client.
        message: String,
    },
    /// Raised for every other connection failure, such as rejected keys.
    #[error("failed to establish an SSH session with {host}: {message}")]
    Setup {
        /// Host the session was opened against.
        host: String,
        /// Diagnostic reported by the client.
        message: String,
    },
    /// Raised when a remote command exits with a non-zero status.
    #[error("remote command on {host} exited with status {status_text}: {stderr}")]
    RemoteCommand {
        /// Host that ran the command.
        host: String,
        /// Exit status as reported by the client.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the client.
        stderr: String,
    },
    /// Raised when copying a remote file fails.
    #[error("failed to copy {remote} from {host} to {local}: {message}")]
    PullFile {
        /// Host the file lives on.
        host: String,
        /// Remote path requested.
        remote: String,
        /// Local destination.
        local: Utf8PathBuf,
        /// Diagnostic reported by the copy client.
        message: String,
    },
}
