//! Error types for the Azure backend.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::archive::ArchiveError;

/// Errors raised while talking to Azure or assembling the serial bundle.
#[derive(Debug, Error)]
pub enum AzureError {
    /// Raised when Azure answers with a non-success status.
    #[error("{operation} failed with status {status}: {body}")]
    Status {
        /// Operation being performed.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Response body, usually an Azure error document.
        body: String,
    },
    /// Raised when the request cannot be sent or the body cannot be read.
    #[error("{operation} request failed: {message}")]
    Http {
        /// Operation being performed.
        operation: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a response body does not match the expected shape.
    #[error("failed to decode {operation} response: {message}")]
    Decode {
        /// Operation being performed.
        operation: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a call outlives its deadline.
    #[error("{operation} did not finish within {seconds}s")]
    Timeout {
        /// Operation being performed.
        operation: String,
        /// Deadline in seconds.
        seconds: u64,
    },
    /// Raised when the cloud environment cannot be resolved.
    #[error("unsupported Azure environment {name}: {message}")]
    Environment {
        /// Cloud name recorded in the cluster metadata.
        name: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when no access token can be obtained.
    #[error("failed to acquire an Azure access token: {message}")]
    Token {
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a blob location is not a usable URL.
    #[error("invalid blob location {uri}: {message}")]
    InvalidUri {
        /// Offending location.
        uri: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a shared-key signature cannot be computed.
    #[error("failed to sign request for storage account {account}: {message}")]
    Signing {
        /// Storage account owning the key.
        account: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when every credential was rejected for a download.
    #[error("unable to download file: {uri} ({attempts} credentials tried)")]
    NoCredential {
        /// Location that could not be downloaded.
        uri: String,
        /// Number of credentials tried.
        attempts: usize,
    },
    /// Raised when a downloaded artifact cannot be written to disk.
    #[error("failed to write {path}: {message}")]
    Io {
        /// Path being written.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the serial bundle cannot be written.
    #[error("failed to create the serial log bundle: {0}")]
    Archive(#[from] ArchiveError),
}
