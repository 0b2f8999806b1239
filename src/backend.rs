//! Cloud-native gather backends.
//!
//! A backend pulls console and serial diagnostics straight from a cloud
//! platform's management API, without any SSH access to the hosts. Per-item
//! failures never abort a backend run; they are collected into an
//! [`AggregateError`] returned alongside whatever bundle was produced.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::assets::ClusterMetadata;

/// Parameters handed to a backend constructor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatherParams {
    /// Path the serial bundle is written to.
    pub serial_bundle: Utf8PathBuf,
    /// Absolute install directory.
    pub install_dir: Utf8PathBuf,
    /// Token shared by every artifact of this gather.
    pub gather_id: String,
    /// Bootstrap host address.
    pub bootstrap: String,
    /// Bootstrap instance identifier, when known.
    pub bootstrap_id: Option<String>,
    /// Control-plane host addresses.
    pub masters: Vec<String>,
    /// Control-plane instance identifiers, when known.
    pub master_ids: Vec<String>,
    /// Cluster metadata naming the platform and its scope.
    pub metadata: ClusterMetadata,
}

/// Future returned by [`SerialGather::run`].
pub type GatherFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AggregateError>> + Send + 'a>>;

/// A per-platform cloud-native gather.
pub trait SerialGather: Send + Sync {
    /// Collects console artifacts into the serial bundle.
    ///
    /// # Errors
    ///
    /// Returns an [`AggregateError`] listing every per-item failure, even
    /// when the bundle was still written from the items that succeeded.
    fn run(&self) -> GatherFuture<'_>;
}

/// Errors raised while constructing a backend.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when no backend is registered for the platform.
    #[error("no gather methods registered for {platform:?}")]
    NotRegistered {
        /// Platform named by the cluster metadata.
        platform: String,
    },
    /// Raised when the cluster metadata names no platform.
    #[error("no platform configured in metadata")]
    NoPlatform,
    /// Raised when the metadata lacks the platform's section.
    #[error("cluster metadata has no {platform} section")]
    MissingMetadata {
        /// Platform whose section is absent.
        platform: String,
    },
    /// Raised when backend settings are missing or invalid.
    #[error("invalid backend configuration: {0}")]
    Configuration(String),
}

/// Several independent failures collected by one stage.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<Box<dyn StdError + Send + Sync>>,
}

impl AggregateError {
    /// Creates an empty aggregate.
    #[must_use]
    pub const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Records one failure.
    pub fn push(&mut self, error: impl StdError + Send + Sync + 'static) {
        self.errors.push(Box::new(error));
    }

    /// Recorded failures in the order they happened.
    #[must_use]
    pub fn errors(&self) -> &[Box<dyn StdError + Send + Sync>] {
        &self.errors
    }

    /// Number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns `true` when nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Converts into a result: `Ok(())` when empty, `Err(self)` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `self` when at least one failure was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("no errors"),
            [only] => write!(f, "{only}"),
            [head, tail @ ..] => {
                write!(f, "[{head}")?;
                for error in tail {
                    write!(f, ", {error}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl StdError for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn empty_aggregate_is_ok() {
        assert!(AggregateError::new().into_result().is_ok());
    }

    #[rstest]
    fn single_error_displays_verbatim() {
        let mut aggregate = AggregateError::new();
        aggregate.push(BackendError::NoPlatform);

        let err = aggregate.into_result().expect_err("one failure");

        assert_eq!(err.len(), 1);
        assert_eq!(err.to_string(), "no platform configured in metadata");
    }

    #[rstest]
    fn several_errors_display_as_list() {
        let mut aggregate = AggregateError::new();
        aggregate.push(BackendError::NoPlatform);
        aggregate.push(BackendError::NotRegistered {
            platform: String::from("libvirt"),
        });

        assert_eq!(
            aggregate.to_string(),
            "[no platform configured in metadata, no gather methods registered for \"libvirt\"]"
        );
        assert_eq!(aggregate.errors().len(), 2);
    }
}
