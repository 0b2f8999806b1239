//! Maps platform names to cloud-native gather backend constructors.
//!
//! Registrations are collected in a [`RegistryBuilder`] at start-up, each
//! platform module contributing its own entry, and frozen into an immutable
//! [`BackendRegistry`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::backend::{BackendError, GatherParams, SerialGather};

/// Builds a backend for one gather.
pub type BackendConstructor =
    Box<dyn Fn(&GatherParams) -> Result<Box<dyn SerialGather>, BackendError> + Send + Sync>;

/// Accumulates registrations before any gather runs.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: BTreeMap<String, BackendConstructor>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `constructor` for `platform`, replacing any earlier entry.
    pub fn register(&mut self, platform: impl Into<String>, constructor: BackendConstructor) {
        self.entries.insert(platform.into(), constructor);
    }

    /// Freezes the registrations.
    #[must_use]
    pub fn build(self) -> BackendRegistry {
        BackendRegistry {
            entries: self.entries,
        }
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("platforms", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Immutable platform to constructor mapping.
#[derive(Default)]
pub struct BackendRegistry {
    entries: BTreeMap<String, BackendConstructor>,
}

impl BackendRegistry {
    /// Registry with every built-in platform registered.
    #[must_use]
    pub fn with_default_platforms(api_timeout: Duration) -> Self {
        let mut builder = RegistryBuilder::new();
        crate::azure::register(&mut builder, api_timeout);
        builder.build()
    }

    /// Looks up the constructor registered for `platform`.
    #[must_use]
    pub fn lookup(&self, platform: &str) -> Option<&BackendConstructor> {
        self.entries.get(platform)
    }

    /// Registered platform names in sorted order.
    #[must_use]
    pub fn platforms(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Constructs the backend for the platform recorded in `params`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NoPlatform`] when the metadata names no
    /// platform, [`BackendError::NotRegistered`] when nothing is registered
    /// for it, and constructor errors unchanged.
    pub fn construct(&self, params: &GatherParams) -> Result<Box<dyn SerialGather>, BackendError> {
        let platform = params.metadata.platform().ok_or(BackendError::NoPlatform)?;
        let constructor = self
            .lookup(platform)
            .ok_or_else(|| BackendError::NotRegistered {
                platform: platform.to_owned(),
            })?;
        constructor(params)
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}
