//! Hand-off of the combined bundle to an analysis step.

use camino::Utf8Path;
use tracing::{info, warn};

use crate::archive::{ArchiveError, SERIAL_LOGS_DIR, entry_names};

/// Consumes a combined bundle once the gather completes.
pub trait BundleAnalyzer {
    /// Analyses the bundle at `bundle`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when the bundle cannot be read.
    fn analyze(&self, bundle: &Utf8Path) -> Result<BundleInventory, ArchiveError>;
}

/// Entry counts of a combined bundle.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BundleInventory {
    /// Entries pulled from the bootstrap host.
    pub host_entries: usize,
    /// Entries re-homed from the platform console bundle.
    pub serial_entries: usize,
}

/// Counts host and serial entries and warns when either side is empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct InventoryAnalyzer;

impl BundleAnalyzer for InventoryAnalyzer {
    fn analyze(&self, bundle: &Utf8Path) -> Result<BundleInventory, ArchiveError> {
        let mut inventory = BundleInventory::default();
        for name in entry_names(bundle)? {
            if name.split('/').nth(1) == Some(SERIAL_LOGS_DIR) {
                inventory.serial_entries += 1;
            } else {
                inventory.host_entries += 1;
            }
        }

        info!(
            path = %bundle,
            host = inventory.host_entries,
            serial = inventory.serial_entries,
            "analysed combined log bundle"
        );
        if inventory.host_entries == 0 {
            warn!(path = %bundle, "bundle holds no logs from the bootstrap host");
        }
        if inventory.serial_entries == 0 {
            warn!(path = %bundle, "bundle holds no platform console logs");
        }
        Ok(inventory)
    }
}
