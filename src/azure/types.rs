//! Resource manager documents read by the Azure backend.
//!
//! Only the fields the gather needs are modelled; everything else in the
//! documents is ignored.

use serde::Deserialize;

/// One page of `virtualMachines` results.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachinePage {
    /// Machines on this page.
    #[serde(default)]
    pub value: Vec<VirtualMachine>,
    /// Absolute URL of the next page, if any.
    #[serde(default)]
    pub next_link: Option<String>,
}

/// A virtual machine resource.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct VirtualMachine {
    /// Resource name.
    #[serde(default)]
    pub name: String,
    /// Resource properties.
    #[serde(default)]
    pub properties: VirtualMachineProperties,
}

impl VirtualMachine {
    /// Returns `true` when boot diagnostics capture is enabled.
    #[must_use]
    pub fn boot_diagnostics_enabled(&self) -> bool {
        self.properties
            .diagnostics_profile
            .as_ref()
            .and_then(|profile| profile.boot_diagnostics.as_ref())
            .is_some_and(|diagnostics| diagnostics.enabled)
    }
}

/// Subset of virtual machine properties.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineProperties {
    /// Diagnostics settings.
    #[serde(default)]
    pub diagnostics_profile: Option<DiagnosticsProfile>,
}

/// Diagnostics settings of a virtual machine.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsProfile {
    /// Boot diagnostics settings.
    #[serde(default)]
    pub boot_diagnostics: Option<BootDiagnostics>,
}

/// Boot diagnostics settings.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootDiagnostics {
    /// Whether console output and screenshots are captured.
    #[serde(default)]
    pub enabled: bool,
    /// Storage account endpoint receiving the artifacts.
    #[serde(default)]
    pub storage_uri: Option<String>,
}

/// Runtime instance view of a virtual machine.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    /// Boot diagnostics artifact locations.
    #[serde(default)]
    pub boot_diagnostics: Option<BootDiagnosticsInstanceView>,
}

impl InstanceView {
    /// Artifact locations, screenshot first; blank locations are skipped.
    #[must_use]
    pub fn artifact_uris(&self) -> Vec<String> {
        self.boot_diagnostics
            .iter()
            .flat_map(|view| {
                [
                    view.console_screenshot_blob_uri.as_ref(),
                    view.serial_console_log_blob_uri.as_ref(),
                ]
            })
            .flatten()
            .filter(|uri| !uri.trim().is_empty())
            .cloned()
            .collect()
    }
}

/// Boot diagnostics artifact locations.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootDiagnosticsInstanceView {
    /// Location of the console screenshot.
    #[serde(default)]
    pub console_screenshot_blob_uri: Option<String>,
    /// Location of the serial console log.
    #[serde(default)]
    pub serial_console_log_blob_uri: Option<String>,
}
