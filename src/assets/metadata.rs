//! Cluster metadata written alongside the install assets.

use serde::Deserialize;
use serde_json::Value;

/// Cloud environment assumed when metadata does not name one.
pub const DEFAULT_AZURE_CLOUD: &str = "AzurePublicCloud";

/// Provisioned cluster identity plus one platform-specific section.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetadata {
    /// Human readable cluster name.
    pub cluster_name: String,
    /// Unique cluster identifier.
    #[serde(rename = "clusterID", default)]
    pub cluster_id: String,
    /// Infrastructure identifier used to name cloud resources.
    #[serde(rename = "infraID", default)]
    pub infra_id: String,
    /// Azure section, present when the cluster runs on Azure.
    #[serde(default)]
    pub azure: Option<AzureMetadata>,
    /// AWS section, kept opaque.
    #[serde(default)]
    pub aws: Option<Value>,
    /// GCP section, kept opaque.
    #[serde(default)]
    pub gcp: Option<Value>,
}

impl ClusterMetadata {
    /// Name of the platform whose section is populated, if any.
    #[must_use]
    pub const fn platform(&self) -> Option<&'static str> {
        if self.azure.is_some() {
            Some("azure")
        } else if self.aws.is_some() {
            Some("aws")
        } else if self.gcp.is_some() {
            Some("gcp")
        } else {
            None
        }
    }
}

/// Azure-specific cluster metadata.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureMetadata {
    /// Cloud environment name, for example `AzureUSGovernmentCloud`.
    #[serde(default)]
    pub cloud_name: Option<String>,
    /// Resource group holding the cluster resources.
    #[serde(default)]
    pub resource_group_name: Option<String>,
    /// Resource manager endpoint, required for Azure Stack.
    #[serde(default)]
    pub arm_endpoint: Option<String>,
    /// Region the cluster was provisioned in.
    #[serde(default)]
    pub region: String,
}

impl AzureMetadata {
    /// Cloud environment name, defaulting to the public cloud.
    #[must_use]
    pub fn cloud_name(&self) -> &str {
        self.cloud_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_AZURE_CLOUD)
    }

    /// Resource group name, defaulting to `<infra_id>-rg`.
    #[must_use]
    pub fn resource_group(&self, infra_id: &str) -> String {
        self.resource_group_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .map_or_else(|| format!("{infra_id}-rg"), str::to_owned)
    }
}
