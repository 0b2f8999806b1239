//! Stage extractors that read Terraform state files.
//!
//! Each stage owns one `terraform.<stage>.tfstate` file in the install
//! directory and picks attributes out of it by resource type, resource name,
//! and a dotted attribute path such as `network_interface.0.network_ip`.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Deserialize;
use serde_json::Value;

use super::{HostAddresses, HostIds, HostStage, ResolveError};
use crate::assets::InstallConfig;

const SUPPORTED_STATE_VERSION: u64 = 4;

#[derive(Debug, Default, Deserialize)]
struct StateFile {
    #[serde(default)]
    version: u64,
    #[serde(default)]
    resources: Vec<StateResource>,
}

#[derive(Debug, Deserialize)]
struct StateResource {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    instances: Vec<StateInstance>,
}

#[derive(Debug, Deserialize)]
struct StateInstance {
    #[serde(default)]
    attributes: Value,
}

/// Picks one attribute out of every instance of a Terraform resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AttributeSelector {
    /// Terraform resource type, for example `aws_instance`.
    pub resource_type: &'static str,
    /// Terraform resource name, for example `bootstrap`.
    pub resource_name: &'static str,
    /// Dotted attribute path; numeric segments index into lists.
    pub attribute: &'static str,
}

impl AttributeSelector {
    /// Creates a selector.
    #[must_use]
    pub const fn new(
        resource_type: &'static str,
        resource_name: &'static str,
        attribute: &'static str,
    ) -> Self {
        Self {
            resource_type,
            resource_name,
            attribute,
        }
    }

    fn select(&self, state: &StateFile) -> Vec<String> {
        state
            .resources
            .iter()
            .filter(|resource| {
                resource.kind == self.resource_type && resource.name == self.resource_name
            })
            .flat_map(|resource| resource.instances.iter())
            .filter_map(|instance| lookup(&instance.attributes, self.attribute))
            .filter(|value| !value.is_empty())
            .collect()
    }
}

fn lookup(root: &Value, path: &str) -> Option<String> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            Value::Object(fields) => fields.get(segment)?,
            _ => return None,
        };
    }
    match current {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// A stage backed by `terraform.<name>.tfstate`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TerraformStage {
    name: &'static str,
    bootstrap_address: Option<AttributeSelector>,
    master_addresses: Option<AttributeSelector>,
    bootstrap_id: Option<AttributeSelector>,
    master_ids: Option<AttributeSelector>,
    ssh_port: Option<u16>,
}

impl TerraformStage {
    /// Creates a stage that reports nothing until selectors are added.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            bootstrap_address: None,
            master_addresses: None,
            bootstrap_id: None,
            master_ids: None,
            ssh_port: None,
        }
    }

    /// Reads the bootstrap address with `selector`.
    #[must_use]
    pub const fn with_bootstrap_address(mut self, selector: AttributeSelector) -> Self {
        self.bootstrap_address = Some(selector);
        self
    }

    /// Reads control-plane addresses with `selector`.
    #[must_use]
    pub const fn with_master_addresses(mut self, selector: AttributeSelector) -> Self {
        self.master_addresses = Some(selector);
        self
    }

    /// Reads the bootstrap instance identifier with `selector`.
    #[must_use]
    pub const fn with_bootstrap_id(mut self, selector: AttributeSelector) -> Self {
        self.bootstrap_id = Some(selector);
        self
    }

    /// Reads control-plane instance identifiers with `selector`.
    #[must_use]
    pub const fn with_master_ids(mut self, selector: AttributeSelector) -> Self {
        self.master_ids = Some(selector);
        self
    }

    /// Reports a fixed, non-default SSH port.
    #[must_use]
    pub const fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = Some(port);
        self
    }

    /// File name of the state this stage reads.
    #[must_use]
    pub fn state_file_name(&self) -> String {
        format!("terraform.{}.tfstate", self.name)
    }

    fn load_state(&self, dir: &Utf8Path) -> Result<Option<StateFile>, ResolveError> {
        let file_name = self.state_file_name();
        let path = dir.join(&file_name);
        let state_error = |message: String| ResolveError::State {
            path: path.clone(),
            message,
        };

        let root = Dir::open_ambient_dir(dir, ambient_authority())
            .map_err(|err| state_error(err.to_string()))?;
        let raw = match root.read_to_string(&file_name) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(state_error(err.to_string())),
        };
        let state: StateFile =
            serde_json::from_str(&raw).map_err(|err| state_error(err.to_string()))?;
        if state.version != SUPPORTED_STATE_VERSION {
            return Err(state_error(format!(
                "unsupported state version {}",
                state.version
            )));
        }
        Ok(Some(state))
    }
}

fn first(selector: Option<&AttributeSelector>, state: &StateFile) -> Option<String> {
    selector.and_then(|sel| sel.select(state).into_iter().next())
}

fn all(selector: Option<&AttributeSelector>, state: &StateFile) -> Vec<String> {
    selector.map_or_else(Vec::new, |sel| sel.select(state))
}

impl HostStage for TerraformStage {
    fn name(&self) -> &str {
        self.name
    }

    fn extract_host_addresses(
        &self,
        dir: &Utf8Path,
        _config: &InstallConfig,
    ) -> Result<HostAddresses, ResolveError> {
        let Some(state) = self.load_state(dir)? else {
            return Ok(HostAddresses::default());
        };
        Ok(HostAddresses {
            bootstrap: first(self.bootstrap_address.as_ref(), &state),
            port: self.ssh_port,
            masters: all(self.master_addresses.as_ref(), &state),
        })
    }

    fn extract_host_ids(
        &self,
        dir: &Utf8Path,
        _config: &InstallConfig,
    ) -> Result<HostIds, ResolveError> {
        let Some(state) = self.load_state(dir)? else {
            return Ok(HostIds::default());
        };
        Ok(HostIds {
            bootstrap: first(self.bootstrap_id.as_ref(), &state),
            masters: all(self.master_ids.as_ref(), &state),
        })
    }
}

const AZURE_STAGES: [TerraformStage; 2] = [
    TerraformStage::new("bootstrap")
        .with_bootstrap_address(AttributeSelector::new(
            "azurerm_network_interface",
            "bootstrap",
            "private_ip_address",
        ))
        .with_bootstrap_id(AttributeSelector::new(
            "azurerm_linux_virtual_machine",
            "bootstrap",
            "name",
        )),
    TerraformStage::new("cluster")
        .with_master_addresses(AttributeSelector::new(
            "azurerm_network_interface",
            "master",
            "private_ip_address",
        ))
        .with_master_ids(AttributeSelector::new(
            "azurerm_linux_virtual_machine",
            "master",
            "name",
        )),
];

const AWS_STAGES: [TerraformStage; 2] = [
    TerraformStage::new("bootstrap")
        .with_bootstrap_address(AttributeSelector::new("aws_instance", "bootstrap", "public_ip"))
        .with_bootstrap_id(AttributeSelector::new("aws_instance", "bootstrap", "id")),
    TerraformStage::new("cluster")
        .with_master_addresses(AttributeSelector::new("aws_instance", "master", "private_ip"))
        .with_master_ids(AttributeSelector::new("aws_instance", "master", "id")),
];

const GCP_STAGES: [TerraformStage; 2] = [
    TerraformStage::new("bootstrap")
        .with_bootstrap_address(AttributeSelector::new(
            "google_compute_instance",
            "bootstrap",
            "network_interface.0.access_config.0.nat_ip",
        ))
        .with_bootstrap_id(AttributeSelector::new(
            "google_compute_instance",
            "bootstrap",
            "name",
        )),
    TerraformStage::new("cluster")
        .with_master_addresses(AttributeSelector::new(
            "google_compute_instance",
            "master",
            "network_interface.0.network_ip",
        ))
        .with_master_ids(AttributeSelector::new(
            "google_compute_instance",
            "master",
            "name",
        )),
];

/// Ordered stages for `platform`; empty for platforms without a catalogue.
#[must_use]
pub fn stages_for_platform(platform: &str) -> Vec<Box<dyn HostStage>> {
    let stages: &[TerraformStage] = match platform {
        "azure" => &AZURE_STAGES,
        "aws" => &AWS_STAGES,
        "gcp" => &GCP_STAGES,
        _ => &[],
    };
    stages
        .iter()
        .map(|stage| Box::new(*stage) as Box<dyn HostStage>)
        .collect()
}
