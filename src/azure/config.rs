//! Azure credentials loaded via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::ConfigError;

/// Azure subscription and service principal settings, merged from defaults,
/// configuration files and `AZURE_*` environment variables.
#[derive(Clone, Debug, Default, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "AZURE")]
pub struct AzureConfig {
    /// Subscription holding the cluster resource group.
    pub subscription_id: Option<String>,
    /// Directory (tenant) of the service principal.
    pub tenant_id: Option<String>,
    /// Application (client) ID of the service principal.
    pub client_id: Option<String>,
    /// Client secret of the service principal.
    pub client_secret: Option<String>,
    /// Pre-issued resource manager bearer token. Takes precedence over the
    /// service principal when set.
    pub access_token: Option<String>,
    /// Login endpoint override, required for Azure Stack.
    pub authority_host: Option<String>,
}

/// How the backend authenticates against the resource manager.
#[derive(Clone, PartialEq, Eq)]
pub enum AzureCredential {
    /// A bearer token issued out of band.
    AccessToken(String),
    /// OAuth2 client credentials.
    ClientSecret {
        /// Directory (tenant) ID.
        tenant_id: String,
        /// Application (client) ID.
        client_id: String,
        /// Client secret.
        client_secret: String,
    },
}

impl std::fmt::Debug for AzureCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
            Self::ClientSecret {
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("ClientSecret")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

const SUBSCRIPTION: FieldMetadata = FieldMetadata {
    description: "Azure subscription ID",
    env_var: "AZURE_SUBSCRIPTION_ID",
    toml_key: "subscription_id",
};
const TENANT: FieldMetadata = FieldMetadata {
    description: "Azure tenant ID",
    env_var: "AZURE_TENANT_ID",
    toml_key: "tenant_id",
};
const CLIENT: FieldMetadata = FieldMetadata {
    description: "Azure client ID",
    env_var: "AZURE_CLIENT_ID",
    toml_key: "client_id",
};
const SECRET: FieldMetadata = FieldMetadata {
    description: "Azure client secret",
    env_var: "AZURE_CLIENT_SECRET",
    toml_key: "client_secret",
};

fn require<'a>(value: Option<&'a str>, metadata: &FieldMetadata) -> Result<&'a str, ConfigError> {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [azure] in bootstrap-gather.toml (or set AZURE_ACCESS_TOKEN)",
            metadata.description, metadata.env_var, metadata.toml_key
        ))),
    }
}

impl AzureConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("bootstrap-gather")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Subscription ID, validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when it is blank or absent.
    pub fn subscription(&self) -> Result<&str, ConfigError> {
        require(self.subscription_id.as_deref(), &SUBSCRIPTION)
    }

    /// Selects the credential to authenticate with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first missing piece
    /// of the service principal when no access token is configured.
    pub fn credential(&self) -> Result<AzureCredential, ConfigError> {
        if let Some(token) = self
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
        {
            return Ok(AzureCredential::AccessToken(token.to_owned()));
        }
        Ok(AzureCredential::ClientSecret {
            tenant_id: require(self.tenant_id.as_deref(), &TENANT)?.to_owned(),
            client_id: require(self.client_id.as_deref(), &CLIENT)?.to_owned(),
            client_secret: require(self.client_secret.as_deref(), &SECRET)?.to_owned(),
        })
    }

    /// Performs semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the subscription is missing
    /// or neither an access token nor a full service principal is set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.subscription()?;
        self.credential()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EnvGuard;
    use rstest::{fixture, rstest};

    #[fixture]
    fn principal() -> AzureConfig {
        AzureConfig {
            subscription_id: Some(String::from("sub")),
            tenant_id: Some(String::from("tenant")),
            client_id: Some(String::from("client")),
            client_secret: Some(String::from("secret")),
            ..AzureConfig::default()
        }
    }

    #[rstest]
    fn service_principal_is_selected(principal: AzureConfig) {
        assert_eq!(
            principal.credential().expect("credential"),
            AzureCredential::ClientSecret {
                tenant_id: String::from("tenant"),
                client_id: String::from("client"),
                client_secret: String::from("secret"),
            }
        );
    }

    #[rstest]
    fn access_token_takes_precedence(principal: AzureConfig) {
        let config = AzureConfig {
            access_token: Some(String::from("token")),
            client_secret: None,
            ..principal
        };

        assert_eq!(
            config.credential().expect("credential"),
            AzureCredential::AccessToken(String::from("token"))
        );
        config.validate().expect("token config is valid");
    }

    #[rstest]
    #[case::subscription(AzureConfig { subscription_id: None, ..principal() }, "AZURE_SUBSCRIPTION_ID")]
    #[case::tenant(AzureConfig { tenant_id: Some(String::from(" ")), ..principal() }, "AZURE_TENANT_ID")]
    #[case::client(AzureConfig { client_id: None, ..principal() }, "AZURE_CLIENT_ID")]
    #[case::secret(AzureConfig { client_secret: None, ..principal() }, "AZURE_CLIENT_SECRET")]
    fn missing_fields_are_actionable(#[case] config: AzureConfig, #[case] env_var: &str) {
        let err = config.validate().expect_err("validation should fail");

        let message = err.to_string();
        assert!(message.contains(env_var), "{message}");
        assert!(message.contains("bootstrap-gather.toml"), "{message}");
    }

    #[rstest]
    fn debug_hides_secrets(principal: AzureConfig) {
        let rendered = format!("{:?}", principal.credential().expect("credential"));
        assert!(!rendered.contains("secret"), "{rendered}");
        assert!(rendered.contains("tenant"), "{rendered}");
    }

    #[rstest]
    #[tokio::test]
    async fn environment_variables_are_loaded() {
        let _guard = EnvGuard::set_vars(&[
            ("AZURE_SUBSCRIPTION_ID", Some("env-sub")),
            ("AZURE_ACCESS_TOKEN", Some("env-token")),
            ("AZURE_TENANT_ID", None),
            ("AZURE_CLIENT_ID", None),
            ("AZURE_CLIENT_SECRET", None),
        ])
        .await;

        let config = AzureConfig::load_without_cli_args().expect("load config");

        assert_eq!(config.subscription().expect("subscription"), "env-sub");
        assert_eq!(
            config.credential().expect("credential"),
            AzureCredential::AccessToken(String::from("env-token"))
        );
    }
}
