//! Resource manager and blob storage client built on `reqwest`.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;

use super::api::{ApiFuture, AzureApi};
use super::config::{AzureConfig, AzureCredential};
use super::error::AzureError;
use super::shared_key::{STORAGE_API_VERSION, SharedKeyCredential};
use super::types::{InstanceView, VirtualMachinePage};

const COMPUTE_API_VERSION: &str = "2018-10-01";
const STORAGE_MANAGEMENT_API_VERSION: &str = "2019-06-01";

/// Endpoints of one Azure cloud.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AzureEnvironment {
    resource_manager: String,
    authority: String,
}

impl AzureEnvironment {
    /// Resolves a cloud name recorded in cluster metadata.
    ///
    /// `AzureStackCloud` takes its resource manager endpoint from
    /// `arm_endpoint` and needs `authority_host`; other clouds use their
    /// well-known endpoints, with `authority_host` overriding the login
    /// endpoint when set.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::Environment`] for unknown clouds and for Azure
    /// Stack without both endpoints.
    pub fn resolve(
        cloud_name: &str,
        arm_endpoint: Option<&str>,
        authority_host: Option<&str>,
    ) -> Result<Self, AzureError> {
        let unsupported = |message: &str| AzureError::Environment {
            name: cloud_name.to_owned(),
            message: message.to_owned(),
        };
        let (resource_manager, authority) = match cloud_name {
            "AzurePublicCloud" => (
                "https://management.azure.com",
                "https://login.microsoftonline.com",
            ),
            "AzureUSGovernmentCloud" => (
                "https://management.usgovcloudapi.net",
                "https://login.microsoftonline.us",
            ),
            "AzureChinaCloud" => (
                "https://management.chinacloudapi.cn",
                "https://login.chinacloudapi.cn",
            ),
            "AzureStackCloud" => {
                let endpoint = arm_endpoint
                    .filter(|value| !value.is_empty())
                    .ok_or_else(|| unsupported("cluster metadata has no armEndpoint"))?;
                let login = authority_host
                    .filter(|value| !value.is_empty())
                    .ok_or_else(|| {
                        unsupported("set AZURE_AUTHORITY_HOST to the Azure Stack login endpoint")
                    })?;
                (endpoint, login)
            }
            _ => return Err(unsupported("unknown cloud")),
        };
        let login = authority_host
            .filter(|value| !value.is_empty())
            .unwrap_or(authority);
        Ok(Self {
            resource_manager: resource_manager.trim_end_matches('/').to_owned(),
            authority: login.trim_end_matches('/').to_owned(),
        })
    }

    /// Resource manager base URL without a trailing slash.
    #[must_use]
    pub fn resource_manager(&self) -> &str {
        &self.resource_manager
    }

    /// Login base URL without a trailing slash.
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct StorageAccountList {
    #[serde(default)]
    value: Vec<NamedResource>,
}

#[derive(Deserialize)]
struct NamedResource {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct AccountKeyList {
    #[serde(default)]
    keys: Vec<AccountKey>,
}

#[derive(Deserialize)]
struct AccountKey {
    #[serde(default)]
    value: Option<String>,
}

/// [`AzureApi`] implementation talking to the live service.
pub struct ArmClient {
    http: Client,
    environment: AzureEnvironment,
    subscription_id: String,
    credential: AzureCredential,
    token: OnceCell<String>,
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("environment", &self.environment)
            .field("subscription_id", &self.subscription_id)
            .finish_non_exhaustive()
    }
}

impl ArmClient {
    /// Creates a client for `environment` using the validated `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::Token`] when the configuration lacks usable
    /// credentials and [`AzureError::Http`] when the HTTP client cannot be
    /// built.
    pub fn new(
        config: &AzureConfig,
        environment: AzureEnvironment,
        timeout: Duration,
    ) -> Result<Self, AzureError> {
        let token_error = |err: crate::config::ConfigError| AzureError::Token {
            message: err.to_string(),
        };
        let subscription_id = config.subscription().map_err(token_error)?.to_owned();
        let credential = config.credential().map_err(token_error)?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AzureError::Http {
                operation: String::from("build HTTP client"),
                message: err.to_string(),
            })?;
        Ok(Self {
            http,
            environment,
            subscription_id,
            credential,
            token: OnceCell::new(),
        })
    }

    fn resource_group_url(&self, resource_group: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{resource_group}",
            self.environment.resource_manager(),
            self.subscription_id
        )
    }

    async fn bearer_token(&self) -> Result<&str, AzureError> {
        let token = self
            .token
            .get_or_try_init(|| async {
                match &self.credential {
                    AzureCredential::AccessToken(token) => Ok(token.clone()),
                    AzureCredential::ClientSecret {
                        tenant_id,
                        client_id,
                        client_secret,
                    } => self.request_token(tenant_id, client_id, client_secret).await,
                }
            })
            .await?;
        Ok(token.as_str())
    }

    async fn request_token(
        &self,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<String, AzureError> {
        let operation = "acquire access token";
        let url = format!(
            "{}/{tenant_id}/oauth2/v2.0/token",
            self.environment.authority()
        );
        let scope = format!("{}/.default", self.environment.resource_manager());
        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(|err| AzureError::Token {
                message: err.to_string(),
            })?;
        let body: TokenResponse = decode(operation, checked(operation, response).await?).await?;
        Ok(body.access_token)
    }

    async fn management<T: DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        url: &str,
    ) -> Result<T, AzureError> {
        let token = self.bearer_token().await?;
        let request = self.http.request(method, url).bearer_auth(token);
        let response = send(operation, request).await?;
        decode(operation, response).await
    }

    async fn list_machines_page(
        &self,
        resource_group: &str,
        next_link: Option<&str>,
    ) -> Result<VirtualMachinePage, AzureError> {
        let url = next_link.map_or_else(
            || {
                format!(
                    "{}/providers/Microsoft.Compute/virtualMachines?api-version={COMPUTE_API_VERSION}",
                    self.resource_group_url(resource_group)
                )
            },
            str::to_owned,
        );
        self.management("list virtual machines", Method::GET, &url)
            .await
    }

    async fn get_instance_view(
        &self,
        resource_group: &str,
        machine: &str,
    ) -> Result<InstanceView, AzureError> {
        let url = format!(
            "{}/providers/Microsoft.Compute/virtualMachines/{machine}/instanceView?api-version={COMPUTE_API_VERSION}",
            self.resource_group_url(resource_group)
        );
        self.management("get instance view", Method::GET, &url).await
    }

    async fn storage_accounts(&self, resource_group: &str) -> Result<Vec<String>, AzureError> {
        let url = format!(
            "{}/providers/Microsoft.Storage/storageAccounts?api-version={STORAGE_MANAGEMENT_API_VERSION}",
            self.resource_group_url(resource_group)
        );
        let list: StorageAccountList = self
            .management("list storage accounts", Method::GET, &url)
            .await?;
        Ok(list
            .value
            .into_iter()
            .map(|account| account.name)
            .filter(|name| !name.is_empty())
            .collect())
    }

    async fn account_keys(
        &self,
        resource_group: &str,
        account: &str,
    ) -> Result<Vec<String>, AzureError> {
        let url = format!(
            "{}/providers/Microsoft.Storage/storageAccounts/{account}/listKeys?api-version={STORAGE_MANAGEMENT_API_VERSION}",
            self.resource_group_url(resource_group)
        );
        let list: AccountKeyList = self
            .management("list account keys", Method::POST, &url)
            .await?;
        Ok(list.keys.into_iter().filter_map(|key| key.value).collect())
    }

    async fn download(
        &self,
        uri: &str,
        credential: Option<&SharedKeyCredential>,
    ) -> Result<Vec<u8>, AzureError> {
        let operation = format!("download {uri}");
        let url = Url::parse(uri).map_err(|err| AzureError::InvalidUri {
            uri: uri.to_owned(),
            message: err.to_string(),
        })?;
        let mut request = self.http.get(url.clone());
        if let Some(key) = credential {
            let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            let authorization = key.authorization(&url, &date)?;
            request = request
                .header("x-ms-date", date)
                .header("x-ms-version", STORAGE_API_VERSION)
                .header(AUTHORIZATION, authorization);
        }
        let response = send(&operation, request).await?;
        let body = response.bytes().await.map_err(|err| AzureError::Http {
            operation: operation.clone(),
            message: err.to_string(),
        })?;
        Ok(body.to_vec())
    }
}

async fn send(operation: &str, request: RequestBuilder) -> Result<Response, AzureError> {
    let response = request.send().await.map_err(|err| AzureError::Http {
        operation: operation.to_owned(),
        message: err.to_string(),
    })?;
    checked(operation, response).await
}

async fn checked(operation: &str, response: Response) -> Result<Response, AzureError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AzureError::Status {
        operation: operation.to_owned(),
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(operation: &str, response: Response) -> Result<T, AzureError> {
    let bytes = response.bytes().await.map_err(|err| AzureError::Http {
        operation: operation.to_owned(),
        message: err.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|err| AzureError::Decode {
        operation: operation.to_owned(),
        message: err.to_string(),
    })
}

impl AzureApi for ArmClient {
    fn list_virtual_machines<'a>(
        &'a self,
        resource_group: &'a str,
        next_link: Option<&'a str>,
    ) -> ApiFuture<'a, VirtualMachinePage> {
        Box::pin(self.list_machines_page(resource_group, next_link))
    }

    fn instance_view<'a>(
        &'a self,
        resource_group: &'a str,
        machine: &'a str,
    ) -> ApiFuture<'a, InstanceView> {
        Box::pin(self.get_instance_view(resource_group, machine))
    }

    fn list_storage_accounts<'a>(&'a self, resource_group: &'a str) -> ApiFuture<'a, Vec<String>> {
        Box::pin(self.storage_accounts(resource_group))
    }

    fn list_account_keys<'a>(
        &'a self,
        resource_group: &'a str,
        account: &'a str,
    ) -> ApiFuture<'a, Vec<String>> {
        Box::pin(self.account_keys(resource_group, account))
    }

    fn download_blob<'a>(
        &'a self,
        uri: &'a str,
        credential: Option<&'a SharedKeyCredential>,
    ) -> ApiFuture<'a, Vec<u8>> {
        Box::pin(self.download(uri, credential))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::public("AzurePublicCloud", "https://management.azure.com", "https://login.microsoftonline.com")]
    #[case::government(
        "AzureUSGovernmentCloud",
        "https://management.usgovcloudapi.net",
        "https://login.microsoftonline.us"
    )]
    #[case::china(
        "AzureChinaCloud",
        "https://management.chinacloudapi.cn",
        "https://login.chinacloudapi.cn"
    )]
    fn well_known_clouds_resolve(
        #[case] name: &str,
        #[case] resource_manager: &str,
        #[case] authority: &str,
    ) {
        let environment = AzureEnvironment::resolve(name, None, None).expect("known cloud");

        assert_eq!(environment.resource_manager(), resource_manager);
        assert_eq!(environment.authority(), authority);
    }

    #[rstest]
    fn stack_cloud_uses_metadata_endpoint() {
        let environment = AzureEnvironment::resolve(
            "AzureStackCloud",
            Some("https://management.local.azurestack.external/"),
            Some("https://adfs.local.azurestack.external/"),
        )
        .expect("stack cloud");

        assert_eq!(
            environment.resource_manager(),
            "https://management.local.azurestack.external"
        );
        assert_eq!(environment.authority(), "https://adfs.local.azurestack.external");
    }

    #[rstest]
    #[case::stack_without_endpoint("AzureStackCloud", None, Some("https://login"))]
    #[case::stack_without_authority("AzureStackCloud", Some("https://arm"), None)]
    #[case::unknown("AzureMoonCloud", None, None)]
    fn unusable_environments_are_rejected(
        #[case] name: &str,
        #[case] arm_endpoint: Option<&str>,
        #[case] authority_host: Option<&str>,
    ) {
        let err = AzureEnvironment::resolve(name, arm_endpoint, authority_host)
            .expect_err("environment should be rejected");

        assert!(matches!(err, AzureError::Environment { name: ref cloud, .. } if cloud == name));
    }

    #[rstest]
    fn client_requires_credentials() {
        let environment = AzureEnvironment::resolve("AzurePublicCloud", None, None).expect("env");
        let config = AzureConfig {
            subscription_id: Some(String::from("sub")),
            ..AzureConfig::default()
        };

        let err = ArmClient::new(&config, environment, Duration::from_secs(5))
            .expect_err("missing principal");

        assert!(err.to_string().contains("AZURE_TENANT_ID"), "{err}");
    }

    #[rstest]
    fn resource_group_urls_are_scoped_to_the_subscription() {
        let environment = AzureEnvironment::resolve("AzurePublicCloud", None, None).expect("env");
        let config = AzureConfig {
            subscription_id: Some(String::from("sub")),
            access_token: Some(String::from("token")),
            ..AzureConfig::default()
        };

        let client = ArmClient::new(&config, environment, Duration::from_secs(5)).expect("client");

        assert_eq!(
            client.resource_group_url("infra-rg"),
            "https://management.azure.com/subscriptions/sub/resourceGroups/infra-rg"
        );
    }
}
