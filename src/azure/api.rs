//! The Azure surface used by the backend.

use std::future::Future;
use std::pin::Pin;

use super::error::AzureError;
use super::shared_key::SharedKeyCredential;
use super::types::{InstanceView, VirtualMachinePage};

/// Future returned by [`AzureApi`] calls.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AzureError>> + Send + 'a>>;

/// Resource manager and blob storage operations needed to gather console
/// artifacts.
pub trait AzureApi: Send + Sync {
    /// Lists one page of virtual machines in `resource_group`. `next_link`
    /// continues from a previous page.
    fn list_virtual_machines<'a>(
        &'a self,
        resource_group: &'a str,
        next_link: Option<&'a str>,
    ) -> ApiFuture<'a, VirtualMachinePage>;

    /// Fetches the instance view of `machine`.
    fn instance_view<'a>(
        &'a self,
        resource_group: &'a str,
        machine: &'a str,
    ) -> ApiFuture<'a, InstanceView>;

    /// Lists storage account names in `resource_group`.
    fn list_storage_accounts<'a>(&'a self, resource_group: &'a str) -> ApiFuture<'a, Vec<String>>;

    /// Lists the access keys of `account`.
    fn list_account_keys<'a>(
        &'a self,
        resource_group: &'a str,
        account: &'a str,
    ) -> ApiFuture<'a, Vec<String>>;

    /// Downloads a blob, signing the request with `credential` when given.
    fn download_blob<'a>(
        &'a self,
        uri: &'a str,
        credential: Option<&'a SharedKeyCredential>,
    ) -> ApiFuture<'a, Vec<u8>>;
}
