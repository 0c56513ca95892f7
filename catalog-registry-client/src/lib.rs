//! Thin gRPC client for the external registry server (`spec.md` §6). This
//! crate contains *only* the client stub and the [`RegistryClient`]/
//! [`SourceQuerier`] wrapper C1 manages connections to — never a server
//! implementation, since the registry server is an out-of-scope external
//! process (`spec.md` §1).

pub mod pb {
    tonic::include_proto!("catalog.registry.v1");
}

use async_trait::async_trait;
use pb::registry_client::RegistryClient as GrpcClient;
use pb::{GetBundleInPackageChannelRequest, GetReplacementBundleInPackageChannelRequest, HealthRequest, ListPackagesRequest};
use tonic::transport::Channel;

pub use pb::Bundle;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("registry rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("failed to connect to registry server at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("bundle not found for package={package} channel={channel}")]
    NotFound { package: String, channel: String },
}

/// The concrete in-repo analogue of `spec.md`'s "registry server" client
/// contract, consumed by C4's resolver and by C1's health checks.
#[async_trait]
pub trait SourceQuerier: Send + Sync {
    async fn get_bundle_in_package_channel(
        &self,
        package: &str,
        channel: &str,
        csv_name: Option<&str>,
    ) -> Result<Bundle, ClientError>;

    async fn get_replacement_bundle_in_package_channel(
        &self,
        csv_name: &str,
        package: &str,
        channel: &str,
    ) -> Result<Option<Bundle>, ClientError>;

    async fn list_packages(&self) -> Result<Vec<String>, ClientError>;

    async fn health(&self) -> Result<bool, ClientError>;
}

/// One live gRPC connection to a catalog's registry server.
#[derive(Clone)]
pub struct RegistryClient {
    address: String,
    inner: GrpcClient<Channel>,
}

impl RegistryClient {
    /// Connects to `address` (`host:port`, already resolved — DNS/image
    /// resolution for `CatalogSource.spec.address` happens in C5, not
    /// here). Connection attempts must never block the caller for long:
    /// C1 spawns this behind its own reconnect task.
    pub async fn connect(address: impl Into<String>) -> Result<Self, ClientError> {
        let address = address.into();
        let endpoint = format!("http://{address}");
        let channel = Channel::from_shared(endpoint)
            .map_err(|e| ClientError::Connect {
                address: address.clone(),
                source: tonic::transport::Error::from(e),
            })?
            .connect()
            .await
            .map_err(|source| ClientError::Connect { address: address.clone(), source })?;
        Ok(Self { address, inner: GrpcClient::new(channel) })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl SourceQuerier for RegistryClient {
    async fn get_bundle_in_package_channel(
        &self,
        package: &str,
        channel: &str,
        csv_name: Option<&str>,
    ) -> Result<Bundle, ClientError> {
        let mut client = self.inner.clone();
        let req = GetBundleInPackageChannelRequest {
            package_name: package.to_string(),
            channel_name: channel.to_string(),
            csv_name: csv_name.unwrap_or_default().to_string(),
        };
        let resp = client.get_bundle_in_package_channel(req).await?;
        Ok(resp.into_inner())
    }

    async fn get_replacement_bundle_in_package_channel(
        &self,
        csv_name: &str,
        package: &str,
        channel: &str,
    ) -> Result<Option<Bundle>, ClientError> {
        let mut client = self.inner.clone();
        let req = GetReplacementBundleInPackageChannelRequest {
            csv_name: csv_name.to_string(),
            package_name: package.to_string(),
            channel_name: channel.to_string(),
        };
        match client.get_replacement_bundle_in_package_channel(req).await {
            Ok(resp) => Ok(Some(resp.into_inner())),
            Err(status) if status.code() == tonic::Code::NotFound => Ok(None),
            Err(status) => Err(status.into()),
        }
    }

    async fn list_packages(&self) -> Result<Vec<String>, ClientError> {
        let mut client = self.inner.clone();
        let mut stream = client.list_packages(ListPackagesRequest {}).await?.into_inner();
        let mut names = Vec::new();
        while let Some(pkg) = stream.message().await? {
            names.push(pkg.name);
        }
        Ok(names)
    }

    async fn health(&self) -> Result<bool, ClientError> {
        let mut client = self.inner.clone();
        let resp = client.health(HealthRequest {}).await?;
        Ok(resp.into_inner().serving)
    }
}

/// In-memory stand-in for [`SourceQuerier`], used by C4's unit/integration
/// tests so they don't need a live registry server.
pub mod test_support {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{Bundle, ClientError, SourceQuerier};

    #[derive(Default)]
    pub struct FakeQuerier {
        bundles: Mutex<HashMap<(String, String, String), Bundle>>,
        replacements: Mutex<HashMap<String, Bundle>>,
    }

    impl FakeQuerier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_bundle(self, package: &str, channel: &str, csv_name: &str, bundle: Bundle) -> Self {
            self.bundles
                .lock()
                .unwrap()
                .insert((package.to_string(), channel.to_string(), csv_name.to_string()), bundle);
            self
        }

        pub fn with_replacement(self, current_csv: &str, bundle: Bundle) -> Self {
            self.replacements.lock().unwrap().insert(current_csv.to_string(), bundle);
            self
        }
    }

    #[async_trait]
    impl SourceQuerier for FakeQuerier {
        async fn get_bundle_in_package_channel(
            &self,
            package: &str,
            channel: &str,
            csv_name: Option<&str>,
        ) -> Result<Bundle, ClientError> {
            let key = (package.to_string(), channel.to_string(), csv_name.unwrap_or_default().to_string());
            self.bundles.lock().unwrap().get(&key).cloned().ok_or_else(|| ClientError::NotFound {
                package: package.to_string(),
                channel: channel.to_string(),
            })
        }

        async fn get_replacement_bundle_in_package_channel(
            &self,
            csv_name: &str,
            _package: &str,
            _channel: &str,
        ) -> Result<Option<Bundle>, ClientError> {
            Ok(self.replacements.lock().unwrap().get(csv_name).cloned())
        }

        async fn list_packages(&self) -> Result<Vec<String>, ClientError> {
            Ok(self.bundles.lock().unwrap().keys().map(|(p, _, _)| p.clone()).collect())
        }

        async fn health(&self) -> Result<bool, ClientError> {
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_error_formats_with_package_and_channel() {
        let err = ClientError::NotFound { package: "etcd".into(), channel: "alpha".into() };
        assert_eq!(err.to_string(), "bundle not found for package=etcd channel=alpha");
    }

    #[tokio::test]
    async fn fake_querier_round_trips_replacement_lookup() {
        use test_support::FakeQuerier;

        let bundle = Bundle { csv_name: "etcd.v2".into(), ..Default::default() };
        let querier = FakeQuerier::new().with_replacement("etcd.v1", bundle.clone());
        let found = querier.get_replacement_bundle_in_package_channel("etcd.v1", "etcd", "alpha").await.unwrap();
        assert_eq!(found, Some(bundle));
        assert!(querier.get_replacement_bundle_in_package_channel("etcd.v2", "etcd", "alpha").await.unwrap().is_none());
    }
}
