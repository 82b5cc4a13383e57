//! Kubernetes client provider for dependency injection
//!
//! Abstracts kube::Client creation so startup can be tested without a
//! cluster.

use std::time::Duration;

use tracing::debug;
use warden_common::Result;

/// Connection timeout for the API server
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Trait for creating Kubernetes clients
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait KubeClientProvider: Send + Sync {
    /// Create a new Kubernetes client
    async fn create(&self) -> std::result::Result<kube::Client, kube::Error>;
}

/// Creates clients from the in-cluster config, falling back to kubeconfig
#[derive(Clone, Default)]
pub struct InClusterClientProvider;

#[async_trait::async_trait]
impl KubeClientProvider for InClusterClientProvider {
    async fn create(&self) -> std::result::Result<kube::Client, kube::Error> {
        let mut config = kube::Config::infer()
            .await
            .map_err(kube::Error::InferConfig)?;
        // No read timeout: watches are long-lived requests
        config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
        config.read_timeout = None;
        kube::Client::try_from(config)
    }
}

/// Create a client through `provider`
pub async fn create_client(provider: &dyn KubeClientProvider) -> Result<kube::Client> {
    let client = provider.create().await?;
    debug!("successfully connected to Kubernetes cluster");
    Ok(client)
}

/// Query the API server version, confirming the client works
pub async fn server_version(client: &kube::Client) -> Result<String> {
    let info = client.apiserver_version().await?;
    debug!(version = %info.git_version, "connected to Kubernetes cluster");
    Ok(info.git_version)
}
