//! Narrow seam over the remote Service API
//!
//! The wait operations only ever read a Service snapshot or request its
//! deletion, so that is the whole trait. Production code wraps a live
//! cluster connection; tests substitute a scripted fake without touching the
//! network.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::error::Error;

/// Read/delete surface of the remote collaborator
///
/// Implementations return raw [`kube::Error`] values: classification into
/// retryable and fatal happens at the call site, immediately after the
/// operation, so partial snapshots never leak past the boundary.
#[async_trait]
pub trait ServiceSource: Send + Sync {
    /// Fetch the current snapshot of a Service
    async fn get(&self, namespace: &str, name: &str) -> Result<Service, kube::Error>;

    /// Request immediate deletion of a Service (zero grace period)
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;
}

/// [`ServiceSource`] backed by a live cluster connection
#[derive(Clone)]
pub struct KubeServices {
    client: Client,
}

impl KubeServices {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ServiceSource for KubeServices {
    async fn get(&self, namespace: &str, name: &str) -> Result<Service, kube::Error> {
        self.services(namespace).get(name).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        let params = DeleteParams {
            grace_period_seconds: Some(0),
            ..DeleteParams::default()
        };
        self.services(namespace).delete(name, &params).await?;
        Ok(())
    }
}

/// Default connection timeout for kube clients (5s is plenty for a reachable API server)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path
///
/// Falls back to the inferred (in-cluster or default) configuration when no
/// path is given. Explicit connect/read timeouts keep a wedged API server
/// from stalling a polling session past its deadline.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::client(format!("failed to read kubeconfig: {}", e)))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::client(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::client(format!("failed to infer config: {}", e)))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| Error::client(format!("failed to create client: {}", e)))
}
