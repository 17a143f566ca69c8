//! Kubernetes client construction and manifest loading

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts.
///
/// Without a path the configuration is inferred (in-cluster service account,
/// then `KUBECONFIG` / `~/.kube/config`).
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::config(format!("failed to read kubeconfig: {}", e)))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer config: {}", e)))?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    debug!(cluster_url = %config.cluster_url, "creating kube client");
    Client::try_from(config).map_err(|e| Error::config(format!("failed to create client: {}", e)))
}

/// Parse a multi-document YAML (or JSON) string into manifests.
///
/// Empty documents are skipped.
pub fn parse_manifests(content: &str) -> Result<Vec<Value>> {
    let mut manifests = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document)
            .map_err(|e| Error::serialization(format!("invalid manifest: {}", e)))?;
        if !value.is_null() {
            manifests.push(value);
        }
    }
    Ok(manifests)
}

/// Read and parse a manifest file
pub fn load_manifests(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::validation(format!("cannot read {}: {}", path.display(), e)))?;
    parse_manifests(&content)
}
