//! Workload pod access: listing by label, remote exec, and deletion

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, DeleteParams, ListParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::DeleteOutcome;
use crate::crd::WorkloadInstance;
use crate::{Error, Result};

const POD_KIND: &str = "Pod";

/// Pod operations the controller needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodClient: Send + Sync {
    /// Pods in `namespace` matching a label selector string
    async fn list(&self, namespace: &str, label_selector: &str) -> Result<Vec<WorkloadInstance>>;

    /// Run `command` in the pod's default container and return combined
    /// stdout and stderr. [`Error::NotFound`] if the pod is gone.
    async fn exec(&self, namespace: &str, pod: &str, command: Vec<String>) -> Result<String>;

    /// Delete the pod so its owning controller recreates it
    async fn delete(&self, namespace: &str, pod: &str) -> Result<DeleteOutcome>;
}

/// Convert a Kubernetes pod into the controller's view of it
pub fn instance_from_pod(pod: &Pod) -> WorkloadInstance {
    let status = pod.status.as_ref();
    let running = status.and_then(|s| s.phase.as_deref()) == Some("Running");
    let containers_ready = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|cs| cs.iter().all(|c| c.ready))
        .unwrap_or(true);

    WorkloadInstance {
        name: pod.name_any(),
        namespace: pod.namespace().unwrap_or_default(),
        labels: pod.labels().clone(),
        ready: running && containers_ready,
    }
}

/// [`PodClient`] backed by the Kubernetes core API
#[derive(Clone)]
pub struct KubePodClient {
    client: Client,
}

impl KubePodClient {
    /// Create a new KubePodClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn list(&self, namespace: &str, label_selector: &str) -> Result<Vec<WorkloadInstance>> {
        let pods = self
            .api(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(pods.items.iter().map(instance_from_pod).collect())
    }

    async fn exec(&self, namespace: &str, pod: &str, command: Vec<String>) -> Result<String> {
        let api = self.api(namespace);

        // The exec upgrade does not surface a plain 404, so check existence first.
        if api
            .get_opt(pod)
            .await
            .map_err(|e| Error::from_api(POD_KIND, pod, e))?
            .is_none()
        {
            return Err(Error::not_found(POD_KIND, pod));
        }

        debug!(pod, namespace, command = ?command, "exec");
        let params = AttachParams::default().stdin(false).stdout(true).stderr(true);
        let mut attached = api
            .exec(pod, command, &params)
            .await
            .map_err(|e| Error::exec(pod, e.to_string()))?;

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let (out, err) = tokio::join!(read_all(stdout), read_all(stderr));
        attached
            .join()
            .await
            .map_err(|e| Error::exec(pod, e.to_string()))?;

        let mut output = out.map_err(|e| Error::exec(pod, e.to_string()))?;
        output.push_str(&err.map_err(|e| Error::exec(pod, e.to_string()))?);
        Ok(output)
    }

    async fn delete(&self, namespace: &str, pod: &str) -> Result<DeleteOutcome> {
        match self.api(namespace).delete(pod, &DeleteParams::default()).await {
            Ok(_) => {
                info!(pod, namespace, "pod deleted");
                Ok(DeleteOutcome::Requested)
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(Error::from_api(POD_KIND, pod, e)),
        }
    }
}

async fn read_all<R>(reader: Option<R>) -> std::io::Result<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = String::new();
    if let Some(mut reader) = reader {
        reader.read_to_string(&mut buf).await?;
    }
    Ok(buf)
}
