//! Cluster seams
//!
//! Every interaction with the API server goes through one of these traits so
//! that the controller logic can be exercised against mocks:
//!
//! - [`ResourceClient`] - CRUD for one custom-resource kind in one namespace
//! - [`ClientFactory`] - builds a [`ResourceClient`] per kind (used by discovery)
//! - [`PodClient`] - list, exec into, and delete workload pods

mod pods;

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::crd::{naive_plural, FaultResource};
use crate::{Error, Result, CHAOS_GROUP, CHAOS_VERSION};

pub use pods::{instance_from_pod, KubePodClient, PodClient};
#[cfg(test)]
pub use pods::MockPodClient;

/// Merge-patch body that clears every finalizer on an object
pub fn finalizer_strip_patch() -> Value {
    serde_json::json!({ "metadata": { "finalizers": null } })
}

/// What a delete request found
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The API server accepted the deletion request
    Requested,
    /// The object did not exist
    AlreadyAbsent,
}

impl DeleteOutcome {
    /// Turn [`DeleteOutcome::AlreadyAbsent`] into a [`Error::NotFound`] for
    /// callers that require the object to have existed.
    pub fn require_present(self, kind: &str, name: &str) -> Result<()> {
        match self {
            Self::Requested => Ok(()),
            Self::AlreadyAbsent => Err(Error::not_found(kind, name)),
        }
    }
}

/// Coordinates of a custom-resource collection, resolved once per client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceTarget {
    /// API group (e.g. "chaos-mesh.org")
    pub group: String,
    /// API version (e.g. "v1alpha1")
    pub version: String,
    /// Resource kind (e.g. "PodChaos")
    pub kind: String,
    /// Plural resource name derived from the kind
    pub plural: String,
    /// Namespace all operations are scoped to
    pub namespace: String,
}

impl ResourceTarget {
    /// Target a Chaos Mesh kind in `namespace`
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::with_api(kind, CHAOS_GROUP, CHAOS_VERSION, namespace)
    }

    /// Target any custom-resource kind
    pub fn with_api(
        kind: impl Into<String>,
        group: impl Into<String>,
        version: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        let kind = kind.into();
        Self {
            plural: naive_plural(&kind),
            kind,
            group: group.into(),
            version: version.into(),
            namespace: namespace.into(),
        }
    }

    /// Full API version string (`group/version`)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// kube-rs resource descriptor for dynamic API access
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: self.plural.clone(),
        }
    }
}

/// CRUD for one custom-resource kind in one namespace.
///
/// `NotFound` from `get` and `delete` is an expected outcome and is always
/// reported distinctly from other failures.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Kind this client operates on
    fn kind(&self) -> String;

    /// Create the object described by `manifest`.
    ///
    /// Fails with [`Error::AlreadyExists`] when the name is taken and
    /// [`Error::Invalid`] when the API server rejects the spec.
    async fn create(&self, manifest: &Value) -> Result<FaultResource>;

    /// Fetch an object; [`Error::NotFound`] if absent
    async fn get(&self, name: &str) -> Result<FaultResource>;

    /// All objects of this kind in the namespace.
    ///
    /// An uninstalled CRD yields an empty list, not an error.
    async fn list(&self) -> Result<Vec<FaultResource>>;

    /// JSON-merge-patch an object
    async fn patch(&self, name: &str, body: &Value) -> Result<FaultResource>;

    /// Request deletion without waiting for the object to disappear
    async fn delete(&self, name: &str) -> Result<DeleteOutcome>;
}

/// Builds resource clients for arbitrary kinds
#[cfg_attr(test, automock)]
pub trait ClientFactory: Send + Sync {
    /// Client for `kind` (as named in manifests) scoped to `namespace`
    fn resource_client(&self, kind: &str, namespace: &str) -> Arc<dyn ResourceClient>;
}

/// Strip every finalizer from `name` so the API server can purge it
pub async fn remove_finalizers(client: &dyn ResourceClient, name: &str) -> Result<FaultResource> {
    let patched = client.patch(name, &finalizer_strip_patch()).await?;
    info!(kind = %client.kind(), name, "removed finalizers");
    Ok(patched)
}

/// Delete every object the client lists, returning how many deletions were
/// requested. Objects that vanish in between are skipped.
pub async fn delete_all(client: &dyn ResourceClient) -> Result<usize> {
    let mut requested = 0;
    for resource in client.list().await? {
        if client.delete(resource.name()).await? == DeleteOutcome::Requested {
            requested += 1;
        }
    }
    Ok(requested)
}

// =============================================================================
// Real Implementation
// =============================================================================

/// [`ResourceClient`] backed by the Kubernetes dynamic API
pub struct KubeResourceClient {
    api: Api<DynamicObject>,
    target: ResourceTarget,
}

impl KubeResourceClient {
    /// Create a client for `target`
    pub fn new(client: Client, target: ResourceTarget) -> Self {
        let api = Api::namespaced_with(client, &target.namespace, &target.api_resource());
        Self { api, target }
    }

    /// Coordinates this client operates on
    pub fn target(&self) -> &ResourceTarget {
        &self.target
    }

    fn adopt(&self, obj: DynamicObject) -> FaultResource {
        let mut resource = FaultResource::from(obj);
        if resource.kind.is_empty() {
            resource.kind = self.target.kind.clone();
        }
        if resource.api_version.is_empty() {
            resource.api_version = self.target.api_version();
        }
        resource
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    fn kind(&self) -> String {
        self.target.kind.clone()
    }

    async fn create(&self, manifest: &Value) -> Result<FaultResource> {
        let mut obj: DynamicObject = serde_json::from_value(manifest.clone()).map_err(|e| {
            Error::serialization(format!("invalid {} manifest: {}", self.target.kind, e))
        })?;
        obj.metadata.namespace = Some(self.target.namespace.clone());
        let name = obj.metadata.name.clone().unwrap_or_default();

        let created = self
            .api
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| Error::from_api(&self.target.kind, &name, e))?;
        info!(kind = %self.target.kind, name = %name, namespace = %self.target.namespace, "created resource");
        Ok(self.adopt(created))
    }

    async fn get(&self, name: &str) -> Result<FaultResource> {
        let obj = self
            .api
            .get(name)
            .await
            .map_err(|e| Error::from_api(&self.target.kind, name, e))?;
        Ok(self.adopt(obj))
    }

    async fn list(&self) -> Result<Vec<FaultResource>> {
        match self.api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items.into_iter().map(|o| self.adopt(o)).collect()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(plural = %self.target.plural, "resource type not installed");
                Ok(Vec::new())
            }
            Err(e) => Err(Error::from_api(&self.target.kind, "", e)),
        }
    }

    async fn patch(&self, name: &str, body: &Value) -> Result<FaultResource> {
        let obj = self
            .api
            .patch(name, &PatchParams::default(), &Patch::Merge(body))
            .await
            .map_err(|e| Error::from_api(&self.target.kind, name, e))?;
        debug!(kind = %self.target.kind, name, "patched resource");
        Ok(self.adopt(obj))
    }

    async fn delete(&self, name: &str) -> Result<DeleteOutcome> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(kind = %self.target.kind, name, "deletion requested");
                Ok(DeleteOutcome::Requested)
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(kind = %self.target.kind, name, "already absent");
                Ok(DeleteOutcome::AlreadyAbsent)
            }
            Err(e) => {
                warn!(kind = %self.target.kind, name, error = %e, "delete failed");
                Err(Error::from_api(&self.target.kind, name, e))
            }
        }
    }
}

/// [`ClientFactory`] handing out [`KubeResourceClient`]s
#[derive(Clone)]
pub struct KubeClientFactory {
    client: Client,
    group: String,
    version: String,
}

impl KubeClientFactory {
    /// Factory for Chaos Mesh kinds
    pub fn new(client: Client) -> Self {
        Self::with_api(client, CHAOS_GROUP, CHAOS_VERSION)
    }

    /// Factory for kinds in another API group/version
    pub fn with_api(client: Client, group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            client,
            group: group.into(),
            version: version.into(),
        }
    }
}

impl ClientFactory for KubeClientFactory {
    fn resource_client(&self, kind: &str, namespace: &str) -> Arc<dyn ResourceClient> {
        let target = ResourceTarget::with_api(kind, &self.group, &self.version, namespace);
        Arc::new(KubeResourceClient::new(self.client.clone(), target))
    }
}
