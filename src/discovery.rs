//! Release-scoped discovery and bulk cleanup
//!
//! Walks every kind in [`CHAOS_KINDS`], lists its objects and keeps the ones
//! whose selector targets a given release through `release` or
//! `app.kubernetes.io/instance`. Bulk deletion runs one deletion per matched
//! resource concurrently and reports per-resource outcomes instead of
//! aborting on the first failure.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::client::{ClientFactory, DeleteOutcome};
use crate::controller::ForceDeleter;
use crate::crd::{FaultResource, Selector, CHAOS_KINDS};
use crate::retry::DEFAULT_POLL_INTERVAL;
use crate::Result;

/// Maximum deletions in flight during bulk cleanup
const MAX_CONCURRENT_DELETES: usize = 8;

/// Summary of one discovered fault resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// Resource kind
    pub kind: String,
    /// Plural used in API paths
    pub plural: String,
    /// Object name
    pub name: String,
    /// Object namespace
    pub namespace: String,
    /// Creation timestamp, if the API server reported one
    pub created_at: Option<DateTime<Utc>>,
    /// Release labels that caused the match (`key=value`); empty for
    /// unscoped listings
    pub matched_labels: Vec<String>,
    /// Label selectors of the step that caused the match; the first
    /// targeted step for unscoped listings
    pub label_selectors: BTreeMap<String, String>,
    /// Namespaces the selector targets
    pub target_namespaces: Vec<String>,
}

impl ResourceInfo {
    fn from_resource(
        resource: &FaultResource,
        plural: &str,
        namespace: &str,
        selector: Selector,
        matched_labels: Vec<String>,
    ) -> Self {
        Self {
            kind: resource.kind.clone(),
            plural: plural.to_string(),
            name: resource.name().to_string(),
            namespace: resource.namespace().unwrap_or(namespace).to_string(),
            created_at: resource.created_at(),
            matched_labels,
            label_selectors: selector.label_selectors,
            target_namespaces: selector.namespaces,
        }
    }
}

/// How bulk deletion removes each resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteMode {
    /// Request deletion and return
    Plain,
    /// Drive each resource to absence, stripping finalizers if needed
    Force {
        /// Per-resource budget
        timeout: Duration,
    },
}

/// Outcome of a bulk deletion
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BulkDeleteReport {
    /// Resources a deletion was attempted for
    pub attempted: usize,
    /// `kind/name` of every resource deleted (or already absent)
    pub succeeded: Vec<String>,
    /// `kind/name` of every resource that could not be deleted
    pub failed: Vec<String>,
}

impl BulkDeleteReport {
    /// Number of successful deletions
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }
}

/// Finds fault resources across every known kind
#[derive(Clone)]
pub struct ReleaseScanner {
    factory: Arc<dyn ClientFactory>,
    poll_interval: Duration,
}

impl ReleaseScanner {
    /// Create a scanner using `factory` for per-kind clients
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Poll interval used by force deletion
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Every fault resource in `namespace`, in kind-table order
    #[instrument(skip(self))]
    pub async fn list_all(&self, namespace: &str) -> Result<Vec<ResourceInfo>> {
        self.scan(namespace, |resource| Some((resource.selector(), Vec::new())))
            .await
    }

    /// Fault resources in `namespace` whose selector targets `release`.
    ///
    /// Every step of a Workflow is tested; one matching step is enough, and
    /// the first matching step provides the reported selector.
    #[instrument(skip(self))]
    pub async fn find_for_release(
        &self,
        namespace: &str,
        release: &str,
    ) -> Result<Vec<ResourceInfo>> {
        let found = self
            .scan(namespace, |resource| {
                let mut matched: Vec<String> = Vec::new();
                let mut matching_step: Option<Selector> = None;
                for selector in resource.fault_spec().selectors() {
                    let labels = selector.release_labels(release);
                    if labels.is_empty() {
                        continue;
                    }
                    for label in labels {
                        if !matched.contains(&label) {
                            matched.push(label);
                        }
                    }
                    matching_step.get_or_insert(selector);
                }
                matching_step.map(|selector| (selector, matched))
            })
            .await?;
        info!(namespace, release, count = found.len(), "release resources found");
        Ok(found)
    }

    async fn scan<F>(&self, namespace: &str, mut filter: F) -> Result<Vec<ResourceInfo>>
    where
        F: FnMut(&FaultResource) -> Option<(Selector, Vec<String>)>,
    {
        let mut found = Vec::new();
        for chaos_kind in CHAOS_KINDS {
            let client = self.factory.resource_client(chaos_kind.kind, namespace);
            let resources = client.list().await?;
            debug!(kind = chaos_kind.kind, count = resources.len(), "listed");

            for resource in resources {
                let Some((selector, matched)) = filter(&resource) else {
                    continue;
                };
                found.push(ResourceInfo::from_resource(
                    &resource,
                    chaos_kind.plural,
                    namespace,
                    selector,
                    matched,
                ));
            }
        }
        Ok(found)
    }

    /// Delete every listed resource, concurrently.
    ///
    /// A resource that is already gone counts as deleted. Failures are
    /// collected per resource and never stop the remaining deletions.
    pub async fn delete_all(&self, resources: &[ResourceInfo], mode: DeleteMode) -> BulkDeleteReport {
        let outcomes: Vec<(String, bool)> = stream::iter(resources)
            .map(|info| async move {
                let id = format!("{}/{}", info.kind, info.name);
                let ok = self.delete_one(info, mode).await;
                (id, ok)
            })
            .buffer_unordered(MAX_CONCURRENT_DELETES)
            .collect()
            .await;

        let mut report = BulkDeleteReport {
            attempted: resources.len(),
            ..Default::default()
        };
        for (id, ok) in outcomes {
            if ok {
                report.succeeded.push(id);
            } else {
                report.failed.push(id);
            }
        }
        report.succeeded.sort();
        report.failed.sort();
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "bulk delete finished"
        );
        report
    }

    async fn delete_one(&self, info: &ResourceInfo, mode: DeleteMode) -> bool {
        let client = self.factory.resource_client(&info.kind, &info.namespace);
        match mode {
            DeleteMode::Plain => match client.delete(&info.name).await {
                Ok(DeleteOutcome::Requested) | Ok(DeleteOutcome::AlreadyAbsent) => true,
                Err(e) => {
                    warn!(kind = %info.kind, name = %info.name, error = %e, "failed to delete");
                    false
                }
            },
            DeleteMode::Force { timeout } => ForceDeleter::new(client)
                .with_interval(self.poll_interval)
                .force_delete(&info.name, timeout)
                .await
                .is_absent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockClientFactory, MockResourceClient, ResourceClient};
    use crate::Error;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn resource(kind: &str, name: &str, spec: Value) -> FaultResource {
        FaultResource::from_manifest(&json!({
            "apiVersion": "chaos-mesh.org/v1alpha1",
            "kind": kind,
            "metadata": {"name": name, "namespace": "chaos-testing",
                         "creationTimestamp": "2026-01-01T00:00:00Z"},
            "spec": spec,
        }))
        .unwrap()
    }

    fn listing_client(kind: &str, items: Vec<FaultResource>) -> Arc<dyn ResourceClient> {
        let mut mock = MockResourceClient::new();
        let k = kind.to_string();
        mock.expect_kind().returning(move || k.clone());
        mock.expect_list().returning(move || Ok(items.clone()));
        Arc::new(mock)
    }

    /// Factory serving `clients` by kind and empty listings for the rest
    fn factory(mut clients: HashMap<String, Arc<dyn ResourceClient>>) -> Arc<dyn ClientFactory> {
        for kind in CHAOS_KINDS {
            clients
                .entry(kind.kind.to_string())
                .or_insert_with(|| listing_client(kind.kind, Vec::new()));
        }
        let mut factory = MockClientFactory::new();
        factory.expect_resource_client().returning(move |kind, ns| {
            assert_eq!(ns, "chaos-testing");
            clients[kind].clone()
        });
        Arc::new(factory)
    }

    fn five_kind_cluster() -> Arc<dyn ClientFactory> {
        let mut clients = HashMap::new();
        clients.insert(
            "PodChaos".to_string(),
            listing_client(
                "PodChaos",
                vec![
                    resource("PodChaos", "kill-prod", json!({"selector": {"labelSelectors": {"release": "prod"}}})),
                    resource("PodChaos", "kill-dev", json!({"selector": {"labelSelectors": {"release": "dev"}}})),
                ],
            ),
        );
        clients.insert(
            "NetworkChaos".to_string(),
            listing_client(
                "NetworkChaos",
                vec![resource(
                    "NetworkChaos",
                    "partition",
                    json!({"selector": {"labelSelectors": {"app.kubernetes.io/instance": "prod", "app": "db"}}}),
                )],
            ),
        );
        clients.insert(
            "IOChaos".to_string(),
            listing_client(
                "IOChaos",
                vec![resource("IOChaos", "io-unscoped", json!({"selector": {"labelSelectors": {"app": "db"}}}))],
            ),
        );
        clients.insert(
            "Schedule".to_string(),
            listing_client(
                "Schedule",
                vec![resource(
                    "Schedule",
                    "nightly",
                    json!({"type": "StressChaos", "stressChaos": {"selector": {"labelSelectors": {"release": "prod"}}}}),
                )],
            ),
        );
        clients.insert(
            "Workflow".to_string(),
            listing_client(
                "Workflow",
                vec![resource(
                    "Workflow",
                    "multi",
                    json!({"templates": [
                        {"name": "a", "podChaos": {"selector": {"labelSelectors": {"release": "dev"}}}},
                        {"name": "b", "networkChaos": {"selector": {"labelSelectors": {"release": "prod"}}}}
                    ]}),
                )],
            ),
        );
        factory(clients)
    }

    /// Story: discovery over five kinds returns only resources targeting the
    /// queried release, each with the label that matched
    #[tokio::test]
    async fn story_find_for_release_across_kinds() {
        let scanner = ReleaseScanner::new(five_kind_cluster());
        let found = scanner.find_for_release("chaos-testing", "prod").await.unwrap();

        let summary: Vec<(&str, &str, Vec<String>)> = found
            .iter()
            .map(|r| (r.kind.as_str(), r.name.as_str(), r.matched_labels.clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("PodChaos", "kill-prod", vec!["release=prod".to_string()]),
                ("NetworkChaos", "partition", vec!["app.kubernetes.io/instance=prod".to_string()]),
                ("Schedule", "nightly", vec!["release=prod".to_string()]),
                ("Workflow", "multi", vec!["release=prod".to_string()]),
            ]
        );
        assert_eq!(found[0].plural, "podchaos");
        assert!(found[0].created_at.is_some());
    }

    /// Story: a workflow matched through its second step reports that step's
    /// selector, not the first step's
    #[tokio::test]
    async fn story_workflow_reports_selector_of_matching_step() {
        let scanner = ReleaseScanner::new(five_kind_cluster());

        let prod = scanner.find_for_release("chaos-testing", "prod").await.unwrap();
        let multi = prod.iter().find(|r| r.name == "multi").unwrap();
        assert_eq!(
            multi.label_selectors,
            BTreeMap::from([("release".to_string(), "prod".to_string())])
        );

        let dev = scanner.find_for_release("chaos-testing", "dev").await.unwrap();
        let multi = dev.iter().find(|r| r.name == "multi").unwrap();
        assert_eq!(
            multi.label_selectors,
            BTreeMap::from([("release".to_string(), "dev".to_string())])
        );
    }

    #[tokio::test]
    async fn test_list_all_returns_everything() {
        let scanner = ReleaseScanner::new(five_kind_cluster());
        let all = scanner.list_all("chaos-testing").await.unwrap();

        assert_eq!(all.len(), 6);
        assert!(all.iter().all(|r| r.matched_labels.is_empty()));
    }

    #[tokio::test]
    async fn test_list_error_propagates() {
        let mut failing = MockResourceClient::new();
        failing
            .expect_list()
            .returning(|| Err(Error::validation("forbidden")));
        let mut clients: HashMap<String, Arc<dyn ResourceClient>> = HashMap::new();
        clients.insert("PodChaos".to_string(), Arc::new(failing));

        let scanner = ReleaseScanner::new(factory(clients));
        assert!(scanner.list_all("chaos-testing").await.is_err());
    }

    fn info(kind: &str, name: &str) -> ResourceInfo {
        ResourceInfo {
            kind: kind.to_string(),
            plural: kind.to_lowercase(),
            name: name.to_string(),
            namespace: "chaos-testing".to_string(),
            created_at: None,
            matched_labels: vec!["release=prod".to_string()],
            label_selectors: BTreeMap::new(),
            target_namespaces: Vec::new(),
        }
    }

    /// Story: plain bulk delete counts already-absent resources as deleted
    /// and keeps going past a failure
    #[tokio::test]
    async fn story_plain_bulk_delete_reports_each_resource() {
        let mut pod = MockResourceClient::new();
        pod.expect_delete().returning(|name| match name {
            "a" => Ok(DeleteOutcome::Requested),
            "b" => Ok(DeleteOutcome::AlreadyAbsent),
            _ => Err(Error::validation("forbidden")),
        });
        let mut clients: HashMap<String, Arc<dyn ResourceClient>> = HashMap::new();
        clients.insert("PodChaos".to_string(), Arc::new(pod));

        let scanner = ReleaseScanner::new(factory(clients));
        let targets = vec![info("PodChaos", "a"), info("PodChaos", "b"), info("PodChaos", "c")];
        let report = scanner.delete_all(&targets, DeleteMode::Plain).await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, vec!["PodChaos/a", "PodChaos/b"]);
        assert_eq!(report.failed, vec!["PodChaos/c"]);
        assert_eq!(report.success_count(), 2);
    }

    /// Story: force mode waits for absence through the force-delete path
    #[tokio::test(start_paused = true)]
    async fn story_force_bulk_delete_waits_for_absence() {
        let mut io = MockResourceClient::new();
        io.expect_kind().returning(|| "IOChaos".to_string());
        io.expect_delete().returning(|_| Ok(DeleteOutcome::Requested));
        io.expect_get()
            .returning(|name| Err(Error::not_found("IOChaos", name)));
        let mut clients: HashMap<String, Arc<dyn ResourceClient>> = HashMap::new();
        clients.insert("IOChaos".to_string(), Arc::new(io));

        let scanner = ReleaseScanner::new(factory(clients));
        let report = scanner
            .delete_all(
                &[info("IOChaos", "io-delay")],
                DeleteMode::Force {
                    timeout: Duration::from_secs(30),
                },
            )
            .await;

        assert_eq!(report.succeeded, vec!["IOChaos/io-delay"]);
        assert!(report.failed.is_empty());
    }
}
