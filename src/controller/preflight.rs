//! Preflight target verification
//!
//! A fault whose selector matches nothing still "runs": the resource is
//! created, the timer elapses, and nothing was exercised. Every experiment
//! therefore resolves its selector against live pods before the resource is
//! created and aborts when nothing matches.

use serde_json::Value;
use tracing::{error, info, warn};

use crate::client::PodClient;
use crate::crd::{extract_selector, Selector};
use crate::{Error, Result};

/// Outcome of resolving a selector against live pods
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetMatch {
    /// Selector that was resolved
    pub selector: Selector,
    /// Names of the matching pods
    pub instances: Vec<String>,
}

impl TargetMatch {
    /// At least one live pod matched
    pub fn matched(&self) -> bool {
        !self.instances.is_empty()
    }
}

/// Resolve the manifest's selector into the pods it targets in `namespace`.
///
/// An empty selector is never treated as "match everything": it returns no
/// instances without querying the cluster.
pub async fn verify_matches(
    pods: &dyn PodClient,
    manifest: &Value,
    namespace: &str,
) -> Result<TargetMatch> {
    let selector = extract_selector(manifest);
    if selector.is_empty() {
        warn!(namespace, "no label selectors found in fault spec");
        return Ok(TargetMatch {
            selector,
            instances: Vec::new(),
        });
    }

    let query = selector.label_query();
    info!(namespace, labels = %query, "verifying fault selector");

    let instances: Vec<String> = pods
        .list(namespace, &query)
        .await?
        .into_iter()
        .filter(|pod| selector.matches(pod, namespace))
        .map(|pod| pod.name)
        .collect();

    if instances.is_empty() {
        error!(namespace, labels = %query, "fault selector matches no pods");
    } else {
        info!(namespace, count = instances.len(), pods = ?instances, "fault selector matches pods");
    }

    Ok(TargetMatch {
        selector,
        instances,
    })
}

/// Like [`verify_matches`] but fails with [`Error::Preflight`] when nothing
/// matches. Returns the matched pod names.
pub async fn require_targets(
    pods: &dyn PodClient,
    manifest: &Value,
    namespace: &str,
) -> Result<Vec<String>> {
    let target = verify_matches(pods, manifest, namespace).await?;
    if !target.matched() {
        return Err(Error::Preflight {
            namespace: namespace.to_string(),
            selector: target.selector.label_query(),
        });
    }
    Ok(target.instances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockPodClient;
    use crate::crd::WorkloadInstance;
    use serde_json::json;

    fn pod(name: &str, namespace: &str) -> WorkloadInstance {
        WorkloadInstance {
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: [("app".to_string(), "x".to_string())].into(),
            ready: true,
        }
    }

    fn pod_kill(selector: serde_json::Value) -> serde_json::Value {
        json!({"kind": "PodChaos", "metadata": {"name": "kill"}, "spec": {"selector": selector}})
    }

    #[tokio::test]
    async fn test_matching_pods_are_returned() {
        let mut pods = MockPodClient::new();
        pods.expect_list().returning(|ns, query| {
            assert_eq!(ns, "milvus");
            assert_eq!(query, "app=x");
            Ok(vec![pod("proxy-0", "milvus"), pod("proxy-1", "milvus")])
        });

        let target = verify_matches(&pods, &pod_kill(json!({"labelSelectors": {"app": "x"}})), "milvus")
            .await
            .expect("verify should succeed");

        assert!(target.matched());
        assert_eq!(target.instances, vec!["proxy-0", "proxy-1"]);
    }

    #[tokio::test]
    async fn test_empty_selector_fails_closed_without_listing() {
        // No expectation on list: calling it would panic.
        let pods = MockPodClient::new();

        let target = verify_matches(&pods, &pod_kill(json!({"labelSelectors": {}})), "milvus")
            .await
            .expect("verify should succeed");

        assert!(!target.matched());
        assert!(target.instances.is_empty());
    }

    #[tokio::test]
    async fn test_no_live_pods_means_no_match() {
        let mut pods = MockPodClient::new();
        pods.expect_list().returning(|_, _| Ok(Vec::new()));

        let target = verify_matches(&pods, &pod_kill(json!({"labelSelectors": {"app": "x"}})), "milvus")
            .await
            .expect("verify should succeed");

        assert_eq!(target, TargetMatch {
            selector: Selector::with_labels([("app", "x")]),
            instances: Vec::new(),
        });
    }

    #[tokio::test]
    async fn test_selector_namespaces_exclude_queried_namespace() {
        let mut pods = MockPodClient::new();
        pods.expect_list()
            .returning(|_, _| Ok(vec![pod("proxy-0", "milvus")]));

        let manifest = pod_kill(json!({"labelSelectors": {"app": "x"}, "namespaces": ["other"]}));
        let target = verify_matches(&pods, &manifest, "milvus")
            .await
            .expect("verify should succeed");

        assert!(!target.matched());
    }

    #[tokio::test]
    async fn test_require_targets_aborts_on_no_match() {
        let mut pods = MockPodClient::new();
        pods.expect_list().returning(|_, _| Ok(Vec::new()));

        let err = require_targets(&pods, &pod_kill(json!({"labelSelectors": {"app": "x"}})), "milvus")
            .await
            .unwrap_err();

        match err {
            Error::Preflight { namespace, selector } => {
                assert_eq!(namespace, "milvus");
                assert_eq!(selector, "app=x");
            }
            other => panic!("expected Preflight, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_failures_surface() {
        let mut pods = MockPodClient::new();
        pods.expect_list()
            .returning(|_, _| Err(Error::validation("api unavailable")));

        let result = verify_matches(&pods, &pod_kill(json!({"labelSelectors": {"app": "x"}})), "milvus").await;
        assert!(result.is_err());
    }
}
