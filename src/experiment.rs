//! End-to-end fault experiment
//!
//! One experiment is a strictly sequential pipeline:
//!
//! 1. Preflight: resolve the selector against live pods, abort if none match
//! 2. Create the fault resource and confirm it is listed; if that fails the
//!    resource is force deleted before the error is returned
//! 3. Let the fault run for the experiment duration
//! 4. Force delete the resource (a timeout fails the experiment)
//! 5. For I/O faults with a volume path, clean residual proxy mounts and
//!    restart the pods where the mount is still attached
//! 6. Wait until the targeted pods are Running and ready again
//!
//! Remediation must observe the post-deletion state, so no step overlaps the
//! next.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::client::{ClientFactory, PodClient, ResourceClient};
use crate::config::ChaosSettings;
use crate::controller::{require_targets, ForceDeleter};
use crate::crd::{extract_selector, FaultResource, Selector, WorkloadInstance};
use crate::remediation::{RemediationReport, ResidualMountRemediator};
use crate::retry::{PollPolicy, Probe};
use crate::{Error, Result};

/// What happened during one experiment
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentRecord {
    /// Fault resource name
    pub name: String,
    /// Fault resource kind
    pub kind: String,
    /// Namespace the targeted pods live in
    pub target_namespace: String,
    /// Pods matched by the preflight check
    pub matched_instances: Vec<String>,
    /// When the fault resource was created
    pub create_time: DateTime<Utc>,
    /// When the fault resource was confirmed absent
    pub delete_time: DateTime<Utc>,
    /// When the targeted pods were ready again; `None` if they never were
    pub recovery_time: Option<DateTime<Utc>>,
    /// Residual mount remediation, for I/O faults with a volume path
    pub remediation: Option<RemediationReport>,
    /// Targeted pods recovered within the pod-ready timeout
    pub recovered: bool,
}

/// Runs fault experiments against one target namespace
pub struct Experiment {
    factory: Arc<dyn ClientFactory>,
    pods: Arc<dyn PodClient>,
    settings: ChaosSettings,
    target_namespace: String,
    duration: Duration,
}

impl Experiment {
    /// Create an experiment runner targeting pods in `target_namespace`
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        pods: Arc<dyn PodClient>,
        settings: ChaosSettings,
        target_namespace: impl Into<String>,
    ) -> Self {
        Self {
            factory,
            pods,
            settings,
            target_namespace: target_namespace.into(),
            duration: Duration::ZERO,
        }
    }

    /// How long the fault stays applied before teardown
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Run the full pipeline for `manifest`.
    ///
    /// Fails before anything is created when the selector matches no pod.
    /// Once the resource exists, every failure path tears it down first; pods
    /// that do not recover are reported in the record.
    #[instrument(skip(self, manifest), fields(target_namespace = %self.target_namespace))]
    pub async fn run(&self, manifest: &Value) -> Result<ExperimentRecord> {
        let resource = FaultResource::from_manifest(manifest)?;
        let name = resource.name().to_string();
        let kind = resource.kind.clone();
        if name.is_empty() || kind.is_empty() {
            return Err(Error::validation("manifest needs kind and metadata.name"));
        }

        let matched_instances =
            require_targets(self.pods.as_ref(), manifest, &self.target_namespace).await?;

        let client = self.factory.resource_client(&kind, &self.settings.namespace);
        client.create(manifest).await?;
        let create_time = Utc::now();
        info!(kind = %kind, name = %name, "fault injected");

        let timeout = self.settings.force_delete_timeout;
        let deleter = ForceDeleter::new(client.clone()).with_interval(self.settings.poll_interval);

        if let Err(e) = confirm_listed(client.as_ref(), &kind, &name).await {
            warn!(kind = %kind, name = %name, error = %e, "fault not confirmed, tearing down");
            let outcome = deleter.force_delete(&name, timeout).await;
            if !outcome.is_absent() {
                error!(kind = %kind, name = %name, "fault left behind after failed confirmation");
            }
            return Err(e);
        }

        info!(kind = %kind, name = %name, duration_secs = self.duration.as_secs(), "fault running");
        tokio::time::sleep(self.duration).await;

        let outcome = deleter.force_delete(&name, timeout).await;
        if !outcome.is_absent() {
            return Err(Error::DeleteTimedOut {
                kind,
                name,
                timeout,
            });
        }
        let delete_time = Utc::now();
        info!(kind = %kind, name = %name, "fault deleted");

        let selector = extract_selector(manifest);
        let remediation = match resource.io_volume_path() {
            Some(volume_path) => Some(self.remediate(&selector, volume_path).await?),
            None => None,
        };

        let policy = self.settings.poll_policy(self.settings.pod_ready_timeout);
        let recovered = wait_instances_ready(
            self.pods.as_ref(),
            &self.target_namespace,
            &selector,
            matched_instances.len(),
            &policy,
        )
        .await;
        let recovery_time = recovered.then(Utc::now);
        if recovered {
            info!(kind = %kind, name = %name, "targeted pods ready");
        } else {
            warn!(kind = %kind, name = %name, "targeted pods did not recover");
        }

        Ok(ExperimentRecord {
            name,
            kind,
            target_namespace: self.target_namespace.clone(),
            matched_instances,
            create_time,
            delete_time,
            recovery_time,
            remediation,
            recovered,
        })
    }

    async fn remediate(&self, selector: &Selector, volume_path: &str) -> Result<RemediationReport> {
        // Pods may have been recreated while the fault ran.
        let current: Vec<String> = self
            .pods
            .list(&self.target_namespace, &selector.label_query())
            .await?
            .into_iter()
            .filter(|pod| selector.matches(pod, &self.target_namespace))
            .map(|pod| pod.name)
            .collect();
        info!(pods = ?current, volume_path, "cleaning residual proxy mounts");

        let report = ResidualMountRemediator::new(self.pods.clone())
            .remediate(&current, &self.target_namespace, volume_path)
            .await;
        Ok(report)
    }
}

async fn confirm_listed(client: &dyn ResourceClient, kind: &str, name: &str) -> Result<()> {
    let listed = client.list().await?;
    if listed.iter().any(|r| r.name() == name) {
        Ok(())
    } else {
        Err(Error::not_found(kind, name))
    }
}

/// Wait until at least `expected` pods match `selector` and all of them are
/// ready. Listing errors are retried on the next poll.
pub async fn wait_instances_ready(
    pods: &dyn PodClient,
    namespace: &str,
    selector: &Selector,
    expected: usize,
    policy: &PollPolicy,
) -> bool {
    if selector.is_empty() {
        return true;
    }
    let query = selector.label_query();

    policy
        .poll("wait_instances_ready", || {
            let query = query.as_str();
            async move {
                let matching: Vec<WorkloadInstance> = match pods.list(namespace, query).await {
                    Ok(list) => list
                        .into_iter()
                        .filter(|pod| selector.matches(pod, namespace))
                        .collect(),
                    Err(e) => {
                        warn!(namespace, labels = query, error = %e, "failed to list pods");
                        return Probe::Pending;
                    }
                };
                let ready = matching.iter().filter(|p| p.ready).count();
                if matching.len() >= expected && ready == matching.len() {
                    Probe::Ready(())
                } else {
                    info!(namespace, ready, total = matching.len(), expected, "waiting for pods");
                    Probe::Pending
                }
            }
        })
        .await
        .is_some()
}
