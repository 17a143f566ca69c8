//! Residual I/O-fault mount remediation
//!
//! IOChaos injects a FUSE proxy directory (`__chaosfs__<name>__`) next to the
//! configured volume path. Teardown normally removes it, but while the proxy
//! mount is still attached the directory cannot be deleted and the workload
//! keeps running on top of it. Remediation is two-phase: try an in-place
//! `rm -rf` first, then restart only the pods where removal provably failed.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::client::{DeleteOutcome, PodClient};
use crate::Error;

/// Prefix of the proxy directory left by an I/O fault
pub const RESIDUAL_PREFIX: &str = "__chaosfs__";

const BUSY_MARKERS: [&str; 2] = ["device or resource busy", "cannot remove"];

/// Per-instance state of the residual proxy directory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResidualState {
    /// No proxy directory present
    Clean,
    /// Proxy directory present and deletable
    Removable,
    /// Proxy directory present and held by a live mount
    Stuck,
}

impl ResidualState {
    /// Classify the output of the existence check
    pub fn from_check_output(output: &str) -> Self {
        if output.contains(RESIDUAL_PREFIX) {
            Self::Removable
        } else {
            Self::Clean
        }
    }

    /// Classify the output of the removal command
    pub fn from_removal_output(output: &str) -> Self {
        let lower = output.to_lowercase();
        if BUSY_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::Stuck
        } else {
            Self::Clean
        }
    }
}

/// Itemized result of a remediation pass
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RemediationReport {
    /// Instances with no residual directory left
    pub cleaned: Vec<String>,
    /// Instances whose proxy mount is still attached
    pub needing_restart: Vec<String>,
    /// Instances that could not be inspected or cleaned
    pub failed: Vec<String>,
    /// Instances deleted so their controller recreates them
    pub restarted: Vec<String>,
}

impl RemediationReport {
    /// Number of instances cleaned in place
    pub fn cleaned_count(&self) -> usize {
        self.cleaned.len()
    }

    /// Every stuck instance was restarted and nothing failed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.needing_restart.iter().all(|n| self.restarted.contains(n))
    }
}

/// Directory holding the proxy directories for `volume_path`
pub fn residual_parent(volume_path: &str) -> String {
    let trimmed = volume_path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}

fn check_command(parent: &str) -> Vec<String> {
    shell(format!(
        "ls -d {parent}/{RESIDUAL_PREFIX}* 2>/dev/null || echo \"none\""
    ))
}

fn remove_command(parent: &str) -> Vec<String> {
    shell(format!("rm -rf {parent}/{RESIDUAL_PREFIX}* 2>&1"))
}

fn shell(script: String) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script]
}

enum Cleanup {
    Cleaned,
    NeedsRestart,
    Failed,
}

/// Cleans residual proxy mounts inside workload pods
#[derive(Clone)]
pub struct ResidualMountRemediator {
    pods: Arc<dyn PodClient>,
}

impl ResidualMountRemediator {
    /// Create a remediator using the given pod client
    pub fn new(pods: Arc<dyn PodClient>) -> Self {
        Self { pods }
    }

    /// Try to remove the residual proxy directory from every named pod.
    ///
    /// Pods are processed concurrently. A pod that no longer exists counts
    /// as clean. Restarts are never issued here; see [`Self::remediate`].
    #[instrument(skip(self, names), fields(count = names.len()))]
    pub async fn cleanup_residual(
        &self,
        names: &[String],
        namespace: &str,
        volume_path: &str,
    ) -> RemediationReport {
        let mut report = RemediationReport::default();
        if names.is_empty() || volume_path.is_empty() {
            return report;
        }

        let parent = residual_parent(volume_path);
        info!(namespace, parent = %parent, "checking pods for residual proxy mounts");

        let results: Vec<(String, Cleanup)> = stream::iter(names.iter().cloned())
            .map(|name| {
                let parent = parent.as_str();
                async move {
                    let outcome = self.cleanup_one(&name, namespace, parent).await;
                    (name, outcome)
                }
            })
            .buffered(names.len())
            .collect()
            .await;

        for (name, outcome) in results {
            match outcome {
                Cleanup::Cleaned => report.cleaned.push(name),
                Cleanup::NeedsRestart => report.needing_restart.push(name),
                Cleanup::Failed => report.failed.push(name),
            }
        }

        info!(
            cleaned = report.cleaned.len(),
            needing_restart = report.needing_restart.len(),
            failed = report.failed.len(),
            "residual cleanup finished"
        );
        report
    }

    async fn cleanup_one(&self, name: &str, namespace: &str, parent: &str) -> Cleanup {
        let state = match self.pods.exec(namespace, name, check_command(parent)).await {
            Ok(output) => ResidualState::from_check_output(&output),
            Err(e) if e.is_not_found() => ResidualState::Clean,
            Err(e) => {
                warn!(pod = name, error = %e, "failed to check residual mount");
                return Cleanup::Failed;
            }
        };
        if state == ResidualState::Clean {
            return Cleanup::Cleaned;
        }

        let output = match self.pods.exec(namespace, name, remove_command(parent)).await {
            Ok(output) => output,
            Err(e) if e.is_not_found() => return Cleanup::Cleaned,
            Err(e) => {
                warn!(pod = name, error = %e, "failed to remove residual mount");
                return Cleanup::Failed;
            }
        };

        match ResidualState::from_removal_output(&output) {
            ResidualState::Stuck => {
                warn!(pod = name, output = %output.trim(), "proxy mount busy, pod needs restart");
                Cleanup::NeedsRestart
            }
            _ => {
                info!(pod = name, "residual proxy directory removed");
                Cleanup::Cleaned
            }
        }
    }

    /// Delete each pod so its owning controller recreates it.
    ///
    /// Returns the pods handled; an already-absent pod counts as handled.
    pub async fn restart_instances(&self, names: &[String], namespace: &str) -> Vec<String> {
        let results: Vec<(String, Result<DeleteOutcome, Error>)> =
            stream::iter(names.iter().cloned())
                .map(|name| async move {
                    let result = self.pods.delete(namespace, &name).await;
                    (name, result)
                })
                .buffered(names.len().max(1))
                .collect()
                .await;

        let mut restarted = Vec::with_capacity(results.len());
        for (name, result) in results {
            match result {
                Ok(DeleteOutcome::Requested) => {
                    info!(pod = %name, namespace, "restarted pod");
                    restarted.push(name);
                }
                Ok(DeleteOutcome::AlreadyAbsent) => restarted.push(name),
                Err(e) => error!(pod = %name, namespace, error = %e, "failed to restart pod"),
            }
        }
        restarted
    }

    /// Clean residual mounts, then restart the pods where that failed.
    pub async fn remediate(
        &self,
        names: &[String],
        namespace: &str,
        volume_path: &str,
    ) -> RemediationReport {
        let mut report = self.cleanup_residual(names, namespace, volume_path).await;
        if !report.needing_restart.is_empty() {
            report.restarted = self
                .restart_instances(&report.needing_restart, namespace)
                .await;
        }
        report
    }
}
