//! Force deletion of fault resources
//!
//! Some fault kinds (IOChaos, NetworkChaos) can stay Terminating forever when
//! the Chaos Mesh controller fails to release its `chaos-mesh/records`
//! finalizer. The state machine below deletes the resource, watches it, and
//! strips finalizers as soon as it is observed terminating with finalizers
//! left:
//!
//! ```text
//! Present -> (delete requested) -> StuckWithFinalizers -> (strip) -> Absent
//!                               \-> PendingRemoval -----------------/
//! ```
//!
//! A strip is followed by a re-read in the same poll, so a purge triggered by
//! the patch is seen even when the patch lands in the final check.
//!
//! Timeouts are reported as [`ForceDeleteOutcome::TimedOut`] rather than an
//! error so bulk callers can continue past one stuck resource.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::client::{remove_finalizers, DeleteOutcome, ResourceClient};
use crate::crd::FaultResource;
use crate::retry::{PollPolicy, Probe, DEFAULT_POLL_INTERVAL};

/// Observed deletion state of a resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionState {
    /// No deletion requested yet
    Present,
    /// Deletion requested and finalizers still hold the object
    StuckWithFinalizers,
    /// Deletion requested, no finalizers left; purge pending
    PendingRemoval,
    /// The API server no longer has the object
    Absent,
}

impl DeletionState {
    /// Classify a fetched resource
    pub fn observe(resource: &FaultResource) -> Self {
        match (resource.is_terminating(), resource.finalizers().is_empty()) {
            (false, _) => Self::Present,
            (true, true) => Self::PendingRemoval,
            (true, false) => Self::StuckWithFinalizers,
        }
    }
}

/// How a force deletion ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForceDeleteOutcome {
    /// The resource never existed (or was gone before we looked)
    AlreadyAbsent,
    /// The resource was present and is now confirmed absent
    Removed {
        /// Number of finalizer-strip patches that were issued
        finalizers_stripped: u32,
    },
    /// The resource was still present after the timeout and a final check
    TimedOut,
}

impl ForceDeleteOutcome {
    /// The resource is confirmed absent
    pub fn is_absent(&self) -> bool {
        !matches!(self, Self::TimedOut)
    }
}

/// Drives resources of one kind to absence
#[derive(Clone)]
pub struct ForceDeleter {
    client: Arc<dyn ResourceClient>,
    interval: Duration,
}

impl ForceDeleter {
    /// Create a deleter polling at the default interval
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self {
            client,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the poll interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Delete `name` and wait until it is gone, stripping finalizers if the
    /// resource is stuck Terminating.
    ///
    /// Never fails: API errors other than NotFound are logged and retried on
    /// the next poll.
    #[instrument(skip(self), fields(kind = %self.client.kind()))]
    pub async fn force_delete(&self, name: &str, timeout: Duration) -> ForceDeleteOutcome {
        let client = self.client.as_ref();

        let initial = match client.delete(name).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(name, error = %e, "initial delete failed, will retry while polling");
                None
            }
        };

        let stripped = AtomicU32::new(0);
        let policy = PollPolicy::new(self.interval, timeout);

        let absent = policy
            .poll("force_delete", || {
                let stripped = &stripped;
                async move {
                    let resource = match client.get(name).await {
                        Ok(resource) => resource,
                        Err(e) if e.is_not_found() => return Probe::Ready(()),
                        Err(e) => {
                            warn!(name, error = %e, "error checking resource status");
                            return Probe::Pending;
                        }
                    };

                    match DeletionState::observe(&resource) {
                        DeletionState::StuckWithFinalizers => {
                            warn!(
                                name,
                                finalizers = ?resource.finalizers(),
                                "stuck in Terminating, removing finalizers"
                            );
                            match remove_finalizers(client, name).await {
                                Ok(_) => {
                                    stripped.fetch_add(1, Ordering::SeqCst);
                                    match client.get(name).await {
                                        Err(e) if e.is_not_found() => return Probe::Ready(()),
                                        Err(e) => warn!(name, error = %e, "error re-checking resource"),
                                        Ok(_) => debug!(name, "finalizers cleared, purge pending"),
                                    }
                                }
                                Err(e) if e.is_not_found() => return Probe::Ready(()),
                                Err(e) => warn!(name, error = %e, "failed to remove finalizers"),
                            }
                        }
                        DeletionState::Present => {
                            debug!(name, "no deletion timestamp yet, re-requesting delete");
                            if let Err(e) = client.delete(name).await {
                                warn!(name, error = %e, "delete failed");
                            }
                        }
                        state => debug!(name, ?state, "waiting for removal"),
                    }
                    Probe::Pending
                }
            })
            .await;

        let finalizers_stripped = stripped.load(Ordering::SeqCst);
        match absent {
            Some(()) if initial == Some(DeleteOutcome::AlreadyAbsent) && finalizers_stripped == 0 => {
                debug!(name, "already absent");
                ForceDeleteOutcome::AlreadyAbsent
            }
            Some(()) => {
                info!(name, finalizers_stripped, "successfully deleted");
                ForceDeleteOutcome::Removed {
                    finalizers_stripped,
                }
            }
            None => {
                error!(name, timeout_secs = timeout.as_secs(), "failed to delete within timeout");
                ForceDeleteOutcome::TimedOut
            }
        }
    }
}
