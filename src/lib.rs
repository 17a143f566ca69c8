//! chaosctl - lifecycle controller for Chaos Mesh fault resources
//!
//! Applies a fault resource against a verified set of workload instances,
//! guarantees the resource is removed afterwards (stripping finalizers when
//! deletion stalls), and repairs residual I/O-fault mounts left behind in
//! target pods.
//!
//! # Modules
//!
//! - [`crd`] - Fault kind table, selectors, and the typed view of fault specs
//! - [`client`] - Cluster seams: custom-resource CRUD and pod operations
//! - [`controller`] - Preflight target matching and the force-delete state machine
//! - [`remediation`] - Residual `__chaosfs__` mount cleanup and pod restarts
//! - [`discovery`] - Release-scoped discovery and bulk cleanup
//! - [`experiment`] - End-to-end apply / wait / teardown pipeline
//! - [`template`] - Manifest rewriting helpers (release labels, durations, schedules)
//! - [`retry`] - Fixed-interval polling policy shared by every wait loop
//! - [`config`] - Settings with environment overrides
//! - [`kube_utils`] - Client construction and manifest loading
//! - [`format`] - Table rendering for the CLI
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod discovery;
pub mod error;
pub mod experiment;
pub mod format;
pub mod kube_utils;
pub mod remediation;
pub mod retry;
pub mod template;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// API group of every Chaos Mesh resource
pub const CHAOS_GROUP: &str = "chaos-mesh.org";

/// API version of every Chaos Mesh resource
pub const CHAOS_VERSION: &str = "v1alpha1";

/// Namespace where fault resources are created by default
pub const DEFAULT_CHAOS_NAMESPACE: &str = "chaos-testing";

/// Label key carrying the Helm release name on workload pods
pub const RELEASE_LABEL_KEY: &str = "release";

/// Standard instance label key (set by operators instead of `release`)
pub const INSTANCE_LABEL_KEY: &str = "app.kubernetes.io/instance";

/// Standard component label key used by operator-managed workloads
pub const COMPONENT_LABEL_KEY: &str = "app.kubernetes.io/component";

/// Label keys that identify which release a selector targets
pub const RELEASE_LABEL_KEYS: [&str; 2] = [RELEASE_LABEL_KEY, INSTANCE_LABEL_KEY];
