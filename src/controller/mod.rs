//! Fault resource lifecycle control
//!
//! - [`preflight`] - verify a fault selector matches live pods before creating it
//! - [`force_delete`] - drive a resource to absence, stripping stuck finalizers

pub mod force_delete;
pub mod preflight;

pub use force_delete::{DeletionState, ForceDeleteOutcome, ForceDeleter};
pub use preflight::{require_targets, verify_matches, TargetMatch};
