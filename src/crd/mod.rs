//! Chaos Mesh resource model
//!
//! - [`kinds`] - The fixed table of fault kinds this controller understands
//! - [`selector`] - Pod selectors and instance matching
//! - [`resource`] - Fault resources and the typed view of their specs

mod kinds;
mod resource;
mod selector;

pub use kinds::{lookup_kind, naive_plural, ChaosKind, CHAOS_KINDS, SCHEDULE_KIND, WORKFLOW_KIND};
pub use resource::{extract_selector, FaultResource, FaultSpec, WorkflowStep};
pub use selector::{Selector, WorkloadInstance};
