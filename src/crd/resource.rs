//! Fault resources and their specs
//!
//! Fault specs come in three shapes. Most kinds carry the selector directly
//! at `spec.selector`; a Schedule embeds one fault under a type-specific key
//! (`spec.podChaos.selector`); a Workflow embeds faults inside its templates
//! (`spec.templates[i].networkChaos.selector`). [`FaultSpec`] turns those
//! shapes into a closed set of variants so callers never walk raw JSON.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::kinds::{lookup_kind, CHAOS_KINDS, SCHEDULE_KIND, WORKFLOW_KIND};
use super::selector::Selector;
use crate::Error;

/// A named, namespaced Chaos Mesh object of any kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultResource {
    /// Full API version (e.g. "chaos-mesh.org/v1alpha1")
    #[serde(default)]
    pub api_version: String,
    /// Resource kind (e.g. "PodChaos", "Schedule")
    #[serde(default)]
    pub kind: String,
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Kind-specific spec, kept open-ended
    #[serde(default)]
    pub spec: Value,
}

impl FaultResource {
    /// Parse a manifest (already decoded from YAML or JSON)
    pub fn from_manifest(manifest: &Value) -> Result<Self, Error> {
        serde_json::from_value(manifest.clone())
            .map_err(|e| Error::serialization(format!("invalid fault manifest: {}", e)))
    }

    /// Object name, empty if unset
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Object namespace, if set
    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Creation time reported by the API server
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.creation_timestamp.as_ref().map(|t| t.0)
    }

    /// Finalizers currently holding the object
    pub fn finalizers(&self) -> &[String] {
        self.metadata.finalizers.as_deref().unwrap_or_default()
    }

    /// Deletion has been requested
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Terminating but still held by at least one finalizer
    pub fn is_stuck(&self) -> bool {
        self.is_terminating() && !self.finalizers().is_empty()
    }

    /// Typed view of the spec
    pub fn fault_spec(&self) -> FaultSpec {
        FaultSpec::parse(&self.kind, &self.spec)
    }

    /// Primary selector (see [`FaultSpec::selector`])
    pub fn selector(&self) -> Selector {
        self.fault_spec().selector()
    }

    /// The I/O fault body, wherever this resource carries one
    fn io_fault(&self) -> Option<&Value> {
        const IO_KEY: &str = "ioChaos";
        if self.kind.eq_ignore_ascii_case("IOChaos") {
            return Some(&self.spec);
        }
        if self.kind == SCHEDULE_KIND {
            return self.spec.get(IO_KEY);
        }
        if self.kind == WORKFLOW_KIND {
            return templates(&self.spec).find_map(|t| t.get(IO_KEY));
        }
        None
    }

    /// Whether this resource injects an I/O fault
    pub fn is_io_fault(&self) -> bool {
        self.io_fault().is_some()
    }

    /// Volume path of the I/O fault, if any and non-empty
    pub fn io_volume_path(&self) -> Option<&str> {
        self.io_fault()
            .and_then(|body| body.get("volumePath"))
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
    }
}

impl From<DynamicObject> for FaultResource {
    fn from(obj: DynamicObject) -> Self {
        let (api_version, kind) = obj
            .types
            .map(|t| (t.api_version, t.kind))
            .unwrap_or_default();
        let spec = obj.data.get("spec").cloned().unwrap_or(Value::Null);
        Self {
            api_version,
            kind,
            metadata: obj.metadata,
            spec,
        }
    }
}

/// One fault step inside a Workflow
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowStep {
    /// Template name (empty if unnamed)
    pub template: String,
    /// Embedding key the fault was found under (e.g. "podChaos")
    pub embed_key: &'static str,
    /// Selector of this step
    pub selector: Selector,
}

/// Closed set of spec shapes, each with its own selector location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FaultSpec {
    /// A plain fault kind: `spec.selector`
    Direct {
        /// Selector at `spec.selector`
        selector: Selector,
    },
    /// A Schedule: `spec.<embedKey>.selector`
    Scheduled {
        /// Lowercased `spec.type` tag (e.g. "podchaos")
        fault_type: String,
        /// Key the fault is embedded under (e.g. "podChaos")
        embed_key: String,
        /// Selector of the embedded fault
        selector: Selector,
    },
    /// A Workflow: `spec.templates[i].<embedKey>.selector`
    Workflow {
        /// Fault steps in template order
        steps: Vec<WorkflowStep>,
    },
}

impl FaultSpec {
    /// Classify a spec by its resource kind. Never fails; missing pieces
    /// yield empty selectors.
    pub fn parse(kind: &str, spec: &Value) -> Self {
        match kind {
            SCHEDULE_KIND => {
                let fault_type = spec
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                let embed_key = lookup_kind(&fault_type)
                    .and_then(|k| k.embed_key)
                    .map(str::to_string)
                    .unwrap_or_else(|| fault_type.clone());
                let selector = selector_at(spec.get(&embed_key));
                Self::Scheduled {
                    fault_type,
                    embed_key,
                    selector,
                }
            }
            WORKFLOW_KIND => {
                let steps = templates(spec)
                    .flat_map(|template| {
                        let name = template
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        CHAOS_KINDS
                            .iter()
                            .filter_map(|k| k.embed_key)
                            .filter_map(move |key| {
                                template.get(key).map(|body| WorkflowStep {
                                    template: name.to_string(),
                                    embed_key: key,
                                    selector: selector_at(Some(body)),
                                })
                            })
                    })
                    .collect();
                Self::Workflow { steps }
            }
            _ => Self::Direct {
                selector: selector_at(Some(spec)),
            },
        }
    }

    /// The selector used for target verification.
    ///
    /// For workflows this is the first step with a non-empty selector.
    pub fn selector(&self) -> Selector {
        match self {
            Self::Direct { selector } | Self::Scheduled { selector, .. } => selector.clone(),
            Self::Workflow { steps } => steps
                .iter()
                .map(|s| &s.selector)
                .find(|s| !s.is_empty())
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Every selector this spec carries, in order
    pub fn selectors(&self) -> Vec<Selector> {
        match self {
            Self::Direct { selector } | Self::Scheduled { selector, .. } => {
                vec![selector.clone()]
            }
            Self::Workflow { steps } => steps.iter().map(|s| s.selector.clone()).collect(),
        }
    }
}

/// Locate the pod-target selector of a manifest, however deeply it is nested.
///
/// Pure and total: returns an empty selector when none is found.
pub fn extract_selector(manifest: &Value) -> Selector {
    let kind = manifest
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let spec = manifest.get("spec").unwrap_or(&Value::Null);
    FaultSpec::parse(kind, spec).selector()
}

fn selector_at(body: Option<&Value>) -> Selector {
    body.and_then(|b| b.get("selector"))
        .map(Selector::from_value)
        .unwrap_or_default()
}

fn templates(spec: &Value) -> impl Iterator<Item = &Value> {
    spec.get("templates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}
