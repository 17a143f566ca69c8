//! Pod selectors
//!
//! A fault resource targets pods through a selector made of label equality
//! requirements and a list of candidate namespaces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Label-based query identifying which pods a fault targets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    /// Every pair must be present with an equal value in the pod's labels
    #[serde(default)]
    pub label_selectors: BTreeMap<String, String>,
    /// Candidate namespaces; empty means the namespace being queried
    #[serde(default)]
    pub namespaces: Vec<String>,
}

impl Selector {
    /// Build a selector from label pairs with no namespace restriction
    pub fn with_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            label_selectors: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            namespaces: Vec::new(),
        }
    }

    /// Parse a selector from raw JSON without ever failing.
    ///
    /// Missing or malformed fields become empty; scalar label values are
    /// rendered as strings, nulls and nested structures are dropped.
    pub fn from_value(value: &Value) -> Self {
        let label_selectors = value
            .get("labelSelectors")
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| scalar_to_string(v).map(|v| (k.clone(), v)))
                    .collect()
            })
            .unwrap_or_default();

        let namespaces = value
            .get("namespaces")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|ns| ns.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            label_selectors,
            namespaces,
        }
    }

    /// True when the selector has no label requirements.
    ///
    /// An empty selector never matches anything.
    pub fn is_empty(&self) -> bool {
        self.label_selectors.is_empty()
    }

    /// Render the label requirements as a Kubernetes label selector string
    /// (`key=value` pairs joined by `", "`).
    pub fn label_query(&self) -> String {
        self.label_selectors
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Whether `instance` is targeted by this selector.
    ///
    /// `current_namespace` stands in when `namespaces` is empty.
    pub fn matches(&self, instance: &WorkloadInstance, current_namespace: &str) -> bool {
        if self.is_empty() || !self.covers_namespace(&instance.namespace, current_namespace) {
            return false;
        }
        self.label_selectors
            .iter()
            .all(|(k, v)| instance.labels.get(k) == Some(v))
    }

    /// Whether pods in `namespace` can be targeted
    pub fn covers_namespace(&self, namespace: &str, current_namespace: &str) -> bool {
        if self.namespaces.is_empty() {
            namespace == current_namespace
        } else {
            self.namespaces.iter().any(|ns| ns == namespace)
        }
    }

    /// Release-identifying labels (`release`, `app.kubernetes.io/instance`)
    /// whose value equals `release`, rendered as `key=value`.
    pub fn release_labels(&self, release: &str) -> Vec<String> {
        crate::RELEASE_LABEL_KEYS
            .iter()
            .filter(|key| self.label_selectors.get(**key).map(String::as_str) == Some(release))
            .map(|key| format!("{}={}", key, release))
            .collect()
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A running pod as seen by the controller
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadInstance {
    /// Pod name
    pub name: String,
    /// Pod namespace
    pub namespace: String,
    /// Pod labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Phase is Running and every container reports ready
    #[serde(default)]
    pub ready: bool,
}
