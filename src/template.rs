//! Manifest rewriting
//!
//! Fault manifests are authored once per fault type and target component and
//! then bound to a concrete release at apply time: release labels, target
//! namespaces, mode/value, duration and schedule are overwritten wherever
//! they appear in the document.

use serde_json::{Map, Value};

use crate::{Error, Result, COMPONENT_LABEL_KEY, INSTANCE_LABEL_KEY, RELEASE_LABEL_KEY};

/// Replace the value of every `key` at any depth with `new_value`.
///
/// Returns the number of occurrences replaced.
pub fn set_key(node: &mut Value, key: &str, new_value: &Value) -> usize {
    match node {
        Value::Array(items) => items.iter_mut().map(|i| set_key(i, key, new_value)).sum(),
        Value::Object(map) => {
            let mut replaced = 0;
            if let Some(slot) = map.get_mut(key) {
                *slot = new_value.clone();
                replaced += 1;
            }
            replaced
                + map
                    .iter_mut()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(_, v)| set_key(v, key, new_value))
                    .sum::<usize>()
        }
        _ => 0,
    }
}

/// Rename every `key` at any depth to `new_key`, keeping its value.
///
/// Returns the number of keys renamed.
pub fn rename_key(node: &mut Value, key: &str, new_key: &str) -> usize {
    match node {
        Value::Array(items) => items.iter_mut().map(|i| rename_key(i, key, new_key)).sum(),
        Value::Object(map) => {
            let mut renamed = 0;
            if key != new_key {
                if let Some(value) = map.remove(key) {
                    map.insert(new_key.to_string(), value);
                    renamed += 1;
                }
            }
            renamed
                + map
                    .values_mut()
                    .map(|v| rename_key(v, key, new_key))
                    .sum::<usize>()
        }
        _ => 0,
    }
}

/// Parse a duration such as `"1h2m3s"`, `"5m"` or `"90"` into seconds.
///
/// Trailing digits without a unit count as seconds. Totals that do not fit
/// in a `u64` are rejected.
pub fn parse_duration(input: &str) -> Result<u64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::validation("empty duration"));
    }

    let overflow = || Error::validation(format!("duration {:?} is too large", input));
    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let multiplier = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return Err(Error::validation(format!("invalid duration {:?}", input))),
        };
        total = take_number(&mut digits, input)?
            .checked_mul(multiplier)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(overflow)?;
    }
    if !digits.is_empty() {
        total = total
            .checked_add(take_number(&mut digits, input)?)
            .ok_or_else(overflow)?;
    }
    Ok(total)
}

fn take_number(digits: &mut String, input: &str) -> Result<u64> {
    let n = digits
        .parse::<u64>()
        .map_err(|_| Error::validation(format!("invalid duration {:?}", input)))?;
    digits.clear();
    Ok(n)
}

/// Turn an interval like `"30s"` or `"5m"` into a six-field cron schedule.
pub fn interval_to_cron(interval: &str) -> Result<String> {
    let interval = interval.trim();
    let invalid = || Error::validation(format!("invalid interval {:?}, expected <n>s or <n>m", interval));
    let split = interval.char_indices().last().map(|(i, _)| i).unwrap_or(0);
    let (count, unit) = interval.split_at(split);
    let count: u64 = count.parse().map_err(|_| invalid())?;
    if count == 0 {
        return Err(invalid());
    }
    match unit {
        "s" => Ok(format!("*/{} * * * * *", count)),
        "m" => Ok(format!("00 */{} * * * *", count)),
        _ => Err(invalid()),
    }
}

/// Values bound into a manifest before it is applied
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestOverrides {
    /// Resource name (`metadata.name`)
    pub name: Option<String>,
    /// Namespace the resource is created in (`metadata.namespace`)
    pub resource_namespace: Option<String>,
    /// Release the selectors target
    pub release: Option<String>,
    /// Namespaces the selectors search
    pub target_namespaces: Vec<String>,
    /// Selection mode (`one`, `all`, `fixed`, `fixed-percent`, ...)
    pub mode: Option<String>,
    /// Argument of the selection mode
    pub value: Option<String>,
    /// Experiment duration, e.g. `"5m"`; written as whole minutes
    pub duration: Option<String>,
    /// Schedule interval, e.g. `"30s"`; written as a cron expression
    pub interval: Option<String>,
    /// Rename `component` selector keys to `app.kubernetes.io/component`
    pub operator_labels: bool,
}

impl ManifestOverrides {
    /// Rewrite `manifest` in place
    pub fn apply(&self, manifest: &mut Value) -> Result<()> {
        if !manifest.is_object() {
            return Err(Error::validation("manifest must be a mapping"));
        }

        if self.name.is_some() || self.resource_namespace.is_some() {
            let metadata = manifest
                .as_object_mut()
                .map(|m| m.entry("metadata").or_insert_with(|| Value::Object(Map::new())));
            if let Some(Value::Object(metadata)) = metadata {
                if let Some(name) = &self.name {
                    metadata.insert("name".to_string(), Value::String(name.clone()));
                }
                if let Some(ns) = &self.resource_namespace {
                    metadata.insert("namespace".to_string(), Value::String(ns.clone()));
                }
            }
        }

        if let Some(release) = &self.release {
            let release = Value::String(release.clone());
            set_key(manifest, RELEASE_LABEL_KEY, &release);
            set_key(manifest, INSTANCE_LABEL_KEY, &release);
        }
        if !self.target_namespaces.is_empty() {
            let namespaces = Value::from(self.target_namespaces.clone());
            set_key(manifest, "namespaces", &namespaces);
        }
        if let Some(value) = &self.value {
            set_key(manifest, "value", &Value::String(value.clone()));
        }
        if let Some(mode) = &self.mode {
            set_key(manifest, "mode", &Value::String(mode.clone()));
        }
        if let Some(interval) = &self.interval {
            set_key(manifest, "schedule", &Value::String(interval_to_cron(interval)?));
        }
        if let Some(duration) = &self.duration {
            let minutes = parse_duration(duration)? / 60;
            set_key(manifest, "duration", &Value::String(format!("{}m", minutes)));
        }
        if self.operator_labels {
            rename_key(manifest, "component", COMPONENT_LABEL_KEY);
        }
        Ok(())
    }

    /// Rewrite every document of a multi-document manifest.
    ///
    /// A name override is only accepted for a single document, since every
    /// document would otherwise be created under the same name.
    pub fn apply_all(&self, manifests: &mut [Value]) -> Result<()> {
        if self.name.is_some() && manifests.len() > 1 {
            return Err(Error::validation(format!(
                "a name override needs a single manifest, got {} documents",
                manifests.len()
            )));
        }
        manifests.iter_mut().try_for_each(|manifest| self.apply(manifest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::extract_selector;
    use serde_json::json;

    #[test]
    fn test_set_key_replaces_every_depth() {
        let mut doc = json!({
            "mode": "one",
            "spec": {"mode": "all", "templates": [{"mode": "one"}, {"other": 1}]}
        });
        let replaced = set_key(&mut doc, "mode", &json!("fixed"));
        assert_eq!(replaced, 3);
        assert_eq!(doc["mode"], "fixed");
        assert_eq!(doc["spec"]["mode"], "fixed");
        assert_eq!(doc["spec"]["templates"][0]["mode"], "fixed");
        assert_eq!(doc["spec"]["templates"][1], json!({"other": 1}));
    }

    #[test]
    fn test_rename_key_keeps_value() {
        let mut doc = json!({
            "selector": {"labelSelectors": {"component": "querynode", "release": "r"}},
            "templates": [{"labelSelectors": {"component": "datanode"}}]
        });
        assert_eq!(rename_key(&mut doc, "component", COMPONENT_LABEL_KEY), 2);
        assert_eq!(
            doc["selector"]["labelSelectors"],
            json!({"app.kubernetes.io/component": "querynode", "release": "r"})
        );
        assert_eq!(
            doc["templates"][0]["labelSelectors"]["app.kubernetes.io/component"],
            "datanode"
        );
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1h2m3s").unwrap(), 3723);
        assert_eq!(parse_duration("5m").unwrap(), 300);
        assert_eq!(parse_duration("90").unwrap(), 90);
        assert_eq!(parse_duration("2m30").unwrap(), 150);
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("m").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        for input in ["9999999999999999h", "5124095576030432h", "18446744073709551615s1"] {
            let err = parse_duration(input).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{input}: {err:?}");
        }
        assert!(parse_duration("99999999999999999999").is_err());
        assert_eq!(parse_duration("18446744073709551615s").unwrap(), u64::MAX);
    }

    #[test]
    fn test_interval_to_cron() {
        assert_eq!(interval_to_cron("30s").unwrap(), "*/30 * * * * *");
        assert_eq!(interval_to_cron("5m").unwrap(), "00 */5 * * * *");
        assert!(interval_to_cron("5h").is_err());
        assert!(interval_to_cron("0s").is_err());
        assert!(interval_to_cron("s").is_err());
        assert!(interval_to_cron("").is_err());
    }

    /// Story: a generic pod-kill template is bound to a release deployed by
    /// the operator, and its selector then targets that release
    #[test]
    fn story_bind_template_to_operator_release() {
        let mut manifest = json!({
            "apiVersion": "chaos-mesh.org/v1alpha1",
            "kind": "Schedule",
            "metadata": {"name": "template"},
            "spec": {
                "schedule": "*/5 * * * * *",
                "type": "PodChaos",
                "podChaos": {
                    "action": "pod-kill",
                    "mode": "one",
                    "duration": "1m",
                    "selector": {
                        "namespaces": ["default"],
                        "labelSelectors": {
                            "app.kubernetes.io/instance": "placeholder",
                            "component": "querynode"
                        }
                    }
                }
            }
        });
        let overrides = ManifestOverrides {
            name: Some("test-querynode-pod-kill".to_string()),
            resource_namespace: Some("chaos-testing".to_string()),
            release: Some("prod".to_string()),
            target_namespaces: vec!["milvus".to_string()],
            mode: Some("fixed".to_string()),
            value: Some("2".to_string()),
            duration: Some("3m30s".to_string()),
            interval: Some("30s".to_string()),
            operator_labels: true,
        };
        overrides.apply(&mut manifest).unwrap();

        assert_eq!(manifest["metadata"]["name"], "test-querynode-pod-kill");
        assert_eq!(manifest["metadata"]["namespace"], "chaos-testing");
        assert_eq!(manifest["spec"]["schedule"], "*/30 * * * * *");
        let fault = &manifest["spec"]["podChaos"];
        assert_eq!(fault["mode"], "fixed");
        assert_eq!(fault["value"], json!(null));
        assert_eq!(fault["duration"], "3m");

        let selector = extract_selector(&manifest);
        assert_eq!(selector.namespaces, vec!["milvus".to_string()]);
        assert_eq!(selector.label_selectors["app.kubernetes.io/instance"], "prod");
        assert_eq!(selector.label_selectors[COMPONENT_LABEL_KEY], "querynode");
    }

    #[test]
    fn test_apply_rejects_non_mapping() {
        let mut manifest = json!(["not", "a", "manifest"]);
        assert!(ManifestOverrides::default().apply(&mut manifest).is_err());
    }

    #[test]
    fn test_name_override_rejects_multiple_documents() {
        let overrides = ManifestOverrides {
            name: Some("io-delay".to_string()),
            ..Default::default()
        };
        let original = vec![
            json!({"kind": "IOChaos", "metadata": {"name": "a"}}),
            json!({"kind": "PodChaos", "metadata": {"name": "b"}}),
        ];

        let mut manifests = original.clone();
        let err = overrides.apply_all(&mut manifests).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(manifests, original);

        let mut single = vec![original[0].clone()];
        overrides.apply_all(&mut single).unwrap();
        assert_eq!(single[0]["metadata"]["name"], "io-delay");
    }

    #[test]
    fn test_apply_all_without_name_rewrites_every_document() {
        let overrides = ManifestOverrides {
            release: Some("prod".to_string()),
            ..Default::default()
        };
        let mut manifests = vec![
            json!({"metadata": {"name": "a"}, "spec": {"selector": {"labelSelectors": {"release": "x"}}}}),
            json!({"metadata": {"name": "b"}, "spec": {"selector": {"labelSelectors": {"release": "y"}}}}),
        ];

        overrides.apply_all(&mut manifests).unwrap();
        for manifest in &manifests {
            assert_eq!(manifest["spec"]["selector"]["labelSelectors"]["release"], "prod");
        }
        assert_eq!(manifests[0]["metadata"]["name"], "a");
        assert_eq!(manifests[1]["metadata"]["name"], "b");
    }
}
