//! Fault kind table
//!
//! Adding a new fault type means adding one entry here; discovery, selector
//! extraction and the CLI all iterate this table instead of branching on kind.

/// Kind of the wrapper that runs a fault on a cron schedule
pub const SCHEDULE_KIND: &str = "Schedule";

/// Kind of the wrapper that chains several fault steps
pub const WORKFLOW_KIND: &str = "Workflow";

/// One entry of the fault kind table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChaosKind {
    /// Resource kind as it appears in manifests (e.g. "PodChaos")
    pub kind: &'static str,
    /// Plural resource name used in API paths (e.g. "podchaos")
    pub plural: &'static str,
    /// Key under which a Schedule or Workflow embeds this fault's spec
    /// (e.g. "podChaos"). `None` for the wrapper kinds themselves.
    pub embed_key: Option<&'static str>,
}

impl ChaosKind {
    const fn fault(kind: &'static str, plural: &'static str, embed_key: &'static str) -> Self {
        Self {
            kind,
            plural,
            embed_key: Some(embed_key),
        }
    }

    const fn wrapper(kind: &'static str, plural: &'static str) -> Self {
        Self {
            kind,
            plural,
            embed_key: None,
        }
    }

    /// Whether this kind wraps other faults (Schedule, Workflow)
    pub fn is_wrapper(&self) -> bool {
        self.embed_key.is_none()
    }
}

/// Every fault resource kind the controller understands.
pub const CHAOS_KINDS: &[ChaosKind] = &[
    ChaosKind::fault("PodChaos", "podchaos", "podChaos"),
    ChaosKind::fault("NetworkChaos", "networkchaos", "networkChaos"),
    ChaosKind::fault("IOChaos", "iochaos", "ioChaos"),
    ChaosKind::fault("StressChaos", "stresschaos", "stressChaos"),
    ChaosKind::fault("TimeChaos", "timechaos", "timeChaos"),
    ChaosKind::fault("DNSChaos", "dnschaos", "dnsChaos"),
    ChaosKind::fault("HTTPChaos", "httpchaos", "httpChaos"),
    ChaosKind::fault("KernelChaos", "kernelchaos", "kernelChaos"),
    ChaosKind::fault("JVMChaos", "jvmchaos", "jvmChaos"),
    ChaosKind::fault("AWSChaos", "awschaos", "awsChaos"),
    ChaosKind::fault("GCPChaos", "gcpchaos", "gcpChaos"),
    ChaosKind::fault("AzureChaos", "azurechaos", "azureChaos"),
    ChaosKind::fault(
        "PhysicalMachineChaos",
        "physicalmachinechaos",
        "physicalmachineChaos",
    ),
    ChaosKind::wrapper(SCHEDULE_KIND, "schedules"),
    ChaosKind::wrapper(WORKFLOW_KIND, "workflows"),
];

/// Find a table entry by kind, plural, or lowercase type tag (case-insensitive).
///
/// `"podchaos"`, `"PodChaos"` and `"podChaos"` all resolve to the PodChaos entry.
pub fn lookup_kind(name: &str) -> Option<&'static ChaosKind> {
    let needle = name.to_ascii_lowercase();
    CHAOS_KINDS
        .iter()
        .find(|k| k.kind.to_ascii_lowercase() == needle || k.plural == needle)
}

/// Naive English pluralization used for resource paths.
///
/// Lowercases the kind and appends `s` unless it already ends in `s`.
pub fn naive_plural(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    if lower.ends_with('s') {
        lower
    } else {
        format!("{}s", lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_plurals_follow_naive_rule() {
        for entry in CHAOS_KINDS {
            assert_eq!(naive_plural(entry.kind), entry.plural, "{}", entry.kind);
        }
    }

    #[test]
    fn test_naive_plural() {
        assert_eq!(naive_plural("Schedule"), "schedules");
        assert_eq!(naive_plural("IOChaos"), "iochaos");
        assert_eq!(naive_plural("MilvusCluster"), "milvusclusters");
    }

    #[test]
    fn test_lookup_by_any_spelling() {
        assert_eq!(lookup_kind("podchaos").map(|k| k.kind), Some("PodChaos"));
        assert_eq!(lookup_kind("PodChaos").map(|k| k.kind), Some("PodChaos"));
        assert_eq!(lookup_kind("schedules").map(|k| k.kind), Some("Schedule"));
        assert_eq!(lookup_kind("IOCHAOS").map(|k| k.kind), Some("IOChaos"));
        assert!(lookup_kind("blockchaos").is_none());
    }

    #[test]
    fn test_wrappers_have_no_embed_key() {
        let wrappers: Vec<_> = CHAOS_KINDS
            .iter()
            .filter(|k| k.is_wrapper())
            .map(|k| k.kind)
            .collect();
        assert_eq!(wrappers, vec![SCHEDULE_KIND, WORKFLOW_KIND]);
    }
}
