//! Table rendering for the CLI

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::discovery::ResourceInfo;

/// Labels shown per row before the rest are summarized
const MAX_LABELS_SHOWN: usize = 3;

/// Column headers of the resource table
pub const RESOURCE_HEADERS: [&str; 5] = ["KIND", "NAME", "CREATED", "AGE", "TARGET LABELS"];

/// Age of `timestamp` relative to `now` in its largest whole unit
/// ("2d", "5h", "30m", "15s"). Future timestamps render as "0s".
pub fn format_age(timestamp: &DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(*timestamp);
    if elapsed.num_seconds() <= 0 {
        return "0s".to_string();
    }
    let units = [
        (elapsed.num_days(), "d"),
        (elapsed.num_hours(), "h"),
        (elapsed.num_minutes(), "m"),
    ];
    match units.iter().find(|(n, _)| *n > 0) {
        Some((n, unit)) => format!("{}{}", n, unit),
        None => format!("{}s", elapsed.num_seconds()),
    }
}

/// `key=value` pairs, first three only, then "(+n more)"
pub fn summarize_labels(labels: &BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return "<none>".to_string();
    }
    let mut shown: Vec<String> = labels
        .iter()
        .take(MAX_LABELS_SHOWN)
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    if labels.len() > MAX_LABELS_SHOWN {
        shown.push(format!("(+{} more)", labels.len() - MAX_LABELS_SHOWN));
    }
    shown.join(", ")
}

/// One table row per resource
pub fn resource_rows(resources: &[ResourceInfo], now: DateTime<Utc>) -> Vec<Vec<String>> {
    resources
        .iter()
        .map(|r| {
            let (created, age) = match &r.created_at {
                Some(ts) => (ts.format("%Y-%m-%d %H:%M:%S").to_string(), format_age(ts, now)),
                None => ("<unknown>".to_string(), "-".to_string()),
            };
            vec![
                r.kind.clone(),
                r.name.clone(),
                created,
                age,
                summarize_labels(&r.label_selectors),
            ]
        })
        .collect()
}

/// Render rows as left-aligned columns separated by two spaces
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let width = widths.get(i).copied().unwrap_or(0);
                format!("{:<width$}", cell, width = width)
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = line(headers.to_vec());
    for row in rows {
        out.push('\n');
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out
}

/// Full resource listing followed by the total line
pub fn render_resources(resources: &[ResourceInfo], now: DateTime<Utc>) -> String {
    if resources.is_empty() {
        return "No chaos resources found".to_string();
    }
    format!(
        "{}\n\nTotal: {} resource(s)",
        render_table(&RESOURCE_HEADERS, &resource_rows(resources, now)),
        resources.len()
    )
}
