//! Parsing of the operator's selection of critic findings.

use crate::core::types::{FeedbackItem, Severity};

/// Select the critic findings the operator wants addressed.
///
/// `selection` must already be trimmed and lowercased.
///
/// - `""` selects nothing (the operator accepts the implementation).
/// - `"all"` selects everything.
/// - `"critical"`, `"major"`, `"minor"` select by severity.
/// - `"1,3"` selects by 1-based index; out-of-range indices are ignored.
///
/// Anything that fails to parse selects everything, so reviewer findings are
/// never dropped by a typo.
pub fn select_feedback(items: &[FeedbackItem], selection: &str) -> Vec<FeedbackItem> {
    if selection.is_empty() {
        return Vec::new();
    }
    if selection == "all" {
        return items.to_vec();
    }
    if let Some(severity) = Severity::parse(selection) {
        return items
            .iter()
            .filter(|item| item.severity == severity)
            .cloned()
            .collect();
    }
    match parse_indices(selection) {
        Some(indices) => indices
            .into_iter()
            .filter_map(|index| {
                index
                    .checked_sub(1)
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| items.get(i))
            })
            .cloned()
            .collect(),
        None => items.to_vec(),
    }
}

fn parse_indices(selection: &str) -> Option<Vec<i64>> {
    selection
        .split(',')
        .map(|part| part.trim().parse::<i64>().ok())
        .collect()
}
