//! Badge qualification
//!
//! Pure evaluation over supplied totals. Persisting awards is the
//! orchestrator's job.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Badge catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    /// Cumulative weight (kg) required to qualify. Zero means no
    /// weight criterion.
    pub criteria_kg: Option<f64>,
    /// Activity-count threshold. Currently any positive cumulative weight
    /// qualifies; the count itself is not compared. Zero means no count
    /// criterion.
    pub criteria_count: Option<i64>,
}

impl Badge {
    /// Whether this badge qualifies for the given cumulative weight
    pub fn qualifies(&self, total_waste_kg: f64) -> bool {
        let by_weight = self
            .criteria_kg
            .filter(|threshold| *threshold > 0.0)
            .map(|threshold| total_waste_kg >= threshold)
            .unwrap_or(false);
        let by_count = self.criteria_count.is_some_and(|count| count > 0) && total_waste_kg > 0.0;
        by_weight || by_count
    }
}

/// Badges from `catalog` that qualify and are not in `already_earned`,
/// in catalog order.
///
/// `total_points` is accepted so that point-based criteria can be added
/// without changing callers; no current rule reads it.
pub fn evaluate(
    total_waste_kg: f64,
    _total_points: i64,
    catalog: &[Badge],
    already_earned: &HashSet<String>,
) -> Vec<String> {
    catalog
        .iter()
        .filter(|badge| !already_earned.contains(&badge.id))
        .filter(|badge| badge.qualifies(total_waste_kg))
        .map(|badge| badge.id.clone())
        .collect()
}
