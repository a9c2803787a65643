//! Experience and level arithmetic

use serde::Serialize;

use crate::error::LedgerError;

/// Experience points granted per kilogram disposed
pub const XP_PER_KG: f64 = 10.0;

/// Experience points needed to advance one level
pub const XP_PER_LEVEL: i64 = 1000;

/// Experience earned for a single disposal: `round(weight_kg * 10)`.
///
/// Rounds half away from zero, so 0.05 kg earns 1 XP.
pub fn compute_experience(weight_kg: f64) -> Result<i64, LedgerError> {
    if !weight_kg.is_finite() || weight_kg <= 0.0 {
        return Err(LedgerError::InvalidWeight(weight_kg));
    }
    Ok((weight_kg * XP_PER_KG).round() as i64)
}

/// Level for a cumulative points total. Level 1 starts at zero points.
pub fn level_for_points(points: i64) -> i64 {
    points.max(0) / XP_PER_LEVEL + 1
}

/// Progress toward the next level, as shown on a profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelProgress {
    pub level: i64,
    pub xp_into_level: i64,
    pub xp_to_next_level: i64,
    pub progress_pct: f64,
}

impl LevelProgress {
    pub fn for_points(points: i64) -> Self {
        let points = points.max(0);
        let level = level_for_points(points);
        let xp_into_level = points % XP_PER_LEVEL;
        Self {
            level,
            xp_into_level,
            xp_to_next_level: level * XP_PER_LEVEL - points,
            progress_pct: xp_into_level as f64 / XP_PER_LEVEL as f64 * 100.0,
        }
    }
}
