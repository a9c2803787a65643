//! Default catalog for a fresh database

use rusqlite::Connection;
use tracing::info;

use super::badges::{self, CreateBadgeInput};
use super::categories::{self, CreateCategoryInput};
use super::query_err;
use crate::error::LedgerError;

/// (id, name, icon, color)
const DEFAULT_CATEGORIES: &[(&str, &str, &str, &str)] = &[
    ("organic", "Organic", "🥬", "#22c55e"),
    ("plastic", "Plastic", "🧴", "#3b82f6"),
    ("metal", "Metal", "🥫", "#6b7280"),
    ("glass", "Glass", "🍾", "#14b8a6"),
    ("paper", "Paper", "📄", "#eab308"),
    ("electronics", "Electronics", "🔌", "#8b5cf6"),
    ("hazardous", "Hazardous", "☣️", "#ef4444"),
];

/// (id, name, description, icon, criteria_kg, criteria_count)
const DEFAULT_BADGES: &[(&str, &str, &str, &str, Option<f64>, Option<i64>)] = &[
    ("first-disposal", "First Step", "Log your first disposal", "🌱", None, Some(1)),
    ("eco-starter", "Eco Starter", "Dispose of 10 kg of waste", "♻️", Some(10.0), None),
    ("green-warrior", "Green Warrior", "Dispose of 50 kg of waste", "🌿", Some(50.0), None),
    ("eco-champion", "Eco Champion", "Dispose of 100 kg of waste", "🏆", Some(100.0), None),
    ("planet-guardian", "Planet Guardian", "Dispose of 500 kg of waste", "🌍", Some(500.0), None),
];

/// Insert default categories and badges into empty catalogs.
/// Returns (categories inserted, badges inserted).
pub fn seed_defaults(conn: &Connection) -> Result<(usize, usize), LedgerError> {
    let mut inserted = (0, 0);

    let category_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM waste_categories", [], |row| row.get(0))
        .map_err(query_err)?;
    if category_count == 0 {
        for (id, name, icon, color) in DEFAULT_CATEGORIES {
            categories::create_category(conn, &CreateCategoryInput {
                id: Some(id.to_string()),
                name: name.to_string(),
                icon: Some(icon.to_string()),
                color: Some(color.to_string()),
            })?;
            inserted.0 += 1;
        }
    }

    let badge_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM badges", [], |row| row.get(0))
        .map_err(query_err)?;
    if badge_count == 0 {
        for (id, name, description, icon, criteria_kg, criteria_count) in DEFAULT_BADGES {
            badges::create_badge(conn, &CreateBadgeInput {
                id: Some(id.to_string()),
                name: name.to_string(),
                description: Some(description.to_string()),
                icon: Some(icon.to_string()),
                color: None,
                criteria_kg: *criteria_kg,
                criteria_count: *criteria_count,
            })?;
            inserted.1 += 1;
        }
    }

    if inserted != (0, 0) {
        info!(categories = inserted.0, badges = inserted.1, "Seeded default catalog");
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;

    #[test]
    fn test_seed_only_fills_empty_catalogs() {
        let conn = Connection::open_in_memory().unwrap();
        schema::init_schema(&conn).unwrap();

        assert_eq!(seed_defaults(&conn).unwrap(), (DEFAULT_CATEGORIES.len(), DEFAULT_BADGES.len()));
        assert_eq!(seed_defaults(&conn).unwrap(), (0, 0));
    }
}
