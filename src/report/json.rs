//! JSON output for save listings.
//!
//! Serializes a listing page for scripting and piping.

use crate::store::Page;

pub fn render(page: &Page<'_>) -> String {
    serde_json::to_string_pretty(page).unwrap_or_else(|e| format!(r#"{{"error":"{e}"}}"#))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::codec::NameTemplate;
    use crate::store::Registry;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn page_serializes_with_records() {
        let mut registry = Registry::new(
            PathBuf::from("/saves"),
            Arc::new(NameTemplate::new("autosave_$DATE").unwrap()),
        );
        registry.append(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            true,
            PathBuf::from("/saves/autosave_20240301120000_keep.brs"),
        );

        let value: serde_json::Value = serde_json::from_str(&render(&registry.page(1, 5))).unwrap();

        assert_eq!(value["total_saves"], 1);
        assert_eq!(value["saves"][0]["id"], 1);
        assert_eq!(value["saves"][0]["keep"], true);
        assert_eq!(value["saves"][0]["name"], "autosave_20240301120000_keep.brs");
        assert_eq!(value["saves"][0]["date"], "2024-03-01T12:00:00Z");
    }
}
