//! Plain-text rendering of save listings.
//!
//! The same lines are whispered to players in chat and printed by the CLI.

use chrono::{DateTime, Utc};

use super::format_date;
use crate::store::Page;

pub fn render_page(page: &Page<'_>, now: DateTime<Utc>) -> Vec<String> {
    if page.total_saves == 0 {
        return vec!["No saves yet".to_string()];
    }

    let mut lines: Vec<String> = page
        .saves
        .iter()
        .map(|save| {
            let keep = if save.keep { " - KEEP" } else { "" };
            format!("- {} - {}{keep}", save.id, format_date(save.date, now))
        })
        .collect();

    lines.push(format!(
        "Page {} of {}. ({} total)",
        page.number, page.total_pages, page.total_saves
    ));
    lines
}
