pub mod json;
pub mod table;

use chrono::{DateTime, Utc};

const WEEK_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Rough human age of something `age_ms` old.
pub fn ago(age_ms: i64) -> String {
    if age_ms < 0 {
        return "not yet".to_string();
    }

    let secs = age_ms as f64 / 1000.0;
    if secs < 5.0 {
        return "a moment".to_string();
    }
    if secs < 60.0 {
        return format!("{} secs", secs.round());
    }
    let mins = secs / 60.0;
    if mins < 60.0 {
        return format!("{} mins", mins.round());
    }
    let hours = mins / 60.0;
    if hours < 24.0 {
        return format!("{} hours", hours.round());
    }
    format!("{} days", (hours / 24.0).round())
}

/// Date of a save, with its age tacked on while it is less than a week old.
pub fn format_date(date: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let stamp = date.format("%Y-%m-%d %H:%M:%S UTC");
    let age = now.signed_duration_since(date).num_milliseconds();
    if age < WEEK_MS {
        format!("{stamp} ({})", ago(age))
    } else {
        stamp.to_string()
    }
}

/// "1 brick", "1,500 bricks"
pub fn plural(count: u64, word: &str) -> String {
    if count == 1 {
        format!("1 {word}")
    } else {
        format!("{} {word}s", thousands(count))
    }
}

/// 12345 -> "12,345"
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
