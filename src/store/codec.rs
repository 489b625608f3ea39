//! Save filename codec.
//!
//! A save's timestamp and keep flag live entirely in its filename, so the
//! registry can be rebuilt from a directory listing alone:
//!
//! `autosave_$DATE` -> `autosave_20240301120000.brs` / `autosave_20240301120000_keep.brs`

use chrono::{DateTime, TimeZone, Timelike, Utc};
use regex::Regex;
use tracing::warn;

use crate::files::SAVE_EXTENSION;

pub const DATE_PLACEHOLDER: &str = "$DATE";
pub const DEFAULT_FORMAT: &str = "autosave_$DATE";
pub const KEEP_SUFFIX: &str = "_keep";

const DATE_PATTERN: &str =
    r"(?P<year>\d{4})(?P<month>\d{2})(?P<day>\d{2})(?P<hour>\d{2})(?P<minute>\d{2})(?P<second>\d{2})";
const REPEAT_DATE_PATTERN: &str = r"\d{14}";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("filename template compiled to an invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// What a filename says about a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedName {
    pub date: DateTime<Utc>,
    pub keep: bool,
}

/// A compiled filename template.
#[derive(Debug, Clone)]
pub struct NameTemplate {
    format: String,
    pattern: Regex,
}

impl NameTemplate {
    /// Compile a template. A template without `$DATE` can't encode anything
    /// useful, so it is replaced by the default.
    pub fn new(format: &str) -> Result<Self, TemplateError> {
        let format = if format.contains(DATE_PLACEHOLDER) {
            format.to_string()
        } else {
            if !format.is_empty() {
                warn!(template = %format, "filename format has no {DATE_PLACEHOLDER}, using {DEFAULT_FORMAT}");
            }
            DEFAULT_FORMAT.to_string()
        };

        let pattern = Regex::new(&build_pattern(&format))?;
        Ok(NameTemplate { format, pattern })
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn encode(&self, date: DateTime<Utc>, keep: bool) -> String {
        let stamp = date.format("%Y%m%d%H%M%S").to_string();
        let mut name = self.format.replace(DATE_PLACEHOLDER, &stamp);
        if keep {
            name.push_str(KEEP_SUFFIX);
        }
        name.push('.');
        name.push_str(SAVE_EXTENSION);
        name
    }

    /// Decode a base filename. `None` just means "not one of ours".
    pub fn decode(&self, file_name: &str) -> Option<DecodedName> {
        let caps = self.pattern.captures(file_name)?;
        let field = |name: &str| caps.name(name)?.as_str().parse::<u32>().ok();

        let year = i32::try_from(field("year")?).ok()?;
        let date = Utc
            .with_ymd_and_hms(
                year,
                field("month")?,
                field("day")?,
                field("hour")?,
                field("minute")?,
                field("second")?,
            )
            .single()?;

        Some(DecodedName {
            date,
            keep: caps.name("keep").is_some(),
        })
    }
}

/// The filename a save gets when its keep flag is flipped from `keep`.
pub fn toggled_name(name: &str, keep: bool) -> Option<String> {
    let ext = format!(".{SAVE_EXTENSION}");
    let keep_ext = format!("{KEEP_SUFFIX}{ext}");

    if keep {
        let stem = strip_suffix_ignore_case(name, &keep_ext)?;
        Some(format!("{stem}{ext}"))
    } else {
        let stem = strip_suffix_ignore_case(name, &ext)?;
        Some(format!("{stem}{keep_ext}"))
    }
}

/// Drop sub-second precision; filenames only carry whole seconds.
pub fn truncate_to_seconds(date: DateTime<Utc>) -> DateTime<Utc> {
    date.with_nanosecond(0).unwrap_or(date)
}

fn strip_suffix_ignore_case<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    let split = name.len().checked_sub(suffix.len())?;
    if !name.is_char_boundary(split) {
        return None;
    }
    let (stem, tail) = name.split_at(split);
    tail.eq_ignore_ascii_case(suffix).then_some(stem)
}

fn build_pattern(format: &str) -> String {
    let mut pattern = String::from("(?i)^");
    for (i, literal) in format.split(DATE_PLACEHOLDER).enumerate() {
        match i {
            0 => {}
            1 => pattern.push_str(DATE_PATTERN),
            _ => pattern.push_str(REPEAT_DATE_PATTERN),
        }
        pattern.push_str(&regex::escape(literal));
    }
    // anything may sit between the template and the keep marker, e.g. "(1)" copies
    pattern.push_str(&format!(
        r".*?(?P<keep>{})?\.{}$",
        regex::escape(KEEP_SUFFIX),
        SAVE_EXTENSION
    ));
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn encodes_default_template() {
        let template = NameTemplate::new("autosave_$DATE").unwrap();
        let date = at(2024, 3, 1, 12, 0, 0);

        assert_eq!(template.encode(date, false), "autosave_20240301120000.brs");
        assert_eq!(template.encode(date, true), "autosave_20240301120000_keep.brs");
    }

    #[test]
    fn decode_reverses_encode() {
        let template = NameTemplate::new("server-$DATE-build").unwrap();
        let dates = [
            at(2024, 3, 1, 12, 0, 0),
            at(1999, 12, 31, 23, 59, 59),
            at(2030, 1, 1, 0, 0, 1),
        ];

        for date in dates {
            for keep in [false, true] {
                let name = template.encode(date, keep);
                assert_eq!(template.decode(&name), Some(DecodedName { date, keep }), "{name}");
            }
        }
    }

    #[test]
    fn decode_is_case_insensitive() {
        let template = NameTemplate::new("autosave_$DATE").unwrap();
        let decoded = template.decode("AUTOSAVE_20240301120000_KEEP.BRS").unwrap();
        assert!(decoded.keep);
        assert_eq!(decoded.date, at(2024, 3, 1, 12, 0, 0));
    }

    #[test]
    fn unrelated_files_are_not_saves() {
        let template = NameTemplate::new("autosave_$DATE").unwrap();
        assert!(template.decode("my_castle.brs").is_none());
        assert!(template.decode("autosave_20240301120000.txt").is_none());
        assert!(template.decode("autosave_2024030112.brs").is_none());
        assert!(template.decode("xautosave_20240301120000.brs").is_none());
    }

    #[test]
    fn impossible_dates_are_not_saves() {
        let template = NameTemplate::new("autosave_$DATE").unwrap();
        assert!(template.decode("autosave_20241301120000.brs").is_none());
        assert!(template.decode("autosave_20240230120000.brs").is_none());
    }

    #[test]
    fn trailing_text_before_extension_still_decodes() {
        let template = NameTemplate::new("autosave_$DATE").unwrap();
        let decoded = template.decode("autosave_20240301120000 (1).brs").unwrap();
        assert!(!decoded.keep);
    }

    #[test]
    fn missing_placeholder_falls_back_to_default() {
        let template = NameTemplate::new("castle").unwrap();
        assert_eq!(template.format(), DEFAULT_FORMAT);

        let template = NameTemplate::new("").unwrap();
        assert_eq!(template.format(), DEFAULT_FORMAT);
    }

    #[test]
    fn template_literals_are_escaped() {
        let template = NameTemplate::new("a.b+$DATE").unwrap();
        let date = at(2024, 3, 1, 12, 0, 0);

        assert!(template.decode(&template.encode(date, false)).is_some());
        assert!(template.decode("axb+20240301120000.brs").is_none());
    }

    #[test]
    fn repeated_placeholder_round_trips() {
        let template = NameTemplate::new("$DATE-$DATE").unwrap();
        let date = at(2024, 3, 1, 12, 0, 0);
        let name = template.encode(date, true);

        assert_eq!(name, "20240301120000-20240301120000_keep.brs");
        assert_eq!(template.decode(&name), Some(DecodedName { date, keep: true }));
    }

    #[test]
    fn toggled_name_adds_and_strips_keep() {
        assert_eq!(
            toggled_name("autosave_20240301120000.brs", false).as_deref(),
            Some("autosave_20240301120000_keep.brs")
        );
        assert_eq!(
            toggled_name("autosave_20240301120000_KEEP.brs", true).as_deref(),
            Some("autosave_20240301120000.brs")
        );
        assert_eq!(toggled_name("autosave.txt", false), None);
    }
}
