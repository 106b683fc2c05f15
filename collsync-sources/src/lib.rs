//! collsync-sources — [`ExternalSource`](collsync_core::ExternalSource)
//! implementations for the two upstream exports.
//!
//! - [`herbarium`] — herbarium directory JSON (institutions with embedded staff)
//! - [`aggregator`] — specimen aggregator CSV (one collection per row)
//! - [`countries`] — country-name normalization to ISO codes

pub mod aggregator;
pub mod countries;
pub mod herbarium;

pub use aggregator::AggregatorExport;
pub use countries::CountryResolver;
pub use herbarium::HerbariumExport;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

// ---------------------------------------------------------------------------
// Field cleanup shared by both exports
// ---------------------------------------------------------------------------

pub(crate) fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// First entry of a multi-valued field (newline, comma or semicolon separated).
pub(crate) fn first_value(raw: &str) -> Option<String> {
    raw.split(['\n', ',', ';'])
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) fn first_email(raw: &str) -> Option<String> {
    raw.split(|c: char| c == '\n' || c == ',' || c == ';' || c.is_whitespace())
        .map(str::trim)
        .find(|v| v.contains('@'))
        .map(str::to_string)
}

/// First URL-looking token; scheme-less hosts get `http://`.
pub(crate) fn first_url(raw: &str) -> Option<String> {
    let token = raw.split_whitespace().find(|t| t.contains('.'))?;
    let token = token.trim_end_matches([',', ';']);
    if token.starts_with("http://") || token.starts_with("https://") {
        Some(token.to_string())
    } else {
        Some(format!("http://{token}"))
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD` and `MM/DD/YYYY`.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
        }
    }
    tracing::debug!(value = raw, "ignoring unparseable timestamp");
    None
}
