//! Display formatting for post timestamps.

use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

pub const HUMAN_DATETIME_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[month repr:long] [day padding:none], [year] [hour padding:zero]:[minute padding:zero]"
);
pub const ISO_DATETIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

/// Render a timestamp the way feed cards display it, e.g. `March 4, 2026 09:15`.
pub fn format_human_datetime(moment: OffsetDateTime) -> String {
    moment
        .format(HUMAN_DATETIME_FORMAT)
        .unwrap_or_else(|_| moment.to_string())
}

/// Machine-readable form used in `<time datetime="...">` attributes.
pub fn format_iso_datetime(moment: OffsetDateTime) -> String {
    moment
        .format(ISO_DATETIME_FORMAT)
        .unwrap_or_else(|_| moment.to_string())
}

/// Short excerpt used where a full post body would crowd the layout.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
