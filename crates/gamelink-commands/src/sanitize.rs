//! Label normalization.

/// Label used when nothing valid is left after sanitizing.
pub const PLACEHOLDER: &str = "cmd";

/// Normalize a command label.
///
/// Trims, lowercases, maps every character outside `[a-z0-9_-]` to `-` and
/// strips leading dashes. Idempotent.
pub fn sanitize(raw: &str) -> String {
    let mapped: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let stripped = mapped.trim_start_matches('-');
    if stripped.is_empty() {
        PLACEHOLDER.to_owned()
    } else {
        stripped.to_owned()
    }
}
