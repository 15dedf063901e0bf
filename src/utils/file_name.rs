//! Local file naming for downloads.

const INVALID: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

fn is_invalid(c: char) -> bool {
    c.is_control() || INVALID.contains(&c)
}

/// Replace each character that is not allowed in a file name with `_`.
///
/// Names that would resolve to the directory itself (empty, `.` and `..`) fall back
/// to `"download"`.
pub fn to_valid_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if is_invalid(c) { '_' } else { c })
        .collect();

    match cleaned.trim() {
        "" | "." | ".." => "download".to_string(),
        _ => cleaned,
    }
}

/// Last non-empty `/`-separated segment of a remote path.
pub fn last_segment(remote_path: &str) -> &str {
    remote_path
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("")
}
