//! Longest shared path-segment prefix.
//!
//! Paths are treated as raw strings split on the separator, so an absolute
//! path starts with an empty segment: `"/a/b"` is `["", "a", "b"]`. That
//! leading segment counts toward [`segment_count`] and is what makes
//! `"/a"` vs `"/b"` share the empty prefix rather than `"/"`.

use std::path::MAIN_SEPARATOR;

/// Longest common segment prefix of `left` and `right`.
pub fn common_prefix(left: &str, right: &str) -> String {
    let shared: Vec<&str> = left
        .split(MAIN_SEPARATOR)
        .zip(right.split(MAIN_SEPARATOR))
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a)
        .collect();
    shared.join(&MAIN_SEPARATOR.to_string())
}

/// Number of separator-delimited segments, including a leading empty one
/// for absolute paths. The empty string has zero segments.
pub fn segment_count(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split(MAIN_SEPARATOR).count()
    }
}
