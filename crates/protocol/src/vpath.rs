//! Virtual path utilities.
//!
//! Virtual paths address content across all mounts with a single
//! forward-slash namespace, independent of host OS path syntax. The empty
//! string denotes the namespace root. Normalized paths carry no leading or
//! trailing separators and no empty, `.`, or `..` segments; two virtual
//! paths are equal iff their normalized forms are byte-equal.

/// Separator for virtual path segments.
pub const SEPARATOR: char = '/';

/// Normalize a virtual path to its canonical form.
///
/// Redundant separators collapse, `.` segments are dropped, and `..`
/// segments pop the previous segment (never above the root). The result
/// has no leading or trailing separator; the root normalizes to `""`.
/// Idempotent: normalizing an already-normalized path is the identity.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split(SEPARATOR) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    segments.join("/")
}

/// Join two virtual paths, normalizing both sides.
///
/// Joining with the root on either side yields the other side; the result
/// never contains empty segments.
pub fn join(base: &str, part: &str) -> String {
    let base = normalize(base);
    let part = normalize(part);

    match (base.is_empty(), part.is_empty()) {
        (true, _) => part,
        (_, true) => base,
        _ => format!("{base}/{part}"),
    }
}

/// Join a base path with any number of parts.
pub fn join_all<'a>(base: &str, parts: impl IntoIterator<Item = &'a str>) -> String {
    parts.into_iter().fold(normalize(base), |acc, p| join(&acc, p))
}

/// Return the last segment of a virtual path, `""` for the root.
pub fn basename(path: &str) -> String {
    normalize(path)
        .rsplit(SEPARATOR)
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Split a normalized virtual path into its segments. The root has no
/// segments.
pub fn segments(path: &str) -> Vec<String> {
    let normalized = normalize(path);
    if normalized.is_empty() {
        Vec::new()
    } else {
        normalized.split(SEPARATOR).map(str::to_string).collect()
    }
}

/// Strip `prefix` from `path` on a segment boundary.
///
/// Returns the remainder (possibly `""`) when `prefix` is the root, equals
/// `path`, or is followed by a separator in `path`; `None` otherwise.
/// `"ab"` is not under the prefix `"a"`.
pub fn strip_prefix(path: &str, prefix: &str) -> Option<String> {
    let path = normalize(path);
    let prefix = normalize(prefix);

    if prefix.is_empty() {
        return Some(path);
    }
    if path == prefix {
        return Some(String::new());
    }
    path.strip_prefix(&format!("{prefix}/")).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_separators() {
        assert_eq!(normalize("/a//b/"), "a/b");
        assert_eq!(normalize("a/b"), "a/b");
        assert_eq!(normalize("///"), "");
    }

    #[test]
    fn test_normalize_empty_is_root() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("/"), "");
    }

    #[test]
    fn test_normalize_dot_segments() {
        assert_eq!(normalize("./a/./b"), "a/b");
        assert_eq!(normalize("a/../b"), "b");
        assert_eq!(normalize("../a"), "a");
    }

    #[test]
    fn test_normalize_idempotent() {
        for p in ["", "/", "a", "/a/b/", "a//b/./c/../d"] {
            let once = normalize(p);
            assert_eq!(normalize(&once), once, "not idempotent for {p:?}");
        }
    }

    #[test]
    fn test_join() {
        assert_eq!(join("a", "b"), "a/b");
        assert_eq!(join("/a/", "/b/"), "a/b");
        assert_eq!(join("", "b"), "b");
        assert_eq!(join("a", ""), "a");
        assert_eq!(join("", ""), "");
    }

    #[test]
    fn test_join_all() {
        assert_eq!(join_all("a", ["b", "c"]), "a/b/c");
        assert_eq!(join_all("", ["", "x"]), "x");
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("a/b/c"), "c");
        assert_eq!(basename("/a/"), "a");
        assert_eq!(basename(""), "");
    }

    #[test]
    fn test_segments() {
        assert_eq!(segments("a/b"), vec!["a", "b"]);
        assert!(segments("").is_empty());
        assert!(segments("/").is_empty());
    }

    #[test]
    fn test_strip_prefix_segment_boundary() {
        assert_eq!(strip_prefix("a/b/c", "a"), Some("b/c".to_string()));
        assert_eq!(strip_prefix("a", "a"), Some(String::new()));
        assert_eq!(strip_prefix("ab", "a"), None);
        assert_eq!(strip_prefix("a/b", ""), Some("a/b".to_string()));
        assert_eq!(strip_prefix("b", "a"), None);
    }
}
