//! Extension path helpers
//!
//! Extension paths are `/`-separated, absolute, and never end with a slash.
//! The root path is the empty string.

/// Normalize a path: collapse repeated separators, strip the trailing slash
/// and add a leading one. `"/"` and `""` both normalize to the root.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in segments(path) {
        out.push('/');
        out.push_str(segment);
    }
    out
}

/// Non-empty segments of a path
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Join a parent path and a child id
pub fn join(parent: &str, id: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), id)
}

/// True when `path` equals `root` or lies beneath it
pub fn is_within(path: &str, root: &str) -> bool {
    let path = path.trim_end_matches('/');
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return true;
    }
    path == root
        || (path.len() > root.len()
            && path.starts_with(root)
            && path.as_bytes()[root.len()] == b'/')
}

/// Parent path, or `None` for the root
pub fn parent(path: &str) -> Option<&str> {
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        return None;
    }
    Some(path.rfind('/').map_or("", |i| &path[..i]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("a/b"), "/a/b");
        assert_eq!(normalize("/a//b/"), "/a/b");
        assert_eq!(normalize("/"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/a/b", "/a"));
        assert!(is_within("/a", "/a"));
        assert!(!is_within("/ab", "/a"));
        assert!(!is_within("/a", "/a/b"));
        assert!(is_within("/anything", ""));
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent("/a/b"), Some("/a"));
        assert_eq!(parent("/a"), Some(""));
        assert_eq!(parent(""), None);
    }

    #[test]
    fn test_join() {
        assert_eq!(join("", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }
}
