//! Lexical path handling.
//!
//! Signature records are keyed by (directory, filename) pairs, so every path
//! that enters the graph is canonicalized first; otherwise "foo/./bar" and
//! "foo/bar" would track separate records for the same file.

/// Lexically canonicalize a path, removing redundant components.
/// Does not touch the disk; only simplifies things like "foo/./bar" =>
/// "foo/bar".  These paths show up due to variable expansion in particular.
pub fn canon_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted && parts.is_empty() => {}
                _ => parts.push(".."),
            },
            _ => parts.push(comp),
        }
    }
    let mut out = String::with_capacity(path.len());
    if rooted {
        out.push('/');
    }
    out.push_str(&parts.join("/"));
    if out.is_empty() {
        out.push('.');
    }
    out
}

/// Split a canonical path into the (directory, filename) pair used to key
/// signature records.  Paths without a directory component map to ".".
pub fn split_dir_file(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => (".", path),
    }
}

/// The suffix (file extension, with leading dot) of a path's final
/// component, or "" if it has none.
pub fn suffix_of(path: &str) -> &str {
    let base = match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    };
    match base.rfind('.') {
        Some(idx) if idx > 0 => &base[idx..],
        _ => "",
    }
}

/// A path with its suffix (if any) removed.
pub fn strip_suffix(path: &str) -> &str {
    let suf = suffix_of(path);
    &path[..path.len() - suf.len()]
}
