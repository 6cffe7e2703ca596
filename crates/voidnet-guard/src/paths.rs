//! Host mount path helpers.

/// Extract the host side of a short-syntax volume entry (`host:container[:mode]`).
pub fn host_side(entry: &str) -> &str {
    entry.split(':').next().unwrap_or(entry)
}

/// Textual allow rule: host path starts with `/tmp` or `./`.
pub fn is_allowed_prefix(host: &str) -> bool {
    host.starts_with("/tmp") || host.starts_with("./")
}

/// Lexically normalize a path, resolving `.` and `..` components.
///
/// Returns `None` when a `..` climbs above the starting point of a relative
/// path, or above `/` for an absolute one.
pub fn normalize(path: &str) -> Option<String> {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    Some(if absolute { format!("/{joined}") } else { format!("./{joined}") })
}

/// Strict allow rule: the canonical path stays inside `/tmp` or the
/// capsule's own checkout.
pub fn is_allowed_canonical(host: &str) -> bool {
    if !host.starts_with('/') && !host.starts_with("./") {
        return false;
    }
    match normalize(host) {
        Some(canonical) => {
            canonical == "/tmp" || canonical.starts_with("/tmp/") || canonical.starts_with("./")
        }
        None => false,
    }
}
