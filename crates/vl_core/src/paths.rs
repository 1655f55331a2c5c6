//! Ledger paths are slash-separated, absolute and never end in `/`.

pub fn normalize_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 1);
    for part in raw.split('/').filter(|p| !p.is_empty()) {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

pub fn join_base(base: &str, relative: &str) -> String {
    normalize_path(&format!("{}/{}", base, relative))
}

/// Normalized prefix for a directory listing, always ending in `/`.
pub fn directory_prefix(raw: &str) -> String {
    let normalized = normalize_path(raw);
    if normalized.ends_with('/') {
        normalized
    } else {
        format!("{}/", normalized)
    }
}

pub fn base_name(path: &str) -> &str {
    path.rsplit('/').find(|p| !p.is_empty()).unwrap_or(path)
}

/// Object-store key for a ledger path; stores do not use a leading slash.
pub fn object_key(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

pub fn prefixed_key(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let key = object_key(path);
    if prefix.is_empty() {
        key
    } else {
        format!("{}/{}", prefix, key)
    }
}
