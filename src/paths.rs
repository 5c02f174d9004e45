use crate::error::PathError;

/// Canonicalize an untrusted entry path into a relative, `/`-separated path.
///
/// Backslashes become slashes, a single leading `./` is dropped, repeated slashes
/// collapse, and surrounding whitespace is trimmed. The result never contains an
/// empty, `.` or `..` segment and never starts with `/`.
pub fn normalize_path(input: &str) -> Result<String, PathError> {
    let slashed = input.replace('\\', "/");
    let stripped = slashed.strip_prefix("./").unwrap_or(&slashed);

    let mut collapsed = String::with_capacity(stripped.len());
    let mut prev_slash = false;
    for ch in stripped.chars() {
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        collapsed.push(ch);
    }

    let normalized = collapsed.trim();
    if normalized.is_empty() {
        return Err(PathError::Empty);
    }
    if normalized.starts_with('/') {
        return Err(PathError::Absolute(input.to_string()));
    }
    if normalized
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(PathError::UnsafeSegment(input.to_string()));
    }

    Ok(normalized.to_string())
}

/// True when any segment of the path starts with a dot.
pub fn is_hidden(path: &str) -> bool {
    path.split('/').any(|seg| seg.starts_with('.'))
}

/// Path with its last segment removed; `None` for root-level paths.
pub fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(head, _)| head)
}

/// Last segment of the path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Number of segments below the root (`a` -> 0, `a/b` -> 1).
pub fn depth(path: &str) -> usize {
    path.matches('/').count()
}
