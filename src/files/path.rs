//! Request path to filesystem path resolution.

use std::path::{Component, Path, PathBuf};

/// Why a request path could not be mapped below the document root.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("invalid percent-encoding")]
    BadEncoding,
    #[error("path contains a NUL byte")]
    Nul,
    #[error("path escapes the document root")]
    Traversal,
}

/// Decode `%XX` escapes. `+` is left alone; it only means space in query strings.
pub fn percent_decode(input: &str) -> Result<String, PathError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3).ok_or(PathError::BadEncoding)?;
                let hi = hex_value(hex[0]).ok_or(PathError::BadEncoding)?;
                let lo = hex_value(hex[1]).ok_or(PathError::BadEncoding)?;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| PathError::BadEncoding)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Map a decoded-or-not request path onto `root`.
///
/// Every segment must be a plain name; `..`, drive prefixes and NUL bytes are
/// rejected rather than normalized away.
pub fn resolve(root: &Path, request_path: &str) -> Result<PathBuf, PathError> {
    let decoded = percent_decode(request_path)?;
    if decoded.contains('\0') {
        return Err(PathError::Nul);
    }

    let mut resolved = root.to_path_buf();
    for segment in decoded.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment.contains('\\') {
            return Err(PathError::Traversal);
        }
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => resolved.push(name),
            _ => return Err(PathError::Traversal),
        }
    }
    Ok(resolved)
}
