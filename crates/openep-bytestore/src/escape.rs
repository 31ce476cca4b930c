//! Object-key escaping
//!
//! A key is split on `/` and each component is percent-escaped so that the
//! on-disk path stays inside the bucket root no matter what the key text
//! contains. Bytes outside `[A-Za-z0-9._-]` are encoded as `%XX`; the
//! components `.` and `..` are encoded in full, and an empty component maps
//! to the marker `%E` (unreachable by normal encoding because `%` itself is
//! always encoded). Decoding is the exact inverse.

use openep_common::{Error, Result};

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-'
}

fn escape_component(component: &str) -> String {
    if component.is_empty() {
        return "%E".to_string();
    }
    if component == "." {
        return "%2E".to_string();
    }
    if component == ".." {
        return "%2E%2E".to_string();
    }

    let mut out = String::with_capacity(component.len());
    for &b in component.as_bytes() {
        if is_plain(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0f) as usize] as char);
        }
    }
    out
}

fn unescape_component(component: &str) -> Result<String> {
    if component == "%E" {
        return Ok(String::new());
    }

    let bytes = component.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = bytes
                    .get(i + 1)
                    .and_then(|b| (*b as char).to_digit(16))
                    .ok_or_else(|| Error::internal(format!("bad escape in {component:?}")))?;
                let lo = bytes
                    .get(i + 2)
                    .and_then(|b| (*b as char).to_digit(16))
                    .ok_or_else(|| Error::internal(format!("bad escape in {component:?}")))?;
                out.push(((hi << 4) | lo) as u8);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out).map_err(|_| Error::internal(format!("non-utf8 key in {component:?}")))
}

/// Escape a full object key into a bucket-relative path string
///
/// The result joins escaped components with `/` and never contains a `.`,
/// `..` or empty component, so joining it onto the bucket root cannot
/// traverse outside it.
#[must_use]
pub fn escape_key(key: &str) -> String {
    key.split('/')
        .map(escape_component)
        .collect::<Vec<_>>()
        .join("/")
}

/// Invert [`escape_key`]
pub fn unescape_key(path: &str) -> Result<String> {
    let components = path
        .split('/')
        .map(unescape_component)
        .collect::<Result<Vec<_>>>()?;
    Ok(components.join("/"))
}

/// Reject escaped paths that could still resolve outside the bucket root
///
/// Applied on the read side to stored directory entries, where a foreign
/// file could have been dropped into the tree out of band.
#[must_use]
pub fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.contains('\\')
        && !path.starts_with('/')
        && path
            .split('/')
            .all(|c| !c.is_empty() && c != "." && c != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(key: &str) {
        let escaped = escape_key(key);
        assert!(is_safe_relative(&escaped), "unsafe escape for {key:?}: {escaped:?}");
        assert_eq!(unescape_key(&escaped).unwrap(), key);
    }

    #[test]
    fn test_roundtrip_plain() {
        roundtrip("a.txt");
        roundtrip("x/y/z");
        roundtrip("deep/tree/with/many/levels/file.bin");
    }

    #[test]
    fn test_roundtrip_special() {
        roundtrip("with space");
        roundtrip("percent%sign");
        roundtrip("unicode-ключ/文件");
        roundtrip("trailing/");
        roundtrip("/leading");
        roundtrip("double//slash");
    }

    #[test]
    fn test_traversal_neutralised() {
        for key in ["../../etc/passwd", "..", "a/../b", "..\\windows", "/abs/path"] {
            let escaped = escape_key(key);
            assert!(is_safe_relative(&escaped), "{key:?} -> {escaped:?}");
            assert_eq!(unescape_key(&escaped).unwrap(), key);
        }
    }

    #[test]
    fn test_dot_components_encoded() {
        assert_eq!(escape_key(".."), "%2E%2E");
        assert_eq!(escape_key("a/./b"), "a/%2E/b");
        assert_eq!(escape_key("a//b"), "a/%E/b");
    }

    #[test]
    fn test_unescape_rejects_garbage() {
        assert!(unescape_key("a/%zz").is_err());
        assert!(unescape_key("a/%2").is_err());
    }
}
