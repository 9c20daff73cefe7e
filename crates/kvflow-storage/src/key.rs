//! Key construction helpers

/// Join path segments into an absolute key
///
/// Leading and trailing slashes on each segment are ignored and empty
/// segments are skipped, so `key(&["/a/", "b"])` is `"/a/b"`.
pub fn key(segments: &[&str]) -> String {
    let mut out = String::new();
    for segment in segments {
        let segment = segment.trim_matches('/');
        if segment.is_empty() {
            continue;
        }
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Like [`key`] but always ends with `/`
///
/// Used for prefix scans so that `wf-1` never matches `wf-10`.
pub fn prefix(segments: &[&str]) -> String {
    let mut out = key(segments);
    if !out.ends_with('/') {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_join() {
        assert_eq!(key(&["root", "workflows", "a"]), "/root/workflows/a");
        assert_eq!(key(&["/root/", "", "a/"]), "/root/a");
        assert_eq!(key(&[]), "/");
    }

    #[test]
    fn test_prefix_has_trailing_slash() {
        assert_eq!(prefix(&["root", "wf-1"]), "/root/wf-1/");
        assert_eq!(prefix(&[]), "/");
    }
}
