//! Path-style specifier normalization shared by the bundled hook sets

use anyhow::{bail, Result};

/// Resolve `specifier` to a canonical name.
///
/// `./x` and `../x` resolve against the directory of `referrer_name`; any
/// other specifier is taken as already rooted. `.` and empty segments are
/// dropped and `..` pops a segment. The result never contains relative
/// segments, so feeding it back in (with any referrer) returns it unchanged.
pub fn normalize_specifier(specifier: &str, referrer_name: Option<&str>) -> Result<String> {
    if specifier.trim().is_empty() {
        bail!("empty module specifier");
    }

    let relative = specifier == "." || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../");

    let mut segments: Vec<&str> = Vec::new();
    if relative {
        if let Some(referrer) = referrer_name {
            // Directory of the referrer: everything before its last segment
            let mut parent: Vec<&str> = referrer.split('/').filter(|s| !s.is_empty()).collect();
            parent.pop();
            segments.extend(parent);
        }
    }

    for segment in specifier.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    bail!(
                        "specifier '{}' climbs above the root{}",
                        specifier,
                        referrer_name
                            .map(|r| format!(" when resolved from '{}'", r))
                            .unwrap_or_default()
                    );
                }
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        bail!("specifier '{}' does not name a module", specifier);
    }
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_to_referrer() {
        assert_eq!(normalize_specifier("./b", Some("lib/a")).unwrap(), "lib/b");
        assert_eq!(normalize_specifier("../c/d", Some("lib/x/a")).unwrap(), "lib/c/d");
        assert_eq!(normalize_specifier("./b", None).unwrap(), "b");
    }

    #[test]
    fn test_bare_specifiers_ignore_referrer() {
        assert_eq!(normalize_specifier("util", Some("lib/a")).unwrap(), "util");
        assert_eq!(normalize_specifier("/abs//x/./y", Some("lib/a")).unwrap(), "abs/x/y");
        assert_eq!(normalize_specifier("a/b/../c", None).unwrap(), "a/c");
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(normalize_specifier("", None).is_err());
        assert!(normalize_specifier("   ", None).is_err());
        assert!(normalize_specifier("../x", Some("a")).is_err());
        assert!(normalize_specifier("a/..", None).is_err());
    }

    #[test]
    fn test_idempotent() {
        let once = normalize_specifier("../shared/./x", Some("app/main/entry")).unwrap();
        assert_eq!(once, "app/shared/x");
        assert_eq!(normalize_specifier(&once, Some("app/main/entry")).unwrap(), once);
        assert_eq!(normalize_specifier(&once, None).unwrap(), once);
    }
}
