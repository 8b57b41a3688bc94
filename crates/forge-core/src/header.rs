//! Generated-artifact header: the sole persistent staleness record.
//!
//! Every written artifact starts with a comment block embedding the tool
//! version, the module digest of the inputs that produced it, and the spec
//! refs it covers. Staleness detection parses the digest back out of the
//! file; there is no separate database.

/// Fields embedded in a generated-file header.
#[derive(Debug, Clone)]
pub struct HeaderFields {
    /// Version of the tool that produced the artifact.
    pub tool_version: String,
    /// Pipeline kind: `build` or `test`.
    pub kind: String,
    /// Spec module this artifact was generated from.
    pub source_module: String,
    /// Module digest (hex, no prefix) of the producing inputs.
    pub module_digest: String,
    /// Spec refs covered by the artifact.
    pub spec_refs: Vec<String>,
}

/// Render the header comment block (trailing newline included).
#[must_use]
pub fn format_header(fields: &HeaderFields) -> String {
    let mut lines = vec![
        format!(
            "# @generated by specforge {} -- do not edit",
            fields.tool_version
        ),
        format!("# kind: {}", fields.kind),
        format!("# source-module: {}", fields.source_module),
        format!("# digest: sha256:{}", fields.module_digest),
    ];
    if !fields.spec_refs.is_empty() {
        lines.push(format!("# spec-refs: {}", fields.spec_refs.join(", ")));
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Extract the digest recorded in an artifact's header, if any.
///
/// Only the leading comment block is scanned; the returned digest keeps
/// whatever prefix the header carried (normalize with [`normalize_digest`]).
#[must_use]
pub fn extract_module_digest(content: &str) -> Option<String> {
    for line in content.lines() {
        if !line.starts_with('#') {
            break;
        }
        if let Some(rest) = line.strip_prefix("# digest:") {
            let digest = rest.trim();
            if !digest.is_empty() {
                return Some(digest.to_string());
            }
        }
    }
    None
}

/// Strip an optional `sha256:` prefix so digests compare by value.
#[must_use]
pub fn normalize_digest(digest: &str) -> Option<&str> {
    let d = digest.strip_prefix("sha256:").unwrap_or(digest);
    if d.is_empty() { None } else { Some(d) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> HeaderFields {
        HeaderFields {
            tool_version: "0.3.1".into(),
            kind: "build".into(),
            source_module: "pkg.a".into(),
            module_digest: "ab".repeat(32),
            spec_refs: vec!["pkg.a:A".into(), "pkg.a:B".into()],
        }
    }

    #[test]
    fn header_roundtrips_digest() {
        let header = format_header(&fields());
        let content = format!("{header}\ndef A():\n    return 1\n");
        let extracted = extract_module_digest(&content).unwrap();
        assert_eq!(normalize_digest(&extracted), Some("ab".repeat(32).as_str()));
    }

    #[test]
    fn extraction_stops_at_first_code_line() {
        let content = "def f():\n    pass\n# digest: sha256:deadbeef\n";
        assert_eq!(extract_module_digest(content), None);
    }

    #[test]
    fn missing_digest_returns_none() {
        assert_eq!(extract_module_digest("# just a comment\n"), None);
        assert_eq!(normalize_digest("sha256:"), None);
    }

    #[test]
    fn header_lists_spec_refs() {
        let header = format_header(&fields());
        assert!(header.contains("# spec-refs: pkg.a:A, pkg.a:B"));
    }
}
