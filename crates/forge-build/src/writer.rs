//! Atomic artifact writes.
//!
//! Artifacts land under the package root at the module's generated relative
//! path, prefixed with a digest header. Writes go through a temp file in the
//! destination directory followed by an atomic rename, so a crashed or
//! cancelled build never leaves a partially written artifact behind.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use forge_core::header::{HeaderFields, format_header};
use forge_core::paths::generated_relpath;

const AGENTS_NOTICE: &str = "\
# Generated code

Files in this directory are produced by specforge from spec stubs.
Do not edit them by hand; change the specs and rebuild instead.
";

/// Writes generated artifacts beneath a package root.
pub struct ArtifactWriter {
    package_root: PathBuf,
    generated_dir: String,
}

impl ArtifactWriter {
    #[must_use]
    pub fn new(package_root: PathBuf, generated_dir: String) -> Self {
        Self {
            package_root,
            generated_dir,
        }
    }

    /// Absolute path of a module's artifact.
    #[must_use]
    pub fn artifact_path(&self, module: &str) -> PathBuf {
        self.package_root
            .join(generated_relpath(module, &self.generated_dir))
    }

    /// Write one module's artifact with its header, atomically.
    ///
    /// Ensures `__init__.py` markers and the generated-directory notice
    /// exist, and refuses paths that escape the package root.
    ///
    /// # Errors
    ///
    /// Fails on path escape or any filesystem error.
    pub fn write_module(
        &self,
        module: &str,
        source: &str,
        header: &HeaderFields,
    ) -> anyhow::Result<PathBuf> {
        let rel = generated_relpath(module, &self.generated_dir);
        if rel
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            anyhow::bail!(
                "refusing to write {} outside package root {}",
                rel.display(),
                self.package_root.display()
            );
        }
        let target = self.package_root.join(&rel);
        let parent = target
            .parent()
            .ok_or_else(|| anyhow::anyhow!("artifact path {} has no parent", target.display()))?;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
        self.ensure_package_markers(&rel)?;
        self.ensure_notice(parent)?;

        let contents = format!("{}{source}", format_header(header));
        atomic_write(&target, &contents)
            .with_context(|| format!("writing {}", target.display()))?;
        tracing::debug!(module, path = %target.display(), "wrote artifact");
        Ok(target)
    }

    /// Drop `__init__.py` into each package directory on the artifact's path.
    /// Existing markers are left alone.
    fn ensure_package_markers(&self, rel: &Path) -> anyhow::Result<()> {
        let mut dir = self.package_root.clone();
        for component in rel.components() {
            let std::path::Component::Normal(part) = component else {
                continue;
            };
            let part_path = Path::new(part);
            if part_path.extension().is_some_and(|e| e == "py") {
                break;
            }
            dir = dir.join(part);
            let marker = dir.join("__init__.py");
            if !marker.exists() {
                std::fs::write(&marker, "")
                    .with_context(|| format!("creating {}", marker.display()))?;
            }
        }
        Ok(())
    }

    fn ensure_notice(&self, generated_parent: &Path) -> anyhow::Result<()> {
        let notice = generated_parent.join("AGENTS.md");
        if !notice.exists() {
            std::fs::write(&notice, AGENTS_NOTICE)
                .with_context(|| format!("creating {}", notice.display()))?;
        }
        Ok(())
    }
}

/// Write-temp-then-rename in the destination directory, with an fsync before
/// the rename.
fn atomic_write(target: &Path, contents: &str) -> anyhow::Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| anyhow::anyhow!("no parent directory for {}", target.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(target)
        .map_err(|e| anyhow::anyhow!("renaming into place: {}", e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(digest: &str) -> HeaderFields {
        HeaderFields {
            tool_version: "0.3.1".into(),
            kind: "build".into(),
            source_module: "pkg.auth".into(),
            module_digest: digest.to_string(),
            spec_refs: vec!["pkg.auth:login".into()],
        }
    }

    #[test]
    fn writes_artifact_with_header_and_markers() {
        let root = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(root.path().to_path_buf(), "__generated__".into());
        let path = writer
            .write_module("pkg.auth", "def login():\n    return True\n", &header("abc123"))
            .unwrap();

        assert_eq!(
            path,
            root.path().join("pkg/__generated__/auth.py")
        );
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("# @generated by specforge"));
        assert!(contents.contains("# digest: sha256:abc123"));
        assert!(contents.contains("def login"));
        assert!(root.path().join("pkg/__init__.py").exists());
        assert!(root.path().join("pkg/__generated__/__init__.py").exists());
        assert!(root.path().join("pkg/__generated__/AGENTS.md").exists());
    }

    #[test]
    fn rewrites_replace_previous_contents() {
        let root = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(root.path().to_path_buf(), "__generated__".into());
        writer.write_module("mod", "x = 1\n", &header("one")).unwrap();
        let path = writer.write_module("mod", "x = 2\n", &header("two")).unwrap();

        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("sha256:two"));
        assert!(contents.contains("x = 2"));
        assert!(!contents.contains("x = 1"));
    }

    #[test]
    fn existing_init_markers_are_preserved() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("pkg")).unwrap();
        std::fs::write(root.path().join("pkg/__init__.py"), "VERSION = 1\n").unwrap();

        let writer = ArtifactWriter::new(root.path().to_path_buf(), "__generated__".into());
        writer.write_module("pkg.auth", "y = 1\n", &header("d")).unwrap();

        let marker = std::fs::read_to_string(root.path().join("pkg/__init__.py")).unwrap();
        assert_eq!(marker, "VERSION = 1\n");
    }
}
