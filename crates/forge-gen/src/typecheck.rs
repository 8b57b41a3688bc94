//! External type-checker validation stage.
//!
//! Writes the candidate source into a scratch copy of the project and runs a
//! configurable checker command over it. Diagnostics that only complain about
//! unresolved imports are tolerated, since sibling generated modules may not
//! exist yet while a build is in flight.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context as _;
use tokio::process::Command;

use crate::backend::{ExtraValidator, ValidateFuture};

const CHECK_TIMEOUT: Duration = Duration::from_secs(20);
const SNIPPET_LINES: usize = 16;

/// Runs a type checker over candidate source in a scratch directory.
pub struct TypeCheckValidator {
    command: Vec<String>,
    project_root: PathBuf,
}

impl TypeCheckValidator {
    /// `command` is the checker argv prefix; the scratch file path is
    /// appended to it. `project_root` is copied alongside the candidate so
    /// already-written modules resolve.
    #[must_use]
    pub fn new(command: Vec<String>, project_root: PathBuf) -> Self {
        Self {
            command,
            project_root,
        }
    }

    async fn run_check(&self, source: &str, module_name: &str) -> anyhow::Result<Vec<String>> {
        let scratch = tempfile::tempdir().context("creating type-check scratch directory")?;
        copy_python_tree(&self.project_root, scratch.path())?;

        let rel = module_path(module_name);
        let target = scratch.path().join(&rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&target, source).with_context(|| format!("writing {}", target.display()))?;

        let Some((program, args)) = self.command.split_first() else {
            anyhow::bail!("type-check command is empty");
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&target)
            .current_dir(scratch.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(CHECK_TIMEOUT, cmd.output())
            .await
            .map_err(|_| anyhow::anyhow!("type check timed out after {CHECK_TIMEOUT:?}"))?
            .with_context(|| format!("running type checker {program:?}"))?;

        if output.status.success() {
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostics: Vec<&str> = stdout
            .lines()
            .chain(stderr.lines())
            .filter(|l| !l.trim().is_empty())
            .collect();

        if !diagnostics.is_empty() && diagnostics.iter().all(|l| is_unresolved_import(l)) {
            tracing::debug!(module = %module_name, "ignoring unresolved-import diagnostics");
            return Ok(Vec::new());
        }

        let snippet: Vec<&str> = diagnostics.iter().take(SNIPPET_LINES).copied().collect();
        Ok(vec![format!(
            "Type check failed for module {module_name}:\n{}",
            snippet.join("\n")
        )])
    }
}

impl ExtraValidator for TypeCheckValidator {
    fn check<'a>(&'a self, source: &'a str, module_name: &'a str) -> ValidateFuture<'a> {
        Box::pin(async move {
            match self.run_check(source, module_name).await {
                Ok(errors) => errors,
                Err(err) => vec![format!("Type check could not run: {err:#}")],
            }
        })
    }
}

fn module_path(module_name: &str) -> PathBuf {
    let mut path = PathBuf::new();
    let parts: Vec<&str> = module_name.split('.').collect();
    for part in &parts[..parts.len().saturating_sub(1)] {
        path.push(part);
    }
    if let Some(last) = parts.last() {
        path.push(format!("{last}.py"));
    }
    path
}

fn copy_python_tree(src: &Path, dst: &Path) -> anyhow::Result<()> {
    if !src.is_dir() {
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(src).into_iter().filter_map(Result::ok) {
        let rel = entry.path().strip_prefix(src).expect("walked under src");
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)
                .with_context(|| format!("creating {}", dest.display()))?;
        } else if entry.path().extension().is_some_and(|e| e == "py") {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::copy(entry.path(), &dest)
                .with_context(|| format!("copying {}", entry.path().display()))?;
        }
    }
    Ok(())
}

fn is_unresolved_import(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("unresolved-import")
        || lower.contains("unresolved import")
        || lower.contains("cannot be resolved")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_path_nests_packages() {
        assert_eq!(
            module_path("pkg.__generated__.auth"),
            PathBuf::from("pkg/__generated__/auth.py")
        );
        assert_eq!(module_path("single"), PathBuf::from("single.py"));
    }

    #[test]
    fn unresolved_import_lines_are_recognized() {
        assert!(is_unresolved_import(
            "error[unresolved-import] pkg/__generated__/auth.py:3: Cannot resolve `pkg.db`"
        ));
        assert!(!is_unresolved_import(
            "error[invalid-return-type] auth.py:9: expected `int`, found `None`"
        ));
    }

    #[tokio::test]
    async fn failing_command_produces_a_diagnostic_snippet() {
        let root = tempfile::tempdir().unwrap();
        let validator = TypeCheckValidator::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo 'error[invalid-return-type] boom'; exit 1; checked".to_string(),
            ],
            root.path().to_path_buf(),
        );
        let errors = validator.check("def f():\n    pass\n", "mod").await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("invalid-return-type"));
        assert!(errors[0].starts_with("Type check failed for module mod"));
    }

    #[tokio::test]
    async fn unresolved_import_only_output_is_tolerated() {
        let root = tempfile::tempdir().unwrap();
        let validator = TypeCheckValidator::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo 'error[unresolved-import] cannot find module'; exit 1; checked".to_string(),
            ],
            root.path().to_path_buf(),
        );
        let errors = validator.check("def f():\n    pass\n", "mod").await;
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn passing_command_yields_no_errors() {
        let root = tempfile::tempdir().unwrap();
        let validator =
            TypeCheckValidator::new(vec!["true".to_string()], root.path().to_path_buf());
        let errors = validator.check("x = 1\n", "mod").await;
        assert!(errors.is_empty());
    }
}
