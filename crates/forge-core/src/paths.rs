//! Mapping from spec module names to generated module names and file paths.

use std::path::PathBuf;

/// The dotted name of the generated counterpart of a spec module.
///
/// The generated-directory segment is inserted before the final component:
/// `pkg.auth` with dir `__generated__` becomes `pkg.__generated__.auth`.
#[must_use]
pub fn generated_module_name(spec_module: &str, generated_dir: &str) -> String {
    match spec_module.rsplit_once('.') {
        Some((prefix, last)) => format!("{prefix}.{generated_dir}.{last}"),
        None => format!("{generated_dir}.{spec_module}"),
    }
}

/// Relative on-disk path of a generated module within the package root.
#[must_use]
pub fn generated_relpath(spec_module: &str, generated_dir: &str) -> PathBuf {
    let generated = generated_module_name(spec_module, generated_dir);
    let mut path: PathBuf = generated.split('.').collect();
    path.set_extension("py");
    path
}
