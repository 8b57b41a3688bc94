//! Spec entries and the spec set loaded from a manifest.
//!
//! Discovery is an explicit pass: a manifest file (JSON) is parsed into a
//! [`SpecSet`] and handed to the scheduler as an argument. Nothing registers
//! itself through global state.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A reference to one spec: `module:qualname`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpecRef {
    /// Dotted module path owning the spec (e.g. `pkg.auth`).
    pub module: String,
    /// Qualified name within the module (e.g. `login` or `Service.get_user`).
    pub qualname: String,
}

impl SpecRef {
    pub fn new(module: impl Into<String>, qualname: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            qualname: qualname.into(),
        }
    }

    /// Parse a `module:qualname` string.
    pub fn parse(raw: &str) -> Result<Self> {
        let (module, qualname) = raw
            .split_once(':')
            .with_context(|| format!("invalid spec ref {raw:?}: expected 'module:qualname'"))?;
        if module.is_empty() || qualname.is_empty() {
            anyhow::bail!("invalid spec ref {raw:?}: empty module or qualname");
        }
        Ok(Self::new(module, qualname))
    }
}

impl fmt::Display for SpecRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.qualname)
    }
}

impl TryFrom<String> for SpecRef {
    type Error = anyhow::Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<SpecRef> for String {
    fn from(r: SpecRef) -> Self {
        r.to_string()
    }
}

/// What kind of artifact a spec entry contributes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecKind {
    /// An implementation stub to be built.
    #[default]
    Magic,
    /// A test stub, consumed by the parallel test pipeline.
    Test,
}

/// One declared specification: a docstring-annotated function/class stub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecEntry {
    /// What kind of spec this is.
    #[serde(default)]
    pub kind: SpecKind,
    /// Unique reference `module:qualname`.
    pub spec_ref: SpecRef,
    /// Dotted module path owning this entry.
    pub module: String,
    /// Qualified name of the stub.
    pub qualname: String,
    /// Owning class name for method specs (one level of nesting).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// Full source text of the stub (for methods: the enclosing class).
    pub source: String,
    /// Declared dependency refs (`module:qualname` strings).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<SpecRef>,
    /// Optional free-text guidance passed through to generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl SpecEntry {
    /// The output symbol this entry expects the generated module to define:
    /// the class name for method specs, otherwise the qualname itself.
    #[must_use]
    pub fn expected_name(&self) -> &str {
        self.class_name.as_deref().unwrap_or(&self.qualname)
    }
}

/// All spec entries for one build invocation, indexed by ref and by module.
#[derive(Debug, Clone, Default)]
pub struct SpecSet {
    /// Entry per spec ref.
    pub by_ref: BTreeMap<SpecRef, SpecEntry>,
    /// Entries grouped by owning module, in manifest order.
    pub by_module: BTreeMap<String, Vec<SpecRef>>,
}

impl SpecSet {
    /// Build a set from a collection of entries.
    ///
    /// # Errors
    ///
    /// Fails on duplicate spec refs or a ref whose module disagrees with the
    /// entry's `module` field.
    pub fn from_entries(entries: Vec<SpecEntry>) -> Result<Self> {
        let mut set = Self::default();
        for entry in entries {
            if entry.spec_ref.module != entry.module {
                anyhow::bail!(
                    "spec ref {} does not match owning module {}",
                    entry.spec_ref,
                    entry.module
                );
            }
            let r = entry.spec_ref.clone();
            if set.by_ref.contains_key(&r) {
                anyhow::bail!("duplicate spec ref {r}");
            }
            set.by_module
                .entry(entry.module.clone())
                .or_default()
                .push(r.clone());
            set.by_ref.insert(r, entry);
        }
        Ok(set)
    }

    /// Load a spec set from a JSON manifest (a list of entries).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read spec manifest {}", path.display()))?;
        let entries: Vec<SpecEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse spec manifest {}", path.display()))?;
        Self::from_entries(entries)
    }

    /// All module names covered by this set.
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.by_module.keys().map(String::as_str)
    }

    /// Entries belonging to one module.
    #[must_use]
    pub fn module_entries(&self, module: &str) -> Vec<&SpecEntry> {
        self.by_module
            .get(module)
            .map(|refs| refs.iter().filter_map(|r| self.by_ref.get(r)).collect())
            .unwrap_or_default()
    }

    /// Expected output symbols for a module's artifact.
    ///
    /// Method specs collapse to their owning class name, deduplicated while
    /// preserving first-seen order.
    #[must_use]
    pub fn expected_names(&self, module: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for entry in self.module_entries(module) {
            let name = entry.expected_name();
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(module: &str, qualname: &str) -> SpecEntry {
        SpecEntry {
            kind: SpecKind::Magic,
            spec_ref: SpecRef::new(module, qualname),
            module: module.to_string(),
            qualname: qualname.to_string(),
            class_name: None,
            source: format!("def {qualname}():\n    ..."),
            deps: Vec::new(),
            prompt: None,
        }
    }

    #[test]
    fn spec_ref_parse_roundtrip() {
        let r = SpecRef::parse("pkg.auth:Service.get_user").unwrap();
        assert_eq!(r.module, "pkg.auth");
        assert_eq!(r.qualname, "Service.get_user");
        assert_eq!(r.to_string(), "pkg.auth:Service.get_user");
    }

    #[test]
    fn spec_ref_parse_rejects_missing_colon() {
        assert!(SpecRef::parse("pkg.auth").is_err());
        assert!(SpecRef::parse(":x").is_err());
        assert!(SpecRef::parse("x:").is_err());
    }

    #[test]
    fn duplicate_refs_rejected() {
        let e1 = entry("pkg.a", "f");
        let e2 = entry("pkg.a", "f");
        assert!(SpecSet::from_entries(vec![e1, e2]).is_err());
    }

    #[test]
    fn method_specs_collapse_to_class_name() {
        let mut e1 = entry("pkg.m", "Service.get_user");
        e1.class_name = Some("Service".into());
        let mut e2 = entry("pkg.m", "Service.delete_user");
        e2.class_name = Some("Service".into());
        let e3 = entry("pkg.m", "helper");

        let set = SpecSet::from_entries(vec![e1, e2, e3]).unwrap();
        assert_eq!(set.expected_names("pkg.m"), vec!["Service", "helper"]);
    }

    #[test]
    fn manifest_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("specs.json");
        let entries = vec![entry("pkg.a", "f"), entry("pkg.b", "g")];
        std::fs::write(&path, serde_json::to_string(&entries).unwrap()).unwrap();

        let set = SpecSet::load(&path).unwrap();
        assert_eq!(set.by_ref.len(), 2);
        assert_eq!(set.module_names().collect::<Vec<_>>(), vec!["pkg.a", "pkg.b"]);
    }
}
