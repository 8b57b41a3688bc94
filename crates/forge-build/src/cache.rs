//! Content-addressed response cache.
//!
//! Entries are JSON files under `.forge/cache/<key[..2]>/<key>.json`, keyed
//! by a SHA-256 hash of the full generation context plus model and provider.
//! Disk failures degrade to cache misses; writes are best-effort.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use forge_gen::ModuleContext;

/// A single cached generation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source: String,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub cached_at: i64,
}

/// Deterministic cache key over everything that influences generation.
///
/// Fields are hashed NUL-separated; mapping fields are serialized with keys
/// sorted so iteration order never leaks into the key.
#[must_use]
pub fn cache_key(ctx: &ModuleContext, model: &str, provider: &str) -> String {
    fn feed_map<K: ToString, V: AsRef<str>>(hasher: &mut Sha256, map: &BTreeMap<K, V>) {
        let sorted: BTreeMap<String, &str> = map
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_ref()))
            .collect();
        let json = serde_json::to_string(&sorted).unwrap_or_default();
        hasher.update(json.as_bytes());
        hasher.update([0u8]);
    }

    let mut hasher = Sha256::new();
    for field in [
        provider,
        model,
        ctx.kind.as_str(),
        &ctx.spec_module,
        &ctx.generated_module,
    ] {
        hasher.update(field.as_bytes());
        hasher.update([0u8]);
    }
    let names = serde_json::to_string(&ctx.expected_names).unwrap_or_default();
    hasher.update(names.as_bytes());
    hasher.update([0u8]);
    feed_map(&mut hasher, &ctx.spec_sources);
    feed_map(&mut hasher, &ctx.prompts);
    feed_map(&mut hasher, &ctx.dependency_apis);
    feed_map(&mut hasher, &ctx.dependency_sources);
    hasher.update(ctx.shared_guidance.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// File-backed response cache with an in-process memo.
///
/// Safe to call from concurrent generation tasks.
pub struct ResponseCache {
    cache_dir: PathBuf,
    enabled: bool,
    memo: Mutex<BTreeMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cache statistics for `specforge cache info`.
#[derive(Debug, Serialize)]
pub struct CacheInfo {
    pub entries: usize,
    pub size_bytes: u64,
    pub path: String,
}

impl ResponseCache {
    #[must_use]
    pub fn new(cache_dir: PathBuf, enabled: bool) -> Self {
        Self {
            cache_dir,
            enabled,
            memo: Mutex::new(BTreeMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let shard = &key[..key.len().min(2)];
        self.cache_dir.join(shard).join(format!("{key}.json"))
    }

    /// Look up a key; memo first, then disk. Corrupt entries count as misses.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        if !self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if let Some(entry) = self.memo.lock().expect("cache memo poisoned").get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.clone());
        }

        let path = self.entry_path(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) => {
                    self.memo
                        .lock()
                        .expect("cache memo poisoned")
                        .insert(key.to_string(), entry.clone());
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some(entry)
                }
                Err(err) => {
                    tracing::debug!(key = &key[..12.min(key.len())], %err, "corrupt cache entry");
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Err(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Best-effort write; disk failure is logged and swallowed.
    pub fn put(&self, key: &str, entry: CacheEntry) {
        if !self.enabled {
            return;
        }
        self.memo
            .lock()
            .expect("cache memo poisoned")
            .insert(key.to_string(), entry.clone());

        let path = self.entry_path(key);
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let raw = serde_json::to_string(&entry)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            std::fs::write(&path, raw)
        };
        if let Err(err) = write() {
            tracing::debug!(key = &key[..12.min(key.len())], %err, "cache write failed");
        }
    }

    /// Count entries and bytes on disk.
    #[must_use]
    pub fn info(&self) -> CacheInfo {
        let mut entries = 0;
        let mut size_bytes = 0;
        if self.cache_dir.is_dir() {
            for entry in json_entries(&self.cache_dir) {
                entries += 1;
                if let Ok(meta) = entry.metadata() {
                    size_bytes += meta.len();
                }
            }
        }
        CacheInfo {
            entries,
            size_bytes,
            path: self.cache_dir.display().to_string(),
        }
    }

    /// Remove every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        self.memo.lock().expect("cache memo poisoned").clear();
        if !self.cache_dir.is_dir() {
            return 0;
        }
        let count = json_entries(&self.cache_dir).count();
        let _ = std::fs::remove_dir_all(&self.cache_dir);
        count
    }

    /// Short human-readable key prefix for log lines.
    #[must_use]
    pub fn short_key(key: &str) -> String {
        let mut out = String::new();
        let _ = write!(out, "{}", &key[..12.min(key.len())]);
        out
    }
}

fn json_entries(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> + '_ {
    walkdir::WalkDir::new(dir)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_type().is_file() && e.path().extension().is_some_and(|x| x == "json")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::SpecRef;
    use forge_gen::ContextKind;

    fn basic_ctx() -> ModuleContext {
        let mut spec_sources = BTreeMap::new();
        spec_sources.insert(
            SpecRef::parse("pkg.auth:login").unwrap(),
            "def login(): ...".to_string(),
        );
        ModuleContext {
            kind: ContextKind::Build,
            spec_module: "pkg.auth".into(),
            generated_module: "pkg.__generated__.auth".into(),
            expected_names: vec!["login".into()],
            spec_sources,
            prompts: BTreeMap::new(),
            dependency_apis: BTreeMap::new(),
            dependency_sources: BTreeMap::new(),
            shared_guidance: String::new(),
        }
    }

    fn entry(source: &str) -> CacheEntry {
        CacheEntry {
            source: source.to_string(),
            prompt_tokens: 10,
            completion_tokens: 5,
            model: "gpt-4.1-mini".into(),
            provider: "openai".into(),
            cached_at: 1_700_000_000,
        }
    }

    #[test]
    fn key_is_stable_for_identical_inputs() {
        let a = cache_key(&basic_ctx(), "gpt-4.1-mini", "openai");
        let b = cache_key(&basic_ctx(), "gpt-4.1-mini", "openai");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn key_changes_with_every_field() {
        let base = cache_key(&basic_ctx(), "gpt-4.1-mini", "openai");

        assert_ne!(base, cache_key(&basic_ctx(), "gpt-4.1", "openai"));
        assert_ne!(base, cache_key(&basic_ctx(), "gpt-4.1-mini", "anthropic"));

        let mut ctx = basic_ctx();
        ctx.kind = ContextKind::Test;
        assert_ne!(base, cache_key(&ctx, "gpt-4.1-mini", "openai"));

        let mut ctx = basic_ctx();
        ctx.spec_module = "pkg.other".into();
        assert_ne!(base, cache_key(&ctx, "gpt-4.1-mini", "openai"));

        let mut ctx = basic_ctx();
        ctx.generated_module = "pkg.__generated__.other".into();
        assert_ne!(base, cache_key(&ctx, "gpt-4.1-mini", "openai"));

        let mut ctx = basic_ctx();
        ctx.expected_names.push("logout".into());
        assert_ne!(base, cache_key(&ctx, "gpt-4.1-mini", "openai"));

        let mut ctx = basic_ctx();
        ctx.spec_sources
            .insert(SpecRef::parse("pkg.auth:logout").unwrap(), "x".into());
        assert_ne!(base, cache_key(&ctx, "gpt-4.1-mini", "openai"));

        let mut ctx = basic_ctx();
        ctx.prompts
            .insert(SpecRef::parse("pkg.auth:login").unwrap(), "hint".into());
        assert_ne!(base, cache_key(&ctx, "gpt-4.1-mini", "openai"));

        let mut ctx = basic_ctx();
        ctx.dependency_apis
            .insert(SpecRef::parse("pkg.db:query").unwrap(), "def query(): ...".into());
        assert_ne!(base, cache_key(&ctx, "gpt-4.1-mini", "openai"));

        let mut ctx = basic_ctx();
        ctx.dependency_sources
            .insert("pkg.db".into(), "x = 1".into());
        assert_ne!(base, cache_key(&ctx, "gpt-4.1-mini", "openai"));

        let mut ctx = basic_ctx();
        ctx.shared_guidance = "prefer stdlib".into();
        assert_ne!(base, cache_key(&ctx, "gpt-4.1-mini", "openai"));
    }

    #[test]
    fn get_and_put_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let key = cache_key(&basic_ctx(), "gpt-4.1-mini", "openai");

        let cache = ResponseCache::new(dir.path().to_path_buf(), true);
        assert!(cache.get(&key).is_none());
        cache.put(&key, entry("def login(): return True"));

        // fresh instance, no memo
        let cache2 = ResponseCache::new(dir.path().to_path_buf(), true);
        let got = cache2.get(&key).unwrap();
        assert_eq!(got.source, "def login(): return True");
        assert_eq!(cache2.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path().to_path_buf(), true);
        let key = "ab".repeat(32);
        let path = dir.path().join("ab").join(format!("{key}.json"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        assert!(cache.get(&key).is_none());
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn disabled_cache_never_hits_or_persists() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path().to_path_buf(), false);
        let key = "cd".repeat(32);
        cache.put(&key, entry("x = 1"));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.info().entries, 0);
    }

    #[test]
    fn clear_reports_removed_count() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path().to_path_buf(), true);
        cache.put(&"aa".repeat(32), entry("x = 1"));
        cache.put(&"bb".repeat(32), entry("y = 2"));

        assert_eq!(cache.info().entries, 2);
        assert!(cache.info().size_bytes > 0);
        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.info().entries, 0);
        assert!(cache.get(&"aa".repeat(32)).is_none());
    }
}
