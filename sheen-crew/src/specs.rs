//! Spec resolution.
//!
//! A machine names its spec by reference. [`SpecLibrary`] resolves references
//! against in-memory templates first, then files under a root directory.
//! Every occurrence of [`ID_PLACEHOLDER`] in the template text is replaced
//! with the machine id before parsing. Parsed specs are cached per
//! (reference, machine id) together with the checksum of the expanded text.
//! An edited file is picked up on the next dispatch and replaces the stale
//! entry.

use crate::error::CrewError;
use dashmap::DashMap;
use serde_json::Value;
use sheen_core::Spec;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Token replaced with the machine id in spec templates.
pub const ID_PLACEHOLDER: &str = "${id}";

/// Resolves a machine's spec.
pub trait SpecSource: Send + Sync {
    fn resolve(&self, reference: &str, machine_id: &str) -> Result<Arc<Spec>, CrewError>;
}

/// Spec templates from memory and disk, with a parsed-spec cache.
pub struct SpecLibrary {
    dir: PathBuf,
    templates: DashMap<String, String>,
    cache: Option<DashMap<(String, String), (u32, Arc<Spec>)>>,
}

impl SpecLibrary {
    /// Creates a library rooted at `dir`, with caching enabled.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            templates: DashMap::new(),
            cache: Some(DashMap::new()),
        }
    }

    /// Disables the parsed-spec cache.
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Registers template text under `reference`. Registered templates take
    /// precedence over files.
    pub fn insert_template(&self, reference: impl Into<String>, text: impl Into<String>) {
        self.templates.insert(reference.into(), text.into());
    }

    /// Registers a JSON spec under `reference`.
    pub fn insert(&self, reference: impl Into<String>, spec: &Value) {
        self.insert_template(reference, spec.to_string());
    }

    /// Number of parsed specs held in the cache.
    pub fn cached(&self) -> usize {
        self.cache.as_ref().map(DashMap::len).unwrap_or(0)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    fn path_of(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }

    fn template(&self, reference: &str) -> Result<String, CrewError> {
        if let Some(text) = self.templates.get(reference) {
            return Ok(text.value().clone());
        }
        let path = self.path_of(reference);
        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CrewError::SpecNotFound {
                reference: reference.to_string(),
            },
            _ => CrewError::SpecLoad {
                reference: reference.to_string(),
                reason: format!("{}: {}", path.display(), e),
            },
        })
    }

    fn parse(&self, reference: &str, text: &str) -> Result<Spec, CrewError> {
        let is_yaml = matches!(
            Path::new(reference).extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let value: Value = if is_yaml {
            serde_yaml::from_str(text).map_err(|e| CrewError::SpecLoad {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?
        } else {
            serde_json::from_str(text).map_err(|e| CrewError::SpecLoad {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?
        };

        let name = Path::new(reference)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(reference);
        Ok(Spec::from_json(name, &value)?)
    }
}

impl SpecSource for SpecLibrary {
    fn resolve(&self, reference: &str, machine_id: &str) -> Result<Arc<Spec>, CrewError> {
        let text = self.template(reference)?.replace(ID_PLACEHOLDER, machine_id);

        let Some(cache) = &self.cache else {
            return Ok(Arc::new(self.parse(reference, &text)?));
        };

        let key = (reference.to_string(), machine_id.to_string());
        let checksum = crc32c::crc32c(text.as_bytes());
        if let Some(entry) = cache.get(&key) {
            let (cached, spec) = entry.value();
            if *cached == checksum {
                return Ok(spec.clone());
            }
        }

        let spec = Arc::new(self.parse(reference, &text)?);
        tracing::debug!(reference, machine_id, checksum = %spec.checksum, "spec loaded");
        cache.insert(key, (checksum, spec.clone()));
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn door() -> Value {
        json!({"nodes": {
            "start": {"branching": {"type": "message", "branches": [
                {"pattern": {"to": "${id}", "event": "open"}, "target": "open"}
            ]}},
            "open": {}
        }})
    }

    #[test]
    fn test_template_substitutes_id() {
        let library = SpecLibrary::new(".");
        library.insert("door", &door());

        let spec = library.resolve("door", "front").unwrap();
        let pattern = spec.node("start").unwrap().branching.as_ref().unwrap().branches[0]
            .pattern
            .clone()
            .unwrap();
        assert_eq!(pattern, json!({"to": "front", "event": "open"}));
    }

    #[test]
    fn test_cache_keyed_by_machine() {
        let library = SpecLibrary::new(".");
        library.insert("door", &door());

        let a1 = library.resolve("door", "a").unwrap();
        let a2 = library.resolve("door", "a").unwrap();
        let b = library.resolve("door", "b").unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(library.cached(), 2);

        library.clear_cache();
        assert_eq!(library.cached(), 0);
    }

    #[test]
    fn test_uncached() {
        let library = SpecLibrary::new(".").without_cache();
        library.insert("door", &door());
        let a1 = library.resolve("door", "a").unwrap();
        let a2 = library.resolve("door", "a").unwrap();
        assert!(!Arc::ptr_eq(&a1, &a2));
        assert_eq!(library.cached(), 0);
    }

    #[test]
    fn test_files_json_and_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("door.json"), door().to_string()).unwrap();
        std::fs::write(
            dir.path().join("lamp.yaml"),
            "nodes:\n  start:\n    branching:\n      branches:\n        - target: lit\n  lit: {}\n",
        )
        .unwrap();

        let library = SpecLibrary::new(dir.path());
        let door = library.resolve("door.json", "d1").unwrap();
        assert_eq!(door.name, "door");
        let lamp = library.resolve("lamp.yaml", "l1").unwrap();
        assert!(lamp.has_node("lit"));
    }

    #[test]
    fn test_file_edit_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, json!({"nodes": {"start": {}}}).to_string()).unwrap();

        let library = SpecLibrary::new(dir.path());
        assert!(!library.resolve("s.json", "m").unwrap().has_node("extra"));

        std::fs::write(&path, json!({"nodes": {"start": {}, "extra": {}}}).to_string()).unwrap();
        assert!(library.resolve("s.json", "m").unwrap().has_node("extra"));
    }

    #[test]
    fn test_edits_replace_stale_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let library = SpecLibrary::new(dir.path());

        for i in 0..5 {
            let mut nodes = serde_json::Map::new();
            nodes.insert("start".to_string(), json!({}));
            nodes.insert(format!("n{}", i), json!({}));
            std::fs::write(&path, json!({ "nodes": nodes }).to_string()).unwrap();

            let spec = library.resolve("s.json", "m").unwrap();
            assert!(spec.has_node(&format!("n{}", i)));
            assert_eq!(library.cached(), 1);
        }
    }

    #[test]
    fn test_resolution_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(
            dir.path().join("dangling.json"),
            json!({"nodes": {"start": {"branching": {"branches": [{"target": "nowhere"}]}}}}).to_string(),
        )
        .unwrap();

        let library = SpecLibrary::new(dir.path());
        let err = library.resolve("missing.json", "m").unwrap_err();
        assert_eq!(err.error_code(), "SPEC_NOT_FOUND");

        let err = library.resolve("broken.json", "m").unwrap_err();
        assert_eq!(err.error_code(), "SPEC_LOAD_FAILED");

        let err = library.resolve("dangling.json", "m").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TARGET");
    }
}
