//! Source Resolution - Template Name to Source Text
//!
//! Resolvers map a path-like template name to raw source text and report
//! change. The pipeline treats a missing source as fatal for that unit and
//! `has_changed` as advisory staleness input.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::hashing;

pub trait SourceResolver: Send + Sync {
    /// Raw source text for `name`, or None when the template does not exist.
    fn resolve(&self, name: &str) -> Option<String>;

    /// Has the source behind `name` changed since it was last resolved?
    fn has_changed(&self, name: &str) -> bool;

    /// All template names this resolver can serve. Resolvers that cannot
    /// enumerate return an empty list.
    fn resolve_all_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Resolves template names against files under a root directory. Change
/// detection compares a SHA-256 fingerprint of the file's current content
/// against the fingerprint recorded at the last resolve.
pub struct DirectoryResolver {
    root: PathBuf,
    extension: String,
    fingerprints: RwLock<HashMap<String, String>>,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: "stc".to_string(),
            fingerprints: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    fn read(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.root.join(name)).ok()
    }

    fn collect_names(&self, dir: &Path, prefix: &str, names: &mut Vec<String>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                let nested = if prefix.is_empty() {
                    format!("{}/", file_name)
                } else {
                    format!("{}{}/", prefix, file_name)
                };
                self.collect_names(&path, &nested, names);
            } else if path.extension().map_or(false, |e| e == self.extension.as_str()) {
                names.push(format!("{}{}", prefix, file_name));
            }
        }
    }
}

impl SourceResolver for DirectoryResolver {
    fn resolve(&self, name: &str) -> Option<String> {
        let source = self.read(name)?;
        self.fingerprints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), hashing::fingerprint(&source));
        Some(source)
    }

    fn has_changed(&self, name: &str) -> bool {
        let recorded = self
            .fingerprints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        let Some(recorded) = recorded else {
            // Never resolved here, so nothing generated from it is stale.
            return false;
        };
        match self.read(name) {
            Some(source) => hashing::fingerprint(&source) != recorded,
            None => true,
        }
    }

    fn resolve_all_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_names(&self.root, "", &mut names);
        names.sort();
        names
    }
}

/// In-memory resolver with explicit change flags. Used by tests and by
/// embedders that source templates from somewhere other than disk.
#[derive(Default)]
pub struct MemoryResolver {
    sources: RwLock<HashMap<String, String>>,
    changed: RwLock<HashSet<String>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, source: impl Into<String>) {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), source.into());
    }

    pub fn set_changed(&self, name: &str, changed: bool) {
        let mut set = self
            .changed
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if changed {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }
}

impl SourceResolver for MemoryResolver {
    fn resolve(&self, name: &str) -> Option<String> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn has_changed(&self, name: &str) -> bool {
        self.changed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    fn resolve_all_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_resolver_roundtrip() {
        let resolver = MemoryResolver::new();
        resolver.insert("page.stc", "hello");
        assert_eq!(resolver.resolve("page.stc").as_deref(), Some("hello"));
        assert_eq!(resolver.resolve("missing.stc"), None);
    }

    #[test]
    fn test_memory_resolver_change_flags() {
        let resolver = MemoryResolver::new();
        resolver.insert("page.stc", "hello");
        assert!(!resolver.has_changed("page.stc"));
        resolver.set_changed("page.stc", true);
        assert!(resolver.has_changed("page.stc"));
        resolver.set_changed("page.stc", false);
        assert!(!resolver.has_changed("page.stc"));
    }

    #[test]
    fn test_directory_resolver_detects_content_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.stc");
        fs::write(&path, "v1").unwrap();

        let resolver = DirectoryResolver::new(dir.path());
        assert_eq!(resolver.resolve("page.stc").as_deref(), Some("v1"));
        assert!(!resolver.has_changed("page.stc"));

        fs::write(&path, "v2").unwrap();
        assert!(resolver.has_changed("page.stc"));

        // Re-resolving records the new fingerprint.
        assert_eq!(resolver.resolve("page.stc").as_deref(), Some("v2"));
        assert!(!resolver.has_changed("page.stc"));
    }

    #[test]
    fn test_directory_resolver_deleted_file_is_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.stc");
        fs::write(&path, "v1").unwrap();

        let resolver = DirectoryResolver::new(dir.path());
        resolver.resolve("page.stc");
        fs::remove_file(&path).unwrap();
        assert!(resolver.has_changed("page.stc"));
    }

    #[test]
    fn test_directory_resolver_enumerates_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tag")).unwrap();
        fs::write(dir.path().join("page.stc"), "").unwrap();
        fs::write(dir.path().join("tag/nav.stc"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let resolver = DirectoryResolver::new(dir.path());
        assert_eq!(
            resolver.resolve_all_names(),
            vec!["page.stc".to_string(), "tag/nav.stc".to_string()]
        );
    }
}
