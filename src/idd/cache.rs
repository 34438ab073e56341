//! Explicit schema-version cache.
//!
//! Schema parsing is expensive and a schema never changes for a given
//! version, so callers hold one [`IddCache`] for the lifetime of the
//! process (or test run) and pass it wherever models are loaded. There is
//! deliberately no process-global cache.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::SchemaParseError;
use crate::idd::{Idd, IddVersion};

/// A version-keyed cache of parsed schema dictionaries.
#[derive(Debug, Default)]
pub struct IddCache {
    by_version: HashMap<IddVersion, Arc<Idd>>,
}

impl IddCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached schema for `version`, if any.
    #[must_use]
    pub fn get(&self, version: IddVersion) -> Option<Arc<Idd>> {
        self.by_version.get(&version).cloned()
    }

    /// Returns the cached schema for the text's declared version, parsing
    /// and caching it on first sight.
    pub fn get_or_parse(&mut self, text: &str) -> Result<Arc<Idd>, SchemaParseError> {
        if let Some(version) = Idd::peek_version(text) {
            if let Some(idd) = self.by_version.get(&version) {
                return Ok(Arc::clone(idd));
            }
        }
        let idd = Arc::new(Idd::parse(text)?);
        self.by_version.insert(idd.version(), Arc::clone(&idd));
        Ok(idd)
    }

    /// File-reading variant of [`get_or_parse`](Self::get_or_parse).
    pub fn get_or_load(&mut self, path: impl AsRef<Path>) -> Result<Arc<Idd>, SchemaParseError> {
        let text = std::fs::read_to_string(path)?;
        self.get_or_parse(&text)
    }

    /// Number of cached schemas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_version.len()
    }

    /// Whether the cache holds no schemas.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_version.is_empty()
    }

    /// Drops every cached schema.
    pub fn clear(&mut self) {
        self.by_version.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const IDD_94: &str = "!IDD_Version 9.4.0\nZone,\n   A1, \\field Name\n";
    const IDD_95: &str = "!IDD_Version 9.5.0\nZone,\n   A1, \\field Name\n";

    #[test]
    fn test_cache_reuses_parsed_schema() {
        let mut cache = IddCache::new();
        let first = cache.get_or_parse(IDD_94).unwrap();
        let second = cache.get_or_parse(IDD_94).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_keyed_by_version() {
        let mut cache = IddCache::new();
        let a = cache.get_or_parse(IDD_94).unwrap();
        let b = cache.get_or_parse(IDD_95).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
        assert!(cache.get((9, 4, 0)).is_some());
        assert!(cache.get((9, 9, 0)).is_none());
    }

    #[test]
    fn test_cache_clear() {
        let mut cache = IddCache::new();
        cache.get_or_parse(IDD_94).unwrap();
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(IDD_94.as_bytes()).unwrap();

        let mut cache = IddCache::new();
        let idd = cache.get_or_load(file.path()).unwrap();
        assert_eq!(idd.version(), (9, 4, 0));
        assert_eq!(cache.len(), 1);
    }
}
