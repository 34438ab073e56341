//! Cross-record referential integrity.
//!
//! A [`Hook`] marks a field whose value is a reference target and
//! advertises one lookup key per reference name. A [`Link`] marks a field
//! whose value points at another record or table; it is resolved against
//! registered hooks purely by tag matching, never by declared foreign
//! keys. The [`RelationsManager`] is the global registry: it owns
//! uniqueness checking, resolution, and the source/target multimaps used
//! for cascade clearing and pointing/pointed traversal.
//!
//! Hooks and links never hold owning references to records. They carry
//! addresses (table index, record slot, field index) into the model's
//! arena, which keeps the otherwise cyclic object graph acyclic.

use std::collections::{HashMap, HashSet};

use crate::error::ReferentialError;

/// Address of a record inside the model arena.
///
/// `slot` is the record's stable slot id, which never changes even when
/// the record is re-keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordAddr {
    /// Index of the owning table in the model.
    pub table: usize,
    /// Stable slot id of the record within its table.
    pub slot: u64,
}

/// Address of a single field of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldAddr {
    /// The owning record.
    pub record: RecordAddr,
    /// Field index within the record.
    pub field: usize,
}

/// What a resolved link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTarget {
    /// A specific record, matched through a record-level hook.
    Record(RecordAddr),
    /// A whole table, matched through a class-level hook.
    Table(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TargetKey {
    Record(RecordAddr),
    Table(usize),
}

impl From<LinkTarget> for TargetKey {
    fn from(target: LinkTarget) -> Self {
        match target {
            LinkTarget::Record(addr) => Self::Record(addr),
            LinkTarget::Table(table) => Self::Table(table),
        }
    }
}

/// A reference-bearing field value.
///
/// Advertises one key per reference name: `(reference_name, value)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Hook {
    references: Vec<String>,
    value: String,
}

impl Hook {
    /// Creates a hook advertising `value` under each reference name.
    #[must_use]
    pub fn new(references: Vec<String>, value: impl Into<String>) -> Self {
        Self {
            references,
            value: value.into(),
        }
    }

    /// The stored reference value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The reference names this hook can be resolved under.
    #[must_use]
    pub fn references(&self) -> &[String] {
        &self.references
    }

    /// Lookup keys, one per reference name.
    pub fn keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.references
            .iter()
            .map(|r| (r.as_str(), self.value.as_str()))
    }
}

/// A pointer-bearing field value.
///
/// Holds the raw value and the reference names it may resolve under;
/// the resolved target lives in the [`RelationsManager`].
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    references: Vec<String>,
    value: String,
}

impl Link {
    /// Creates a link holding `value`, resolvable under `references`.
    #[must_use]
    pub fn new(references: Vec<String>, value: impl Into<String>) -> Self {
        Self {
            references,
            value: value.into(),
        }
    }

    /// The raw pointer value, as deserialized.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The reference names this link may resolve under.
    #[must_use]
    pub fn references(&self) -> &[String] {
        &self.references
    }
}

fn key(reference: &str, value: &str) -> (String, String) {
    // Matching is case-insensitive on both sides so a retaincase hook
    // still resolves against a folded link value and vice versa.
    (reference.to_lowercase(), value.to_lowercase())
}

/// Global registry of hooks and links.
#[derive(Debug, Default)]
pub struct RelationsManager {
    record_hooks: HashMap<(String, String), FieldAddr>,
    table_hooks: HashMap<(String, String), usize>,
    links_by_source: HashMap<FieldAddr, LinkTarget>,
    links_by_target: HashMap<TargetKey, HashSet<FieldAddr>>,
}

impl RelationsManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the record-level hook registered under `(reference, value)`.
    #[must_use]
    pub fn record_hook(&self, reference: &str, value: &str) -> Option<FieldAddr> {
        self.record_hooks.get(&key(reference, value)).copied()
    }

    /// Registers every key of `hook` for the field at `addr`.
    ///
    /// Registration is atomic: if any key is already claimed, nothing is
    /// stored and the clash is reported. A duplicate key is a validation
    /// problem for the caller, never a silent overwrite.
    pub fn register_record_hook(
        &mut self,
        hook: &Hook,
        addr: FieldAddr,
    ) -> Result<(), ReferentialError> {
        for (reference, value) in hook.keys() {
            if self.record_hooks.contains_key(&key(reference, value)) {
                return Err(ReferentialError::ReferenceAlreadyClaimed {
                    reference: reference.to_string(),
                    value: value.to_string(),
                });
            }
        }
        for (reference, value) in hook.keys() {
            self.record_hooks.insert(key(reference, value), addr);
        }
        Ok(())
    }

    /// Removes every key of `hook`, provided it is registered at `addr`.
    pub fn unregister_record_hook(&mut self, hook: &Hook, addr: FieldAddr) {
        for (reference, value) in hook.keys() {
            let k = key(reference, value);
            if self.record_hooks.get(&k) == Some(&addr) {
                self.record_hooks.remove(&k);
            }
        }
    }

    /// Registers a class-level hook: `(reference, table_ref)` resolves to
    /// the whole table. Used for fields declared `reference-class-name`.
    pub fn register_table_hook(&mut self, reference: &str, table_ref: &str, table: usize) {
        self.table_hooks.insert(key(reference, table_ref), table);
    }

    /// Resolves a link's candidate keys against the registered hooks.
    ///
    /// A record-level match is preferred; a class-level (table) match is
    /// the fallback. `None` means the link is unresolvable.
    #[must_use]
    pub fn resolve(&self, references: &[String], value: &str) -> Option<LinkTarget> {
        for reference in references {
            if let Some(addr) = self.record_hook(reference, value) {
                return Some(LinkTarget::Record(addr.record));
            }
        }
        for reference in references {
            if let Some(&table) = self.table_hooks.get(&key(reference, value)) {
                return Some(LinkTarget::Table(table));
            }
        }
        None
    }

    /// Records a resolved link from `source` to `target`.
    pub fn register_link(&mut self, source: FieldAddr, target: LinkTarget) {
        self.links_by_source.insert(source, target);
        self.links_by_target
            .entry(target.into())
            .or_default()
            .insert(source);
    }

    /// Drops a link, returning its former target.
    pub fn unregister_link(&mut self, source: FieldAddr) -> Option<LinkTarget> {
        let target = self.links_by_source.remove(&source)?;
        let target_key = TargetKey::from(target);
        if let Some(sources) = self.links_by_target.get_mut(&target_key) {
            sources.remove(&source);
            if sources.is_empty() {
                self.links_by_target.remove(&target_key);
            }
        }
        Some(target)
    }

    /// The target of an active link, if any.
    #[must_use]
    pub fn link_target(&self, source: FieldAddr) -> Option<LinkTarget> {
        self.links_by_source.get(&source).copied()
    }

    /// All link fields currently pointing at `record`, in address order.
    #[must_use]
    pub fn links_targeting(&self, record: RecordAddr) -> Vec<FieldAddr> {
        let mut sources: Vec<FieldAddr> = self
            .links_by_target
            .get(&TargetKey::Record(record))
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        sources.sort_unstable();
        sources
    }

    /// Number of registered record-level hook keys.
    #[must_use]
    pub fn record_hook_count(&self) -> usize {
        self.record_hooks.len()
    }

    /// Number of active links.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links_by_source.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(table: usize, slot: u64, field: usize) -> FieldAddr {
        FieldAddr {
            record: RecordAddr { table, slot },
            field,
        }
    }

    #[test]
    fn test_hook_keys() {
        let hook = Hook::new(vec!["ZoneNames".into(), "AllNames".into()], "kitchen");
        let keys: Vec<_> = hook.keys().collect();
        assert_eq!(
            keys,
            vec![("ZoneNames", "kitchen"), ("AllNames", "kitchen")]
        );
    }

    #[test]
    fn test_register_and_resolve_record_hook() {
        let mut rm = RelationsManager::new();
        let hook = Hook::new(vec!["ZoneNames".into()], "kitchen");
        rm.register_record_hook(&hook, addr(0, 1, 0)).unwrap();

        let target = rm.resolve(&["ZoneNames".into()], "kitchen").unwrap();
        assert_eq!(target, LinkTarget::Record(RecordAddr { table: 0, slot: 1 }));
    }

    #[test]
    fn test_resolution_is_case_insensitive() {
        let mut rm = RelationsManager::new();
        let hook = Hook::new(vec!["ZoneNames".into()], "Kitchen");
        rm.register_record_hook(&hook, addr(0, 1, 0)).unwrap();

        assert!(rm.resolve(&["zonenames".into()], "KITCHEN").is_some());
    }

    #[test]
    fn test_duplicate_hook_key_is_refused() {
        let mut rm = RelationsManager::new();
        let hook = Hook::new(vec!["ZoneNames".into()], "kitchen");
        rm.register_record_hook(&hook, addr(0, 1, 0)).unwrap();

        let clash = Hook::new(vec!["ZoneNames".into()], "kitchen");
        let err = rm.register_record_hook(&clash, addr(0, 2, 0)).unwrap_err();
        assert!(matches!(
            err,
            ReferentialError::ReferenceAlreadyClaimed { .. }
        ));

        // The first registration is retained untouched.
        assert_eq!(
            rm.record_hook("ZoneNames", "kitchen"),
            Some(addr(0, 1, 0))
        );
    }

    #[test]
    fn test_duplicate_registration_is_atomic() {
        let mut rm = RelationsManager::new();
        let first = Hook::new(vec!["B".into()], "v");
        rm.register_record_hook(&first, addr(0, 1, 0)).unwrap();

        // Clashes on the second key; the first key must not leak in.
        let clash = Hook::new(vec!["A".into(), "B".into()], "v");
        assert!(rm.register_record_hook(&clash, addr(0, 2, 0)).is_err());
        assert!(rm.record_hook("A", "v").is_none());
    }

    #[test]
    fn test_table_hook_fallback() {
        let mut rm = RelationsManager::new();
        rm.register_table_hook("ScheduleTypeLimitsNames", "schedule_type_limits", 3);

        let target = rm
            .resolve(
                &["ScheduleTypeLimitsNames".into()],
                "schedule_type_limits",
            )
            .unwrap();
        assert_eq!(target, LinkTarget::Table(3));
    }

    #[test]
    fn test_record_hook_preferred_over_table_hook() {
        let mut rm = RelationsManager::new();
        rm.register_table_hook("Names", "x", 7);
        let hook = Hook::new(vec!["Names".into()], "x");
        rm.register_record_hook(&hook, addr(0, 1, 0)).unwrap();

        let target = rm.resolve(&["Names".into()], "x").unwrap();
        assert!(matches!(target, LinkTarget::Record(_)));
    }

    #[test]
    fn test_link_registration_and_target_index() {
        let mut rm = RelationsManager::new();
        let target = LinkTarget::Record(RecordAddr { table: 0, slot: 1 });
        rm.register_link(addr(1, 5, 2), target);
        rm.register_link(addr(1, 6, 2), target);

        let pointing = rm.links_targeting(RecordAddr { table: 0, slot: 1 });
        assert_eq!(pointing, vec![addr(1, 5, 2), addr(1, 6, 2)]);

        rm.unregister_link(addr(1, 5, 2));
        let pointing = rm.links_targeting(RecordAddr { table: 0, slot: 1 });
        assert_eq!(pointing, vec![addr(1, 6, 2)]);
        assert_eq!(rm.link_count(), 1);
    }

    #[test]
    fn test_unregister_hook_requires_matching_addr() {
        let mut rm = RelationsManager::new();
        let hook = Hook::new(vec!["Names".into()], "x");
        rm.register_record_hook(&hook, addr(0, 1, 0)).unwrap();

        // Wrong address: key stays.
        rm.unregister_record_hook(&hook, addr(0, 9, 0));
        assert!(rm.record_hook("Names", "x").is_some());

        rm.unregister_record_hook(&hook, addr(0, 1, 0));
        assert!(rm.record_hook("Names", "x").is_none());
    }

    #[test]
    fn test_unresolvable_link() {
        let rm = RelationsManager::new();
        assert!(rm.resolve(&["Names".into()], "ghost").is_none());
    }
}
