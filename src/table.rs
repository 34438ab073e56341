//! Tables: all records of one descriptor, indexed by primary key.
//!
//! Records live in a slot map keyed by a stable slot id; a `pk -> slot`
//! index on top gives primary-key uniqueness and pk-order iteration.
//! Slot ids never change, so addresses held by the relations registry
//! survive re-keying.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{CardinalityError, ValidationError};
use crate::idd::table::TableDescriptor;
use crate::record::{Pk, Record};

/// All records of one record type.
#[derive(Debug)]
pub struct Table {
    descriptor: Arc<TableDescriptor>,
    position: usize,
    records: HashMap<u64, Record>,
    by_pk: BTreeMap<Pk, u64>,
}

impl Table {
    pub(crate) fn new(descriptor: Arc<TableDescriptor>, position: usize) -> Self {
        Self {
            descriptor,
            position,
            records: HashMap::new(),
            by_pk: BTreeMap::new(),
        }
    }

    /// The schema descriptor shared by every record of this table.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<TableDescriptor> {
        &self.descriptor
    }

    /// The table's identifier-safe ref.
    #[must_use]
    pub fn table_ref(&self) -> &str {
        self.descriptor.table_ref()
    }

    /// The table's declared display name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        self.descriptor.table_name()
    }

    /// Position of this table in the model's declaration order.
    #[must_use]
    pub(crate) const fn position(&self) -> usize {
        self.position
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Inserts a record, enforcing primary-key uniqueness.
    pub(crate) fn insert(&mut self, record: Record) -> Result<u64, ValidationError> {
        let pk = record.pk();
        if self.by_pk.contains_key(&pk) {
            return Err(ValidationError::DuplicatePrimaryKey {
                table: self.table_ref().to_string(),
                pk: pk.to_string(),
            });
        }
        let slot = record.slot();
        self.by_pk.insert(pk, slot);
        self.records.insert(slot, record);
        Ok(slot)
    }

    pub(crate) fn remove(&mut self, slot: u64) -> Option<Record> {
        let record = self.records.remove(&slot)?;
        self.by_pk.retain(|_, &mut s| s != slot);
        Some(record)
    }

    /// Atomically moves a record from `old_pk` to its current pk,
    /// re-checking uniqueness. On failure the old key stays in place.
    pub(crate) fn rekey(&mut self, slot: u64, old_pk: &Pk) -> Result<(), ValidationError> {
        let new_pk = self
            .records
            .get(&slot)
            .map(Record::pk)
            .ok_or_else(|| ValidationError::UnknownField {
                table: self.table_ref().to_string(),
                field: format!("slot {slot}"),
            })?;
        if new_pk == *old_pk {
            return Ok(());
        }
        if self.by_pk.contains_key(&new_pk) {
            return Err(ValidationError::DuplicatePrimaryKey {
                table: self.table_ref().to_string(),
                pk: new_pk.to_string(),
            });
        }
        self.by_pk.remove(old_pk);
        self.by_pk.insert(new_pk, slot);
        Ok(())
    }

    /// The record at a slot id, if any.
    #[must_use]
    pub fn get(&self, slot: u64) -> Option<&Record> {
        self.records.get(&slot)
    }

    pub(crate) fn get_mut(&mut self, slot: u64) -> Option<&mut Record> {
        self.records.get_mut(&slot)
    }

    /// Looks up a record by primary key.
    #[must_use]
    pub fn by_pk(&self, pk: &Pk) -> Option<&Record> {
        self.records.get(self.by_pk.get(pk)?)
    }

    #[must_use]
    pub(crate) fn slot_of(&self, pk: &Pk) -> Option<u64> {
        self.by_pk.get(pk).copied()
    }

    /// All records in primary-key order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.by_pk.values().filter_map(move |slot| self.records.get(slot))
    }

    /// Records matching a predicate, in primary-key order.
    pub fn select<'a>(&'a self, predicate: impl Fn(&Record) -> bool + 'a) -> Vec<&'a Record> {
        self.records().filter(|r| predicate(r)).collect()
    }

    /// The single record matching a predicate.
    ///
    /// Distinguishes "not found" from "ambiguous".
    pub fn one<'a>(
        &'a self,
        predicate: impl Fn(&Record) -> bool + 'a,
    ) -> Result<&'a Record, CardinalityError> {
        let matches = self.select(predicate);
        match matches.len() {
            0 => Err(CardinalityError::NotFound {
                table: self.table_ref().to_string(),
            }),
            1 => Ok(matches[0]),
            n => Err(CardinalityError::Ambiguous {
                table: self.table_ref().to_string(),
                matched: n,
            }),
        }
    }

    /// The record with the given primary key.
    pub fn one_by_pk(&self, pk: &Pk) -> Result<&Record, CardinalityError> {
        self.by_pk(pk).ok_or_else(|| CardinalityError::NotFound {
            table: self.table_ref().to_string(),
        })
    }
}
