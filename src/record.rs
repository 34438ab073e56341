//! Records: one instance of a table descriptor.
//!
//! A record stores a sparse `index -> value` map; an absent index reads
//! as null. Values are the closed [`FieldValue`] sum: plain values,
//! hooks for reference-bearing fields, links for pointer fields. Records
//! share their descriptor read-only through an `Arc`; all mutation goes
//! through the owning model so hook/link registration stays consistent.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::idd::field::FieldValue;
use crate::idd::table::TableDescriptor;
use crate::relations::{Hook, Link};
use crate::value::Value;

/// A record's identity within its table.
///
/// `Name` when the table's first field is a required reference field;
/// `Auto` (the record's stable slot id) otherwise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pk {
    /// The record's lowercased name field.
    Name(String),
    /// The record's slot id, for tables without a name field.
    Auto(u64),
}

impl Pk {
    /// The name, for name-keyed identities.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(s) => Some(s),
            Self::Auto(_) => None,
        }
    }
}

impl fmt::Display for Pk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(s) => write!(f, "{s}"),
            Self::Auto(slot) => write!(f, "#{slot}"),
        }
    }
}

impl From<&str> for Pk {
    fn from(s: &str) -> Self {
        Self::Name(s.to_lowercase())
    }
}

impl From<String> for Pk {
    fn from(s: String) -> Self {
        Self::Name(s.to_lowercase())
    }
}

/// Names or indexes a field of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKey {
    /// A positional field index.
    Index(usize),
    /// A field ref, resolved through the table descriptor.
    Name(String),
}

impl From<usize> for FieldKey {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

impl From<&str> for FieldKey {
    fn from(s: &str) -> Self {
        Self::Name(s.to_string())
    }
}

impl From<String> for FieldKey {
    fn from(s: String) -> Self {
        Self::Name(s)
    }
}

/// One instance of a table descriptor.
#[derive(Debug)]
pub struct Record {
    descriptor: Arc<TableDescriptor>,
    slot: u64,
    fields: BTreeMap<usize, FieldValue>,
    comments: BTreeMap<usize, String>,
}

impl Record {
    pub(crate) fn new(descriptor: Arc<TableDescriptor>, slot: u64) -> Self {
        Self {
            descriptor,
            slot,
            fields: BTreeMap::new(),
            comments: BTreeMap::new(),
        }
    }

    /// The record's stable slot id within its table.
    #[must_use]
    pub const fn slot(&self) -> u64 {
        self.slot
    }

    /// The table descriptor this record instantiates.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<TableDescriptor> {
        &self.descriptor
    }

    /// The owning table's ref.
    #[must_use]
    pub fn table_ref(&self) -> &str {
        self.descriptor.table_ref()
    }

    /// The record's identity: field 0 when the table keys its records by
    /// name, the slot id otherwise (also the fallback while field 0 is
    /// still unset).
    #[must_use]
    pub fn pk(&self) -> Pk {
        if self.descriptor.has_named_pk() {
            if let Some(state) = self.fields.get(&0) {
                if let Value::Str(name) = state.local_value() {
                    return Pk::Name(name.to_lowercase());
                }
            }
        }
        Pk::Auto(self.slot)
    }

    /// Number of addressable fields: the larger of the schema's base
    /// field count and the highest populated index rounded up to the end
    /// of its extensible cycle.
    #[must_use]
    pub fn len(&self) -> usize {
        let base = self.descriptor.field_count();
        match self.fields.keys().next_back() {
            Some(&highest) => base.max(self.descriptor.cycle_end_for(highest)),
            None => base,
        }
    }

    /// Whether no field is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolves a field key to an index through the descriptor.
    pub fn resolve_key(&self, key: &FieldKey) -> Result<usize, ValidationError> {
        match key {
            FieldKey::Index(i) => {
                self.descriptor.get_field_descriptor(*i)?;
                Ok(*i)
            }
            FieldKey::Name(name) => self.descriptor.get_field_index(name),
        }
    }

    /// The stored state of a field, if populated.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&FieldValue> {
        self.fields.get(&index)
    }

    /// The field's value without following links; absent fields read as
    /// null, hooks and links yield their stored string.
    #[must_use]
    pub fn value(&self, index: usize) -> Value {
        self.fields
            .get(&index)
            .map_or(Value::Null, FieldValue::local_value)
    }

    pub(crate) fn set_field(&mut self, index: usize, state: FieldValue) {
        if state.is_null() {
            self.fields.remove(&index);
        } else {
            self.fields.insert(index, state);
        }
    }

    pub(crate) fn take_field(&mut self, index: usize) -> Option<FieldValue> {
        self.fields.remove(&index)
    }

    /// Populated field indexes in ascending order.
    pub fn populated(&self) -> impl Iterator<Item = usize> + '_ {
        self.fields.keys().copied()
    }

    /// Hook-bearing fields.
    pub fn hooks(&self) -> impl Iterator<Item = (usize, &Hook)> {
        self.fields
            .iter()
            .filter_map(|(&i, state)| state.as_hook().map(|h| (i, h)))
    }

    /// Link-bearing fields.
    pub fn links(&self) -> impl Iterator<Item = (usize, &Link)> {
        self.fields
            .iter()
            .filter_map(|(&i, state)| state.as_link().map(|l| (i, l)))
    }

    /// The comment attached to a field, if any.
    #[must_use]
    pub fn comment(&self, index: usize) -> Option<&str> {
        self.comments.get(&index).map(String::as_str)
    }

    pub(crate) fn set_comment(&mut self, index: usize, comment: Option<String>) {
        match comment {
            Some(c) => {
                self.comments.insert(index, c);
            }
            None => {
                self.comments.remove(&index);
            }
        }
    }
}
