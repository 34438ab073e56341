//! The model: every table of a schema plus the relations registry.
//!
//! [`Epm`] is the arena that owns all tables and records. Hooks and links
//! never hold references into it; they carry addresses, and the model is
//! the only layer allowed to mutate records, so registration in the
//! [`RelationsManager`] always mirrors the stored field states.
//!
//! Record creation runs in three phases over a whole batch: every record
//! is first inserted inert, then every hook is activated, then every link
//! is resolved. Records inside one batch can therefore point at each
//! other regardless of their order. A batch is transactional: when any
//! phase fails, every insertion and registration it performed is undone
//! before the error is returned.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::codec;
use crate::error::{
    CardinalityError, EpmError, EpmResult, ReferentialError, ValidationError,
};
use crate::idd::field::FieldValue;
use crate::idd::Idd;
use crate::record::{FieldKey, Pk, Record};
use crate::relations::{FieldAddr, Hook, LinkTarget, RecordAddr, RelationsManager};
use crate::table::Table;
use crate::value::Value;

/// Which validations run during record creation and update.
#[derive(Debug, Clone, Copy)]
pub struct CheckOptions {
    /// Refuse records that leave a `required-field` unset.
    pub required_fields: bool,
    /// Enforce the 100-character limit on text values.
    pub field_length: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            required_fields: true,
            field_length: true,
        }
    }
}

impl CheckOptions {
    /// All checks disabled.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            required_fields: false,
            field_length: false,
        }
    }
}

/// One record's raw input: table name plus positional values.
#[derive(Debug, Clone)]
pub(crate) struct RecordInput {
    pub(crate) table: String,
    pub(crate) values: Vec<Value>,
    pub(crate) comments: Vec<Option<String>>,
}

impl RecordInput {
    pub(crate) fn new(table: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            table: table.into(),
            values,
            comments: Vec::new(),
        }
    }
}

/// An in-memory model: one record arena per schema table.
#[derive(Debug)]
pub struct Epm {
    idd: Arc<Idd>,
    tables: Vec<Table>,
    relations: RelationsManager,
    options: CheckOptions,
    header_comment: String,
    next_slot: u64,
}

impl Epm {
    /// Creates an empty model for a schema, with default check options.
    #[must_use]
    pub fn new(idd: Arc<Idd>) -> Self {
        Self::with_options(idd, CheckOptions::default())
    }

    /// Creates an empty model with explicit check options.
    #[must_use]
    pub fn with_options(idd: Arc<Idd>, options: CheckOptions) -> Self {
        let mut relations = RelationsManager::new();
        let mut tables = Vec::with_capacity(idd.table_count());
        for (i, descriptor) in idd.tables().iter().enumerate() {
            // A reference-class-name field makes the table itself a valid
            // pointer target under that reference name.
            for field in descriptor.fields() {
                for reference in field.class_references() {
                    relations.register_table_hook(reference, descriptor.table_ref(), i);
                }
            }
            tables.push(Table::new(Arc::clone(descriptor), i));
        }
        Self {
            idd,
            tables,
            relations,
            options,
            header_comment: String::new(),
            next_slot: 1,
        }
    }

    /// Parses a document against a schema into a fresh model.
    pub fn load_str(idd: Arc<Idd>, text: &str) -> EpmResult<Self> {
        Self::load_with_options(idd, text, CheckOptions::default())
    }

    /// [`load_str`](Self::load_str) with explicit check options.
    pub fn load_with_options(
        idd: Arc<Idd>,
        text: &str,
        options: CheckOptions,
    ) -> EpmResult<Self> {
        let document = codec::tokenize(text);
        let mut epm = Self::with_options(idd, options);
        epm.header_comment = document.header;
        let count = document.records.len();
        epm.add_inputs(document.records)?;
        debug!(records = count, "loaded model");
        Ok(epm)
    }

    /// Reads and parses a document file.
    pub fn load_file(idd: Arc<Idd>, path: impl AsRef<Path>) -> EpmResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::load_str(idd, &text)
    }

    /// Serializes the whole model back to document text.
    #[must_use]
    pub fn save_string(&self) -> String {
        codec::write_idf(self)
    }

    /// Writes the serialized model to a file.
    pub fn save_file(&self, path: impl AsRef<Path>) -> EpmResult<()> {
        std::fs::write(path, self.save_string())?;
        Ok(())
    }

    /// The schema this model was built against.
    #[must_use]
    pub fn idd(&self) -> &Arc<Idd> {
        &self.idd
    }

    /// The active check options.
    #[must_use]
    pub const fn options(&self) -> CheckOptions {
        self.options
    }

    /// The document's leading free-text comment.
    #[must_use]
    pub fn header_comment(&self) -> &str {
        &self.header_comment
    }

    /// Replaces the document's leading free-text comment.
    pub fn set_header_comment(&mut self, comment: impl Into<String>) {
        self.header_comment = comment.into();
    }

    /// The relations registry, for inspection.
    #[must_use]
    pub const fn relations(&self) -> &RelationsManager {
        &self.relations
    }

    /// Looks up a table by name or ref.
    pub fn table(&self, name_or_ref: &str) -> EpmResult<&Table> {
        let index = self.table_index_checked(name_or_ref)?;
        Ok(&self.tables[index])
    }

    /// All tables in schema declaration order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    /// Total number of records across all tables.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.tables.iter().map(Table::len).sum()
    }

    fn table_index_checked(&self, name_or_ref: &str) -> Result<usize, ValidationError> {
        self.idd
            .table_index(name_or_ref)
            .ok_or_else(|| ValidationError::UnknownTable {
                table: name_or_ref.to_string(),
            })
    }

    // ----- record creation ---------------------------------------------

    /// Adds one record from positional raw values.
    pub fn add(&mut self, table: &str, values: Vec<Value>) -> EpmResult<RecordAddr> {
        let addrs = self.add_inputs(vec![RecordInput::new(table, values)])?;
        addrs
            .into_iter()
            .next()
            .ok_or_else(|| EpmError::internal("batch of one returned no address"))
    }

    /// Adds a batch of records.
    ///
    /// Records may reference each other in any order: all insertions
    /// happen before any hook activates, and all hooks activate before
    /// any link resolves. The batch is atomic.
    pub fn batch_add(
        &mut self,
        batch: Vec<(String, Vec<Value>)>,
    ) -> EpmResult<Vec<RecordAddr>> {
        self.add_inputs(
            batch
                .into_iter()
                .map(|(table, values)| RecordInput::new(table, values))
                .collect(),
        )
    }

    /// The transactional three-phase core behind every creation path.
    pub(crate) fn add_inputs(&mut self, batch: Vec<RecordInput>) -> EpmResult<Vec<RecordAddr>> {
        let slot_base = self.next_slot;
        let mut inserted: Vec<RecordAddr> = Vec::new();
        let mut hooks_done: Vec<(Hook, FieldAddr)> = Vec::new();
        let mut links_done: Vec<FieldAddr> = Vec::new();

        match self.try_add_inputs(batch, &mut inserted, &mut hooks_done, &mut links_done) {
            Ok(()) => Ok(inserted),
            Err(e) => {
                for faddr in links_done {
                    self.relations.unregister_link(faddr);
                }
                for (hook, faddr) in hooks_done {
                    self.relations.unregister_record_hook(&hook, faddr);
                }
                for addr in inserted {
                    self.tables[addr.table].remove(addr.slot);
                }
                self.next_slot = slot_base;
                Err(e)
            }
        }
    }

    fn try_add_inputs(
        &mut self,
        batch: Vec<RecordInput>,
        inserted: &mut Vec<RecordAddr>,
        hooks_done: &mut Vec<(Hook, FieldAddr)>,
        links_done: &mut Vec<FieldAddr>,
    ) -> EpmResult<()> {
        // Phase 1: build and insert every record inert.
        for input in batch {
            let table_index = self.table_index_checked(&input.table)?;
            let descriptor = Arc::clone(self.tables[table_index].descriptor());
            let slot = self.next_slot;
            self.next_slot += 1;

            let mut record = Record::new(Arc::clone(&descriptor), slot);
            for (i, raw) in input.values.iter().enumerate() {
                let field = descriptor.get_field_descriptor(i)?;
                let field_ref = descriptor.field_ref_for(i);
                let state = field.deserialize(
                    raw,
                    descriptor.table_ref(),
                    &field_ref,
                    self.options.field_length,
                )?;
                record.set_field(i, state);
            }
            for (i, comment) in input.comments.into_iter().enumerate() {
                record.set_comment(i, comment);
            }

            if self.options.required_fields {
                for field in descriptor.fields() {
                    if field.is_required() && record.field(field.index()).is_none() {
                        return Err(ValidationError::MissingRequiredField {
                            table: descriptor.table_ref().to_string(),
                            field: field.ref_or_index(),
                        }
                        .into());
                    }
                }
            }

            let slot = self.tables[table_index].insert(record)?;
            inserted.push(RecordAddr {
                table: table_index,
                slot,
            });
        }

        // Phase 2: activate every hook.
        for &addr in inserted.iter() {
            let hooks: Vec<(usize, Hook)> = self.tables[addr.table]
                .get(addr.slot)
                .map(|r| r.hooks().map(|(i, h)| (i, h.clone())).collect())
                .unwrap_or_default();
            for (field, hook) in hooks {
                let faddr = FieldAddr {
                    record: addr,
                    field,
                };
                self.register_hook_checked(&hook, faddr)?;
                hooks_done.push((hook, faddr));
            }
        }

        // Phase 3: resolve every link.
        for &addr in inserted.iter() {
            let links: Vec<(usize, Vec<String>, String)> = self.tables[addr.table]
                .get(addr.slot)
                .map(|r| {
                    r.links()
                        .map(|(i, l)| (i, l.references().to_vec(), l.value().to_string()))
                        .collect()
                })
                .unwrap_or_default();
            for (field, references, value) in links {
                let target = self.relations.resolve(&references, &value).ok_or_else(|| {
                    ValidationError::UnresolvedLink {
                        table: self.tables[addr.table].table_ref().to_string(),
                        field_index: field,
                        value,
                    }
                })?;
                let faddr = FieldAddr {
                    record: addr,
                    field,
                };
                self.relations.register_link(faddr, target);
                links_done.push(faddr);
            }
        }
        Ok(())
    }

    /// Registers a hook, surfacing a clash as a validation error that
    /// names both claimants.
    fn register_hook_checked(&mut self, hook: &Hook, faddr: FieldAddr) -> EpmResult<()> {
        match self.relations.register_record_hook(hook, faddr) {
            Ok(()) => Ok(()),
            Err(ReferentialError::ReferenceAlreadyClaimed { reference, value }) => {
                let first = self
                    .relations
                    .record_hook(&reference, &value)
                    .map_or_else(|| "<unknown>".to_string(), |a| self.describe(a.record));
                let second = self.describe(faddr.record);
                Err(ValidationError::DuplicateReferenceValue {
                    reference,
                    value,
                    first,
                    second,
                }
                .into())
            }
            Err(other) => Err(other.into()),
        }
    }

    fn describe(&self, addr: RecordAddr) -> String {
        self.tables
            .get(addr.table)
            .and_then(|t| t.get(addr.slot))
            .map_or_else(
                || format!("#{}", addr.slot),
                |r| format!("{}.{}", r.table_ref(), r.pk()),
            )
    }

    // ----- mutation ----------------------------------------------------

    /// Updates one field of a record.
    ///
    /// Detaches the old state (cascading pointer clearing when a hook
    /// field changes), deserializes and attaches the new one, and re-keys
    /// the record when its identity field changed. On failure the old
    /// field state is restored, but pointers already cleared by the
    /// cascade stay cleared.
    pub fn update(
        &mut self,
        table: &str,
        pk: &Pk,
        field: impl Into<FieldKey>,
        value: Value,
    ) -> EpmResult<()> {
        let table_index = self.table_index_checked(table)?;
        let slot = self.slot_checked(table_index, pk)?;
        let addr = RecordAddr {
            table: table_index,
            slot,
        };
        let descriptor = Arc::clone(self.tables[table_index].descriptor());

        let field_index = match field.into() {
            FieldKey::Index(i) => {
                descriptor.get_field_descriptor(i)?;
                i
            }
            FieldKey::Name(name) => descriptor.get_field_index(&name)?,
        };
        let field_ref = descriptor.field_ref_for(field_index);
        let new_state = descriptor.get_field_descriptor(field_index)?.deserialize(
            &value,
            descriptor.table_ref(),
            &field_ref,
            self.options.field_length,
        )?;

        let old_pk = self
            .tables[table_index]
            .get(slot)
            .map(Record::pk)
            .ok_or_else(|| EpmError::internal("pk lookup resolved to a missing record"))?;

        // Refuse an identity change that would collide before touching
        // anything.
        let rekeys = field_index == 0 && descriptor.has_named_pk();
        if rekeys {
            let prospective = match new_state.local_value() {
                Value::Str(name) => Pk::Name(name.to_lowercase()),
                _ => Pk::Auto(slot),
            };
            if prospective != old_pk && self.tables[table_index].slot_of(&prospective).is_some()
            {
                return Err(ValidationError::DuplicatePrimaryKey {
                    table: descriptor.table_ref().to_string(),
                    pk: prospective.to_string(),
                }
                .into());
            }
        }

        let old_state = self.tables[table_index]
            .get_mut(slot)
            .and_then(|r| r.take_field(field_index));
        if let Some(old) = &old_state {
            self.detach_field(addr, field_index, old);
        }

        if let Err(e) = self.attach_field(addr, field_index, &new_state) {
            if let Some(old) = old_state {
                self.reattach_field(addr, field_index, &old);
                if let Some(record) = self.tables[table_index].get_mut(slot) {
                    record.set_field(field_index, old);
                }
            }
            return Err(e);
        }
        if let Some(record) = self.tables[table_index].get_mut(slot) {
            record.set_field(field_index, new_state);
        }

        if rekeys {
            self.tables[table_index].rekey(slot, &old_pk)?;
        }
        Ok(())
    }

    /// Deletes a record, clearing every field that points at it.
    pub fn delete(&mut self, table: &str, pk: &Pk) -> EpmResult<()> {
        let table_index = self.table_index_checked(table)?;
        let slot = self.slot_checked(table_index, pk)?;
        self.delete_at(RecordAddr {
            table: table_index,
            slot,
        })
    }

    /// Deletes a record only if nothing points at it.
    pub fn delete_strict(&mut self, table: &str, pk: &Pk) -> EpmResult<()> {
        let table_index = self.table_index_checked(table)?;
        let slot = self.slot_checked(table_index, pk)?;
        let addr = RecordAddr {
            table: table_index,
            slot,
        };
        let pointing = self.relations.links_targeting(addr).len();
        if pointing > 0 {
            return Err(ReferentialError::PointedRecordDelete {
                table: self.tables[table_index].table_ref().to_string(),
                pk: pk.to_string(),
                pointing,
            }
            .into());
        }
        self.delete_at(addr)
    }

    fn delete_at(&mut self, addr: RecordAddr) -> EpmResult<()> {
        self.clear_pointing(addr);
        let record = self.tables[addr.table]
            .remove(addr.slot)
            .ok_or_else(|| EpmError::internal("delete resolved to a missing record"))?;
        for (field, hook) in record.hooks() {
            self.relations.unregister_record_hook(
                hook,
                FieldAddr {
                    record: addr,
                    field,
                },
            );
        }
        for (field, _) in record.links() {
            self.relations.unregister_link(FieldAddr {
                record: addr,
                field,
            });
        }
        Ok(())
    }

    /// Copies a record. Identity-keyed tables require a fresh name;
    /// keyless tables ignore it.
    pub fn copy(
        &mut self,
        table: &str,
        pk: &Pk,
        new_name: Option<&str>,
    ) -> EpmResult<RecordAddr> {
        let table_index = self.table_index_checked(table)?;
        let slot = self.slot_checked(table_index, pk)?;
        let descriptor = Arc::clone(self.tables[table_index].descriptor());

        let source = self.tables[table_index]
            .get(slot)
            .ok_or_else(|| EpmError::internal("pk lookup resolved to a missing record"))?;
        let len = source.len();
        let mut values: Vec<Value> = (0..len).map(|i| source.value(i)).collect();
        let comments: Vec<Option<String>> = (0..len)
            .map(|i| source.comment(i).map(str::to_string))
            .collect();

        if descriptor.has_named_pk() {
            let name = new_name.ok_or_else(|| ValidationError::MissingRequiredField {
                table: descriptor.table_ref().to_string(),
                field: descriptor.field_ref_for(0),
            })?;
            values[0] = Value::Str(name.to_string());
        }

        let mut input = RecordInput::new(descriptor.table_name().to_string(), values);
        input.comments = comments;
        let addrs = self.add_inputs(vec![input])?;
        addrs
            .into_iter()
            .next()
            .ok_or_else(|| EpmError::internal("copy returned no address"))
    }

    /// Fills unset fields that declare a schema `default`, deserialized
    /// through the normal rules. Fields already set are left alone.
    pub fn set_defaults(&mut self, table: &str, pk: &Pk) -> EpmResult<()> {
        let table_index = self.table_index_checked(table)?;
        let slot = self.slot_checked(table_index, pk)?;
        let addr = RecordAddr {
            table: table_index,
            slot,
        };
        let descriptor = Arc::clone(self.tables[table_index].descriptor());

        let len = self.tables[table_index]
            .get(slot)
            .map_or(0, Record::len);
        let mut pending = Vec::new();
        for i in 0..len {
            let populated = self.tables[table_index]
                .get(slot)
                .is_some_and(|r| r.field(i).is_some());
            if populated {
                continue;
            }
            let field = descriptor.get_field_descriptor(i)?;
            if let Some(raw) = field.default_raw() {
                let state = field.deserialize(
                    &Value::Str(raw.to_string()),
                    descriptor.table_ref(),
                    &descriptor.field_ref_for(i),
                    self.options.field_length,
                )?;
                pending.push((i, state));
            }
        }
        for (i, state) in pending {
            self.attach_field(addr, i, &state)?;
            if let Some(record) = self.tables[table_index].get_mut(slot) {
                record.set_field(i, state);
            }
        }
        Ok(())
    }

    /// Sets or clears the comment attached to one field.
    pub fn set_comment(
        &mut self,
        table: &str,
        pk: &Pk,
        field: impl Into<FieldKey>,
        comment: Option<String>,
    ) -> EpmResult<()> {
        let table_index = self.table_index_checked(table)?;
        let slot = self.slot_checked(table_index, pk)?;
        let record = self.tables[table_index]
            .get_mut(slot)
            .ok_or_else(|| EpmError::internal("pk lookup resolved to a missing record"))?;
        let index = record.resolve_key(&field.into())?;
        record.set_comment(index, comment);
        Ok(())
    }

    // ----- extensible helpers ------------------------------------------

    /// Appends raw values to the extensible region of a record.
    pub fn add_fields(&mut self, table: &str, pk: &Pk, values: Vec<Value>) -> EpmResult<()> {
        let table_index = self.table_index_checked(table)?;
        let slot = self.slot_checked(table_index, pk)?;
        let addr = RecordAddr {
            table: table_index,
            slot,
        };
        let descriptor = Arc::clone(self.tables[table_index].descriptor());
        if !descriptor.is_extensible() {
            return Err(ValidationError::NotExtensible {
                table: descriptor.table_ref().to_string(),
            }
            .into());
        }

        let start = self.tables[table_index]
            .get(slot)
            .map_or(0, Record::len);
        for (k, raw) in values.iter().enumerate() {
            let i = start + k;
            let field = descriptor.get_field_descriptor(i)?;
            let state = field.deserialize(
                raw,
                descriptor.table_ref(),
                &descriptor.field_ref_for(i),
                self.options.field_length,
            )?;
            self.attach_field(addr, i, &state)?;
            if let Some(record) = self.tables[table_index].get_mut(slot) {
                record.set_field(i, state);
            }
        }
        Ok(())
    }

    /// Removes and returns the last extensible value of a record.
    ///
    /// Only single-field cycles support positional surgery; multi-field
    /// cycles would leave half-shifted groups behind.
    pub fn pop(&mut self, table: &str, pk: &Pk) -> EpmResult<Value> {
        let table_index = self.table_index_checked(table)?;
        let slot = self.slot_checked(table_index, pk)?;
        let addr = RecordAddr {
            table: table_index,
            slot,
        };
        let descriptor = Arc::clone(self.tables[table_index].descriptor());
        let cycle_start = self.single_field_cycle_start(&descriptor)?;

        let highest = self.tables[table_index]
            .get(slot)
            .and_then(|r| r.populated().filter(|&i| i >= cycle_start).max())
            .ok_or_else(|| ValidationError::OutsideExtensibleRange {
                table: descriptor.table_ref().to_string(),
                index: cycle_start,
            })?;

        let state = self.tables[table_index]
            .get_mut(slot)
            .and_then(|r| r.take_field(highest))
            .ok_or_else(|| EpmError::internal("populated index vanished"))?;
        if let Some(record) = self.tables[table_index].get_mut(slot) {
            record.set_comment(highest, None);
        }
        self.detach_field(addr, highest, &state);
        Ok(state.local_value())
    }

    /// Inserts a raw value at `index`, shifting later extensible values
    /// up by one. Single-field cycles only, like [`pop`](Self::pop).
    pub fn insert(
        &mut self,
        table: &str,
        pk: &Pk,
        index: usize,
        value: Value,
    ) -> EpmResult<()> {
        let table_index = self.table_index_checked(table)?;
        let slot = self.slot_checked(table_index, pk)?;
        let addr = RecordAddr {
            table: table_index,
            slot,
        };
        let descriptor = Arc::clone(self.tables[table_index].descriptor());
        let cycle_start = self.single_field_cycle_start(&descriptor)?;
        if index < cycle_start {
            return Err(ValidationError::OutsideExtensibleRange {
                table: descriptor.table_ref().to_string(),
                index,
            }
            .into());
        }

        let mut to_shift: Vec<usize> = self.tables[table_index]
            .get(slot)
            .map(|r| r.populated().filter(|&i| i >= index).collect())
            .unwrap_or_default();
        to_shift.sort_unstable_by(|a, b| b.cmp(a));

        // Highest first, so each move lands in a free slot. The record
        // address stays the same, so only hook/link field addresses
        // move.
        for i in to_shift {
            let (state, comment) = {
                let record = self.tables[table_index]
                    .get_mut(slot)
                    .ok_or_else(|| EpmError::internal("record vanished during shift"))?;
                let comment = record.comment(i).map(str::to_string);
                record.set_comment(i, None);
                (record.take_field(i), comment)
            };
            let Some(state) = state else { continue };
            let old = FieldAddr {
                record: addr,
                field: i,
            };
            let new = FieldAddr {
                record: addr,
                field: i + 1,
            };
            match &state {
                FieldValue::Hook(hook) => {
                    self.relations.unregister_record_hook(hook, old);
                    self.relations.register_record_hook(hook, new)?;
                }
                FieldValue::Link(_) => {
                    if let Some(target) = self.relations.unregister_link(old) {
                        self.relations.register_link(new, target);
                    }
                }
                FieldValue::Plain(_) => {}
            }
            if let Some(record) = self.tables[table_index].get_mut(slot) {
                record.set_field(i + 1, state);
                record.set_comment(i + 1, comment);
            }
        }

        let field = descriptor.get_field_descriptor(index)?;
        let state = field.deserialize(
            &value,
            descriptor.table_ref(),
            &descriptor.field_ref_for(index),
            self.options.field_length,
        )?;
        self.attach_field(addr, index, &state)?;
        if let Some(record) = self.tables[table_index].get_mut(slot) {
            record.set_field(index, state);
        }
        Ok(())
    }

    fn single_field_cycle_start(
        &self,
        descriptor: &crate::idd::table::TableDescriptor,
    ) -> Result<usize, ValidationError> {
        match descriptor.extensible_info() {
            Some(ext) if ext.cycle_len() == 1 => Ok(ext.cycle_start()),
            _ => Err(ValidationError::NotExtensible {
                table: descriptor.table_ref().to_string(),
            }),
        }
    }

    // ----- views -------------------------------------------------------

    /// A read view of one record.
    pub fn view(&self, table: &str, pk: &Pk) -> EpmResult<RecordView<'_>> {
        let table_index = self.table_index_checked(table)?;
        let slot = self.slot_checked(table_index, pk)?;
        self.view_at(RecordAddr {
            table: table_index,
            slot,
        })
        .ok_or_else(|| EpmError::internal("pk lookup resolved to a missing record"))
    }

    /// Read views of every record of a table, in primary-key order.
    pub fn views(&self, table: &str) -> EpmResult<Vec<RecordView<'_>>> {
        let table_index = self.table_index_checked(table)?;
        Ok(self.tables[table_index]
            .records()
            .map(|record| RecordView {
                epm: self,
                record,
                addr: RecordAddr {
                    table: table_index,
                    slot: record.slot(),
                },
            })
            .collect())
    }

    fn view_at(&self, addr: RecordAddr) -> Option<RecordView<'_>> {
        let record = self.tables.get(addr.table)?.get(addr.slot)?;
        Some(RecordView {
            epm: self,
            record,
            addr,
        })
    }

    // ----- shared plumbing ---------------------------------------------

    fn slot_checked(&self, table_index: usize, pk: &Pk) -> Result<u64, CardinalityError> {
        self.tables[table_index]
            .slot_of(pk)
            .ok_or_else(|| CardinalityError::NotFound {
                table: self.tables[table_index].table_ref().to_string(),
            })
    }

    /// Activates the relational side of one field state.
    fn attach_field(
        &mut self,
        addr: RecordAddr,
        field: usize,
        state: &FieldValue,
    ) -> EpmResult<()> {
        let faddr = FieldAddr {
            record: addr,
            field,
        };
        match state {
            FieldValue::Hook(hook) => self.register_hook_checked(hook, faddr),
            FieldValue::Link(link) => {
                let target = self
                    .relations
                    .resolve(link.references(), link.value())
                    .ok_or_else(|| ValidationError::UnresolvedLink {
                        table: self.tables[addr.table].table_ref().to_string(),
                        field_index: field,
                        value: link.value().to_string(),
                    })?;
                self.relations.register_link(faddr, target);
                Ok(())
            }
            FieldValue::Plain(_) => Ok(()),
        }
    }

    /// Deactivates the relational side of one field state. Detaching a
    /// hook clears every pointer at the record first: links do not record
    /// which hook key they resolved through.
    fn detach_field(&mut self, addr: RecordAddr, field: usize, state: &FieldValue) {
        let faddr = FieldAddr {
            record: addr,
            field,
        };
        match state {
            FieldValue::Hook(hook) => {
                self.clear_pointing(addr);
                self.relations.unregister_record_hook(hook, faddr);
            }
            FieldValue::Link(_) => {
                self.relations.unregister_link(faddr);
            }
            FieldValue::Plain(_) => {}
        }
    }

    /// Best-effort restore of a detached state during a failed update.
    fn reattach_field(&mut self, addr: RecordAddr, field: usize, state: &FieldValue) {
        let faddr = FieldAddr {
            record: addr,
            field,
        };
        match state {
            FieldValue::Hook(hook) => {
                // The keys were just released, so this cannot clash.
                let _ = self.relations.register_record_hook(hook, faddr);
            }
            FieldValue::Link(link) => {
                if let Some(target) = self.relations.resolve(link.references(), link.value()) {
                    self.relations.register_link(faddr, target);
                }
            }
            FieldValue::Plain(_) => {}
        }
    }

    /// Nulls every field currently pointing at `addr` and drops its link.
    fn clear_pointing(&mut self, addr: RecordAddr) {
        for source in self.relations.links_targeting(addr) {
            self.relations.unregister_link(source);
            if let Some(record) = self
                .tables
                .get_mut(source.record.table)
                .and_then(|t| t.get_mut(source.record.slot))
            {
                record.set_field(source.field, FieldValue::Plain(Value::Null));
            }
        }
    }
}

/// A read view of one record, able to follow links to other views.
#[derive(Clone, Copy)]
pub struct RecordView<'a> {
    epm: &'a Epm,
    record: &'a Record,
    addr: RecordAddr,
}

/// A resolved field value: plain data, or the record/table a pointer
/// field resolves to.
pub enum ValueRef<'a> {
    /// An unset field.
    Null,
    /// An integer value.
    Int(i64),
    /// A floating-point value.
    Real(f64),
    /// A text value, or a pointer that never resolved.
    Str(&'a str),
    /// The record a pointer field resolves to.
    Record(RecordView<'a>),
    /// The table a class-name pointer field resolves to.
    Table(&'a Table),
}

impl<'a> ValueRef<'a> {
    /// Whether the field is unset.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The text value, if this is one.
    #[must_use]
    pub const fn as_str(&self) -> Option<&'a str> {
        match self {
            Self::Str(s) => Some(*s),
            _ => None,
        }
    }

    /// The numeric value widened to f64, if this is numeric.
    #[must_use]
    pub const fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// The resolved record view, if this is a record pointer.
    #[must_use]
    pub const fn as_record(&self) -> Option<RecordView<'a>> {
        match self {
            Self::Record(v) => Some(*v),
            _ => None,
        }
    }
}

impl<'a> RecordView<'a> {
    /// The record's address.
    #[must_use]
    pub const fn addr(&self) -> RecordAddr {
        self.addr
    }

    /// Lowercase ref of the record's table.
    #[must_use]
    pub fn table_ref(&self) -> &'a str {
        self.record.descriptor().table_ref()
    }

    /// The record's primary key.
    #[must_use]
    pub fn pk(&self) -> Pk {
        self.record.pk()
    }

    /// Number of field slots, populated or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.record.len()
    }

    /// Whether the record holds no field slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }

    /// The field's stored value without following links.
    pub fn value(&self, field: impl Into<FieldKey>) -> EpmResult<Value> {
        let index = self.record.resolve_key(&field.into())?;
        Ok(self.record.value(index))
    }

    /// The field's resolved value: pointer fields yield the record or
    /// table they resolve to.
    pub fn get(&self, field: impl Into<FieldKey>) -> EpmResult<ValueRef<'a>> {
        let index = self.record.resolve_key(&field.into())?;
        let Some(state) = self.record.field(index) else {
            return Ok(ValueRef::Null);
        };
        Ok(match state {
            FieldValue::Plain(Value::Null) => ValueRef::Null,
            FieldValue::Plain(Value::Int(v)) => ValueRef::Int(*v),
            FieldValue::Plain(Value::Real(v)) => ValueRef::Real(*v),
            FieldValue::Plain(Value::Str(s)) => ValueRef::Str(s),
            FieldValue::Hook(hook) => ValueRef::Str(hook.value()),
            FieldValue::Link(link) => {
                let faddr = FieldAddr {
                    record: self.addr,
                    field: index,
                };
                match self.epm.relations.link_target(faddr) {
                    Some(LinkTarget::Record(target)) => ValueRef::Record(
                        self.epm
                            .view_at(target)
                            .ok_or_else(|| EpmError::internal("link targets a missing record"))?,
                    ),
                    Some(LinkTarget::Table(t)) => ValueRef::Table(
                        self.epm
                            .tables
                            .get(t)
                            .ok_or_else(|| EpmError::internal("link targets a missing table"))?,
                    ),
                    None => ValueRef::Str(link.value()),
                }
            }
        })
    }

    /// The comment attached to a field, if any.
    #[must_use]
    pub fn comment(&self, index: usize) -> Option<&'a str> {
        self.record.comment(index)
    }

    /// Records this record points at, deduplicated, in field order.
    #[must_use]
    pub fn pointed(&self) -> Vec<RecordView<'a>> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for (field, _) in self.record.links() {
            let faddr = FieldAddr {
                record: self.addr,
                field,
            };
            if let Some(LinkTarget::Record(target)) = self.epm.relations.link_target(faddr) {
                if seen.insert(target) {
                    if let Some(view) = self.epm.view_at(target) {
                        out.push(view);
                    }
                }
            }
        }
        out
    }

    /// Records pointing at this record, deduplicated, in address order.
    #[must_use]
    pub fn pointing(&self) -> Vec<RecordView<'a>> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for source in self.epm.relations.links_targeting(self.addr) {
            if seen.insert(source.record) {
                if let Some(view) = self.epm.view_at(source.record) {
                    out.push(view);
                }
            }
        }
        out
    }
}

impl std::fmt::Debug for RecordView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordView")
            .field("table", &self.table_ref())
            .field("pk", &self.pk())
            .finish()
    }
}
