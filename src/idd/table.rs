//! Table descriptors: the ordered field list for one record type, plus
//! extensible-cycle detection.
//!
//! An "extensible" table ends in a repeating group of fields whose
//! instance count is not fixed by the schema. Detection runs once after
//! all fields are loaded: the cycle length comes from an `extensible:N`
//! tag, the cycle start from the field tagged `begin-extensible`, and a
//! name pattern is recorded per cycle offset (the numeral in the field
//! ref replaced by a capture group). Two documented correction heuristics
//! repair grammars that disagree with this algorithm; a correction is
//! always logged.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::warn;

use crate::error::{SchemaParseError, ValidationError};
use crate::idd::field::{derive_ref, FieldDescriptor};

/// One name pattern of an extensible cycle offset.
#[derive(Debug)]
struct NamePattern {
    prefix: String,
    suffix: String,
    regex: Regex,
}

impl NamePattern {
    fn new(prefix: &str, suffix: &str) -> Self {
        let regex = Regex::new(&format!(
            "^{}(\\d+){}$",
            regex::escape(prefix),
            regex::escape(suffix)
        ))
        .unwrap_or_else(|_| unreachable!("escaped pattern is always valid"));
        Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            regex,
        }
    }

    /// Extracts the cycle number from a synthetic field name.
    fn cycle_number(&self, name: &str) -> Option<usize> {
        let caps = self.regex.captures(name)?;
        caps.get(1)?.as_str().parse().ok().filter(|&n| n >= 1)
    }

    /// Synthesizes the field ref for cycle number `n`.
    fn synthesize(&self, n: usize) -> String {
        format!("{}{}{}", self.prefix, n, self.suffix)
    }
}

/// The repeating-group geometry of an extensible table.
#[derive(Debug)]
pub struct ExtensibleInfo {
    cycle_start: usize,
    cycle_len: usize,
    patterns: Vec<NamePattern>,
}

impl ExtensibleInfo {
    /// Index of the first repeating field.
    #[must_use]
    pub const fn cycle_start(&self) -> usize {
        self.cycle_start
    }

    /// Number of fields in one repeating group.
    #[must_use]
    pub const fn cycle_len(&self) -> usize {
        self.cycle_len
    }
}

/// Ordered list of field descriptors for one record type.
#[derive(Debug)]
pub struct TableDescriptor {
    table_name: String,
    table_ref: String,
    group_name: Option<String>,
    fields: Vec<FieldDescriptor>,
    tags: BTreeMap<String, Vec<String>>,
    extensible: Option<ExtensibleInfo>,
}

/// Splits a field ref around its first numeral run.
fn split_numeral(field_ref: &str) -> Option<(&str, &str, &str)> {
    let start = field_ref.find(|c: char| c.is_ascii_digit())?;
    let rest = &field_ref[start..];
    let len = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    Some((
        &field_ref[..start],
        &field_ref[start..start + len],
        &field_ref[start + len..],
    ))
}

impl TableDescriptor {
    #[must_use]
    pub fn new(table_name: impl Into<String>, group_name: Option<String>) -> Self {
        let table_name = table_name.into();
        let table_ref = derive_ref(&table_name);
        Self {
            table_name,
            table_ref,
            group_name,
            fields: Vec::new(),
            tags: BTreeMap::new(),
            extensible: None,
        }
    }

    /// Display name as declared in the grammar.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Identifier-safe form of the table name.
    #[must_use]
    pub fn table_ref(&self) -> &str {
        &self.table_ref
    }

    /// The grammar group this table was declared under.
    #[must_use]
    pub fn group_name(&self) -> Option<&str> {
        self.group_name.as_deref()
    }

    /// Appends a field descriptor.
    pub fn add_field(&mut self, field: FieldDescriptor) {
        self.fields.push(field);
    }

    /// Appends one table-level tag occurrence.
    pub fn add_tag(&mut self, tag: impl Into<String>, value: Option<String>) {
        let values = self.tags.entry(tag.into()).or_default();
        if let Some(v) = value {
            values.push(v);
        }
    }

    /// Replaces a table-level tag key (correction pass only).
    pub fn replace_tag_key(&mut self, old: &str, new: impl Into<String>) {
        if let Some(values) = self.tags.remove(old) {
            self.tags.insert(new.into(), values);
        }
    }

    /// Whether the table-level tag appears at least once.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    /// Tag keys, used by the correction pass to locate `extensible:N`.
    pub fn tag_keys(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    /// Number of stored (declared, post-trim) fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// The stored field descriptors in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub(crate) fn field_mut(&mut self, index: usize) -> Option<&mut FieldDescriptor> {
        self.fields.get_mut(index)
    }

    pub(crate) fn fields_mut(&mut self) -> &mut [FieldDescriptor] {
        &mut self.fields
    }

    /// The detected repeating-group geometry, if any.
    #[must_use]
    pub const fn extensible_info(&self) -> Option<&ExtensibleInfo> {
        self.extensible.as_ref()
    }

    /// Whether this table ends in a repeating field group.
    #[must_use]
    pub const fn is_extensible(&self) -> bool {
        self.extensible.is_some()
    }

    /// Whether records of this table take their identity from field 0.
    #[must_use]
    pub fn has_named_pk(&self) -> bool {
        self.fields.first().is_some_and(|f| {
            f.is_required() && f.detailed_type() == crate::idd::field::DetailedType::Reference
        })
    }

    /// Resolves a field name to its index.
    ///
    /// Tries an exact ref match over the stored fields first, then a
    /// pattern match against the extensible cycle: `vertex_3_x` resolves
    /// through the `vertex_(\d+)_x` pattern to the third cycle instance.
    pub fn get_field_index(&self, name: &str) -> Result<usize, ValidationError> {
        if let Some(i) = self
            .fields
            .iter()
            .position(|f| f.field_ref() == Some(name))
        {
            return Ok(i);
        }
        if let Some(ext) = &self.extensible {
            for (offset, pattern) in ext.patterns.iter().enumerate() {
                if let Some(n) = pattern.cycle_number(name) {
                    return Ok(ext.cycle_start + (n - 1) * ext.cycle_len + offset);
                }
            }
        }
        Err(ValidationError::UnknownField {
            table: self.table_ref.clone(),
            field: name.to_string(),
        })
    }

    /// Returns the descriptor governing field `index`.
    ///
    /// Indexes beyond the stored list reduce modulo the cycle length
    /// relative to the cycle start.
    pub fn get_field_descriptor(&self, index: usize) -> Result<&FieldDescriptor, ValidationError> {
        if let Some(f) = self.fields.get(index) {
            return Ok(f);
        }
        if let Some(ext) = &self.extensible {
            if index >= ext.cycle_start {
                let reduced = ext.cycle_start + (index - ext.cycle_start) % ext.cycle_len;
                if let Some(f) = self.fields.get(reduced) {
                    return Ok(f);
                }
            }
        }
        Err(ValidationError::UnknownField {
            table: self.table_ref.clone(),
            field: index.to_string(),
        })
    }

    /// The ref for field `index`, synthesizing extensible-cycle names
    /// (`vertex_3_x` for the third instance of the `vertex_1_x` slot).
    #[must_use]
    pub fn field_ref_for(&self, index: usize) -> String {
        if let Some(ext) = &self.extensible {
            if index >= ext.cycle_start {
                let offset = (index - ext.cycle_start) % ext.cycle_len;
                let n = (index - ext.cycle_start) / ext.cycle_len + 1;
                if let Some(pattern) = ext.patterns.get(offset) {
                    return pattern.synthesize(n);
                }
            }
        }
        self.fields
            .get(index)
            .map_or_else(|| format!("field_{index}"), FieldDescriptor::ref_or_index)
    }

    /// Rounds `highest` (a populated index) up to the end of its cycle.
    /// Non-extensible tables, and indexes before the cycle, round to the
    /// base field count.
    #[must_use]
    pub fn cycle_end_for(&self, highest: usize) -> usize {
        if let Some(ext) = &self.extensible {
            if highest >= ext.cycle_start {
                let groups = (highest - ext.cycle_start) / ext.cycle_len + 1;
                return ext.cycle_start + groups * ext.cycle_len;
            }
        }
        self.fields.len()
    }

    /// Detects the extensible cycle from tags, applying the two
    /// documented correction heuristics, then discards the grammar's
    /// arbitrarily-repeated example fields beyond the first cycle.
    ///
    /// Runs once, after the correction pass, before first use.
    pub fn detect_extensible(&mut self) -> Result<(), SchemaParseError> {
        let Some(raw_len) = self.declared_cycle_len()? else {
            return Ok(());
        };
        let Some(mut cycle_start) = self
            .fields
            .iter()
            .position(|f| f.has_tag("begin-extensible"))
        else {
            warn!(
                table = %self.table_ref,
                "extensible tag without begin-extensible marker; treating as non-extensible"
            );
            return Ok(());
        };

        let mut cycle_len = raw_len.min(self.fields.len() - cycle_start);
        if cycle_len == 0 {
            return Ok(());
        }

        let mut parts = Vec::with_capacity(cycle_len);
        for offset in 0..cycle_len {
            let field_ref = self.fields[cycle_start + offset].ref_or_index();
            match split_numeral(&field_ref) {
                Some((prefix, numeral, suffix)) => {
                    parts.push((prefix.to_string(), numeral.to_string(), suffix.to_string()));
                }
                None => {
                    warn!(
                        table = %self.table_ref,
                        field = %field_ref,
                        "extensible cycle field has no numeral; treating as non-extensible"
                    );
                    return Ok(());
                }
            }
        }

        // Heuristic 1: the grammar claims a multi-field cycle but the
        // cycle fields carry different numerals, meaning they are
        // repetitions of a single pattern, not distinct members.
        if cycle_len > 1 && parts.iter().any(|(_, n, _)| *n != parts[0].1) {
            warn!(
                table = %self.table_ref,
                claimed = cycle_len,
                "extensible cycle length disagrees with field numerals; forcing cycle length 1"
            );
            cycle_len = 1;
            parts.truncate(1);
        }

        // Heuristic 2: the begin-extensible marker does not sit on the
        // first cycle instance. Search backward for the true start.
        if parts[0].1 != "1" {
            let (prefix, _, suffix) = parts[0].clone();
            let true_start = (0..cycle_start).rev().find(|&i| {
                let field_ref = self.fields[i].ref_or_index();
                split_numeral(&field_ref)
                    .is_some_and(|(p, n, s)| p == prefix && s == suffix && n == "1")
            });
            match true_start {
                Some(i) => {
                    warn!(
                        table = %self.table_ref,
                        marked = cycle_start,
                        corrected = i,
                        "begin-extensible marker misplaced; forcing cycle length 1"
                    );
                    cycle_start = i;
                    cycle_len = 1;
                    parts = vec![(prefix.clone(), "1".to_string(), suffix.clone())];
                }
                None => {
                    warn!(
                        table = %self.table_ref,
                        "first extensible field numeral is not 1 and no true start found"
                    );
                }
            }
        }

        let patterns = parts
            .iter()
            .map(|(prefix, _, suffix)| NamePattern::new(prefix, suffix))
            .collect();

        // Everything past the first cycle is the grammar's repeated
        // example, not independent fields.
        self.fields.truncate(cycle_start + cycle_len);

        self.extensible = Some(ExtensibleInfo {
            cycle_start,
            cycle_len,
            patterns,
        });
        Ok(())
    }

    fn declared_cycle_len(&self) -> Result<Option<usize>, SchemaParseError> {
        for tag in self.tags.keys() {
            if let Some(raw) = tag.strip_prefix("extensible:") {
                let digits: String = raw.chars().take_while(char::is_ascii_digit).collect();
                return digits
                    .parse::<usize>()
                    .ok()
                    .filter(|&n| n >= 1)
                    .map(Some)
                    .ok_or_else(|| SchemaParseError::BadExtensibleTag {
                        table: self.table_ref.clone(),
                        tag: tag.clone(),
                    });
            }
        }
        Ok(None)
    }
}
