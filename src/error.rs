//! Error types for epmodel.
//!
//! All errors are strongly typed using thiserror. Each branch of the
//! taxonomy gets its own enum so callers can pattern match on specific
//! conditions, and every validation error carries the table/field/value
//! context needed for diagnosis.

use thiserror::Error;

/// Fatal errors raised while parsing the schema grammar.
///
/// The grammar is assumed internally consistent modulo the documented
/// correction table, so none of these are recoverable: a schema-load
/// failure aborts the load and no partial schema is usable.
#[derive(Debug, Error)]
pub enum SchemaParseError {
    /// A line matches no grammar construct.
    #[error("Line {line_no} does not match any grammar construct: {content:?}")]
    UnmatchedLine {
        /// One-based line number.
        line_no: usize,
        /// The offending line.
        content: String,
    },

    /// A tag line precedes the first table declaration.
    #[error("Line {line_no}: tag '\\{tag}' appears before any table declaration")]
    TagOutsideTable {
        /// One-based line number.
        line_no: usize,
        /// The orphaned tag.
        tag: String,
    },

    /// A field declaration precedes the first table declaration.
    #[error("Line {line_no}: field declaration appears before any table declaration")]
    FieldOutsideTable {
        /// One-based line number.
        line_no: usize,
    },

    /// An `extensible:N` tag does not carry a positive cycle length.
    #[error("Table '{table}' carries a malformed extensible tag: '\\{tag}'")]
    BadExtensibleTag {
        /// Ref of the offending table.
        table: String,
        /// The malformed tag.
        tag: String,
    },

    /// The grammar file could not be read.
    #[error("Failed to read schema file: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while validating field values or record mutations.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A text value exceeds the maximum field length.
    #[error("{table}.{field}: value {value:?} exceeds the maximum length of {max_length}")]
    FieldTooLong {
        /// Table ref.
        table: String,
        /// Field ref.
        field: String,
        /// The offending value.
        value: String,
        /// The enforced limit.
        max_length: usize,
    },

    /// A value of the wrong kind was given for a field.
    #[error("{table}.{field}: expected a {expected} value, got {value}")]
    WrongValueType {
        /// Table ref.
        table: String,
        /// Field ref.
        field: String,
        /// Expected kind.
        expected: &'static str,
        /// The offending value.
        value: String,
    },

    /// A numeric field received an unparseable value.
    #[error("{table}.{field}: {value:?} is not a valid {expected}")]
    NotANumber {
        /// Table ref.
        table: String,
        /// Field ref.
        field: String,
        /// Expected numeric kind.
        expected: &'static str,
        /// The offending value.
        value: String,
    },

    /// A record leaves a required field unset.
    #[error("{table}: required field '{field}' is missing")]
    MissingRequiredField {
        /// Table ref.
        table: String,
        /// Field ref.
        field: String,
    },

    /// A record's primary key is already taken.
    #[error("{table}: a record with primary key {pk:?} already exists")]
    DuplicatePrimaryKey {
        /// Table ref.
        table: String,
        /// The clashing key.
        pk: String,
    },

    /// Two records declare the same value under one reference set.
    #[error("Reference ({reference}, {value:?}) is declared by both {first} and {second}")]
    DuplicateReferenceValue {
        /// Reference set name.
        reference: String,
        /// The clashing value.
        value: String,
        /// `table.pk` of the record holding the value.
        first: String,
        /// `table.pk` of the record refused.
        second: String,
    },

    /// A pointer value matches no registered hook.
    #[error("{table}: field {field_index} value {value:?} does not resolve to any record")]
    UnresolvedLink {
        /// Table ref of the pointing record.
        table: String,
        /// Index of the pointer field.
        field_index: usize,
        /// The unresolvable value.
        value: String,
    },

    /// No field with the given name or index exists.
    #[error("{table}: no field named or indexed '{field}'")]
    UnknownField {
        /// Table ref.
        table: String,
        /// The unknown name or index.
        field: String,
    },

    /// No table with the given name exists in the schema.
    #[error("No table with reference '{table}'")]
    UnknownTable {
        /// The unknown name.
        table: String,
    },

    /// An extensible operation was applied to a non-extensible table.
    #[error("{table}: table is not extensible")]
    NotExtensible {
        /// Table ref.
        table: String,
    },

    /// An index falls outside a table's extensible cycle region.
    #[error("{table}: index {index} is outside the extensible cycle region")]
    OutsideExtensibleRange {
        /// Table ref.
        table: String,
        /// The offending index.
        index: usize,
    },
}

/// A single-result query matched zero or more than one record.
#[derive(Debug, Error)]
pub enum CardinalityError {
    /// No record matched.
    #[error("{table}: no record matches")]
    NotFound {
        /// Table ref.
        table: String,
    },

    /// More than one record matched.
    #[error("{table}: {matched} records match where exactly one was expected")]
    Ambiguous {
        /// Table ref.
        table: String,
        /// Number of matches.
        matched: usize,
    },
}

/// Referential-integrity refusals.
#[derive(Debug, Error)]
pub enum ReferentialError {
    /// A strict delete targeted a record other records point at.
    #[error("{table}.{pk} is pointed at by {pointing} record(s) and cannot be deleted strictly")]
    PointedRecordDelete {
        /// Table ref.
        table: String,
        /// Primary key of the pointed record.
        pk: String,
        /// Number of pointers at it.
        pointing: usize,
    },

    /// A hook key is already registered.
    #[error("Reference ({reference}, {value:?}) is already claimed")]
    ReferenceAlreadyClaimed {
        /// Reference set name.
        reference: String,
        /// The claimed value.
        value: String,
    },
}

/// Top-level error type for epmodel.
///
/// This enum encompasses all possible errors that can occur when loading,
/// mutating, querying, or saving a model.
#[derive(Debug, Error)]
pub enum EpmError {
    /// A schema grammar failure.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaParseError),

    /// A value or mutation validation failure.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A single-result query mismatch.
    #[error("Cardinality error: {0}")]
    Cardinality(#[from] CardinalityError),

    /// A referential-integrity refusal.
    #[error("Referential error: {0}")]
    Referential(#[from] ReferentialError),

    /// A document file could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal invariant was broken.
    #[error("Internal error: {message}")]
    Internal {
        /// What was broken.
        message: String,
    },
}

impl EpmError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a schema parse error.
    #[must_use]
    pub const fn is_schema(&self) -> bool {
        matches!(self, Self::Schema(_))
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a cardinality error.
    #[must_use]
    pub const fn is_cardinality(&self) -> bool {
        matches!(self, Self::Cardinality(_))
    }

    /// Returns true if this is a referential error.
    #[must_use]
    pub const fn is_referential(&self) -> bool {
        matches!(self, Self::Referential(_))
    }
}

/// Result type alias for epmodel operations.
pub type EpmResult<T> = Result<T, EpmError>;
