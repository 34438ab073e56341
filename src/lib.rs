//! # epmodel - Schema-driven building-energy input models
//!
//! epmodel is an in-memory, typed model of the text input format used by
//! building energy simulation engines. A schema dictionary ([`Idd`])
//! describes every record type and field; a model ([`Epm`]) holds the
//! records of one input document, keeps primary keys unique, and
//! maintains referential integrity between records through hooks
//! (reference targets) and links (pointers). The codec parses documents
//! into models and serializes models back to text, preserving comments.
//!
//! ## Core Concepts
//!
//! - **Idd**: the parsed schema dictionary, one descriptor per table
//! - **Table**: all records of one descriptor, indexed by primary key
//! - **Record**: one instance, sparse field storage, pk from its name field
//! - **Hook / Link**: the two halves of a reference, matched by tag names
//! - **Epm**: the model; transactional batch creation, cascade deletion
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use epmodel::{Epm, Idd, Pk};
//!
//! let idd = Arc::new(Idd::parse(
//!     "Zone,\n   A1, \\field Name\n       \\required-field\n       \\reference ZoneNames\n",
//! )?);
//!
//! let mut epm = Epm::new(idd);
//! epm.add("Zone", vec!["Kitchen".into()])?;
//!
//! let zone = epm.view("Zone", &Pk::from("kitchen"))?;
//! assert_eq!(zone.pk(), Pk::from("kitchen"));
//! # Ok::<(), epmodel::EpmError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod idd;
pub mod record;
pub mod relations;
pub mod table;
pub mod value;

pub mod model;

mod codec;

// Re-export primary types at crate root for convenience
pub use error::{
    CardinalityError, EpmError, EpmResult, ReferentialError, SchemaParseError, ValidationError,
};
pub use idd::cache::IddCache;
pub use idd::field::{BasicType, DetailedType, FieldDescriptor, FieldValue, MAX_FIELD_LENGTH};
pub use idd::table::TableDescriptor;
pub use idd::{Idd, IddVersion};
pub use model::{CheckOptions, Epm, RecordView, ValueRef};
pub use record::{FieldKey, Pk, Record};
pub use relations::{FieldAddr, Hook, Link, LinkTarget, RecordAddr, RelationsManager};
pub use table::Table;
pub use value::Value;
