//! Field descriptors: one schema field and its deserialization rules.
//!
//! A [`FieldDescriptor`] knows its basic kind (text or numeric, from the
//! `A`/`N` grammar letter), its tags, and its derived detailed type. Its
//! [`deserialize`](FieldDescriptor::deserialize) method turns a raw value
//! into the canonical in-model [`FieldValue`]: a plain value, a [`Hook`]
//! for reference fields, or a [`Link`] for object-list fields. It is pure
//! construction; hook/link activation happens later in the model.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::ValidationError;
use crate::relations::{Hook, Link};
use crate::value::Value;

/// Maximum length of a text field value.
pub const MAX_FIELD_LENGTH: usize = 100;

/// Sentinel strings that numeric fields pass through unparsed.
const NUMERIC_SENTINELS: [&str; 3] = ["autocalculate", "autosize", "useweatherfile"];

/// The canonical in-model value of one field.
///
/// A closed sum: plain values for ordinary fields, a [`Hook`] for fields
/// whose value is a reference target, a [`Link`] for fields that point
/// at another record or table.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// An ordinary value.
    Plain(Value),
    /// A reference-target value.
    Hook(Hook),
    /// A pointer value.
    Link(Link),
}

impl FieldValue {
    /// Whether this field holds no value.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Plain(Value::Null))
    }

    /// The field's value without following links: hooks and links yield
    /// their stored string.
    #[must_use]
    pub fn local_value(&self) -> Value {
        match self {
            Self::Plain(v) => v.clone(),
            Self::Hook(h) => Value::Str(h.value().to_string()),
            Self::Link(l) => Value::Str(l.value().to_string()),
        }
    }

    #[must_use]
    pub const fn as_hook(&self) -> Option<&Hook> {
        match self {
            Self::Hook(h) => Some(h),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_link(&self) -> Option<&Link> {
        match self {
            Self::Link(l) => Some(l),
            _ => None,
        }
    }
}

/// Basic field kind, from the grammar's `A`/`N` letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicType {
    /// `A` fields: text.
    Text,
    /// `N` fields: numeric.
    Numeric,
}

impl BasicType {
    /// Maps a grammar letter to the basic type.
    #[must_use]
    pub const fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'A' => Some(Self::Text),
            'N' => Some(Self::Numeric),
            _ => None,
        }
    }
}

/// Derived detailed field type.
///
/// Precedence: reference tag, then declared `type` tag, then `key`
/// (choice), then `object-list`, then `external-list`, then the basic
/// type fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailedType {
    /// An integer number.
    Integer,
    /// A real number.
    Real,
    /// Free text.
    Alpha,
    /// One of the declared `key` choices.
    Choice,
    /// A reference target; values become hooks.
    Reference,
    /// A pointer through an `object-list`; values become links.
    ObjectList,
    /// A value validated against an external list.
    ExternalList,
    /// A node name.
    Node,
}

impl DetailedType {
    /// Whether values of this type must be text.
    #[must_use]
    pub const fn is_textual(&self) -> bool {
        !matches!(self, Self::Integer | Self::Real)
    }
}

/// One schema field.
#[derive(Debug)]
pub struct FieldDescriptor {
    index: usize,
    basic_type: BasicType,
    name: Option<String>,
    field_ref: Option<String>,
    tags: BTreeMap<String, Vec<String>>,
    detailed: OnceLock<DetailedType>,
}

/// Derives the identifier-safe ref from a display name: lowercased, with
/// every non-alphanumeric run replaced by a single underscore.
#[must_use]
pub fn derive_ref(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Collapses internal whitespace to single spaces, trims, and
/// transliterates to ASCII. No transliteration crate exists in this
/// stack, so the fold covers the Latin-1 letters the input format
/// actually carries and drops anything else non-ASCII.
#[must_use]
pub fn normalize_text(raw: &str) -> String {
    let collapsed: Vec<&str> = raw.split_whitespace().collect();
    let collapsed = collapsed.join(" ");
    let mut out = String::with_capacity(collapsed.len());
    for c in collapsed.chars() {
        if c.is_ascii() {
            out.push(c);
        } else if let Some(folded) = fold_latin(c) {
            out.push(folded);
        }
    }
    out
}

const fn fold_latin(c: char) -> Option<char> {
    Some(match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        'ß' => 's',
        '°' => ' ',
        _ => return None,
    })
}

impl FieldDescriptor {
    /// Creates a descriptor; `name` is `None` for anonymous fields from
    /// unnamed-field runs.
    #[must_use]
    pub fn new(index: usize, basic_type: BasicType, name: Option<String>) -> Self {
        let field_ref = name.as_deref().map(derive_ref);
        Self {
            index,
            basic_type,
            name,
            field_ref,
            tags: BTreeMap::new(),
            detailed: OnceLock::new(),
        }
    }

    /// Position of this field in its table's declaration order.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// The basic kind from the grammar letter.
    #[must_use]
    pub const fn basic_type(&self) -> BasicType {
        self.basic_type
    }

    /// The declared display name, absent for anonymous fields.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The identifier-safe ref, absent for anonymous fields.
    #[must_use]
    pub fn field_ref(&self) -> Option<&str> {
        self.field_ref.as_deref()
    }

    /// The ref, or `field_<index>` for anonymous fields.
    #[must_use]
    pub fn ref_or_index(&self) -> String {
        self.field_ref
            .clone()
            .unwrap_or_else(|| format!("field_{}", self.index))
    }

    /// Sets the display name (used by correction entries and the parser's
    /// `\field` tag).
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.field_ref = Some(derive_ref(&name));
        self.name = Some(name);
    }

    /// Appends one tag occurrence. Bare tags carry no value.
    pub fn add_tag(&mut self, tag: impl Into<String>, value: Option<String>) {
        let values = self.tags.entry(tag.into()).or_default();
        if let Some(v) = value {
            values.push(v);
        }
    }

    /// Drops a tag entirely (correction pass only).
    pub fn remove_tag(&mut self, tag: &str) {
        self.tags.remove(tag);
    }

    /// Whether the tag appears at least once.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    /// All values attached to a tag (empty slice for bare tags).
    #[must_use]
    pub fn tag_values(&self, tag: &str) -> &[String] {
        self.tags.get(tag).map_or(&[], Vec::as_slice)
    }

    /// The first value of a tag.
    #[must_use]
    pub fn first_tag(&self, tag: &str) -> Option<&str> {
        self.tags.get(tag)?.first().map(String::as_str)
    }

    /// Whether a record must populate this field.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.has_tag("required-field")
    }

    /// Whether text values skip case folding.
    #[must_use]
    pub fn retains_case(&self) -> bool {
        self.has_tag("retaincase")
    }

    /// Raw `default` tag value, if declared.
    #[must_use]
    pub fn default_raw(&self) -> Option<&str> {
        self.first_tag("default")
    }

    /// Reference names this field is a target under.
    #[must_use]
    pub fn references(&self) -> &[String] {
        self.tag_values("reference")
    }

    /// Class-level reference names (`reference-class-name`).
    #[must_use]
    pub fn class_references(&self) -> &[String] {
        self.tag_values("reference-class-name")
    }

    /// Reference names this field may point through (`object-list`).
    #[must_use]
    pub fn object_lists(&self) -> &[String] {
        self.tag_values("object-list")
    }

    /// The derived detailed type. Computed once on first use and memoized;
    /// corrections must run before the first access.
    pub fn detailed_type(&self) -> DetailedType {
        *self.detailed.get_or_init(|| self.compute_detailed_type())
    }

    fn compute_detailed_type(&self) -> DetailedType {
        if self.has_tag("reference") || self.has_tag("reference-class-name") {
            return DetailedType::Reference;
        }
        if let Some(declared) = self.first_tag("type") {
            match declared.to_lowercase().as_str() {
                "integer" => return DetailedType::Integer,
                "real" => return DetailedType::Real,
                "alpha" => return DetailedType::Alpha,
                "choice" => return DetailedType::Choice,
                "object-list" => return DetailedType::ObjectList,
                "external-list" => return DetailedType::ExternalList,
                "node" => return DetailedType::Node,
                _ => {}
            }
        }
        if self.has_tag("key") {
            return DetailedType::Choice;
        }
        if self.has_tag("object-list") {
            return DetailedType::ObjectList;
        }
        if self.has_tag("external-list") {
            return DetailedType::ExternalList;
        }
        match self.basic_type {
            BasicType::Numeric => DetailedType::Real,
            BasicType::Text => DetailedType::Alpha,
        }
    }

    /// Deserializes a raw value into this field's canonical form.
    ///
    /// `field_ref` is the caller-resolved ref (extensible-cycle naming
    /// applied) used in error context. `check_length` disables the
    /// 100-character limit when false.
    pub fn deserialize(
        &self,
        raw: &Value,
        table_ref: &str,
        field_ref: &str,
        check_length: bool,
    ) -> Result<FieldValue, ValidationError> {
        match raw {
            Value::Null => Ok(FieldValue::Plain(Value::Null)),
            Value::Str(s) => self.deserialize_text(s, table_ref, field_ref, check_length),
            Value::Int(i) => self.deserialize_int(*i, table_ref, field_ref),
            Value::Real(r) => self.deserialize_real(*r, table_ref, field_ref),
        }
    }

    fn deserialize_text(
        &self,
        raw: &str,
        table_ref: &str,
        field_ref: &str,
        check_length: bool,
    ) -> Result<FieldValue, ValidationError> {
        let normalized = normalize_text(raw);
        if normalized.is_empty() {
            return Ok(FieldValue::Plain(Value::Null));
        }
        let folded = if self.retains_case() {
            normalized
        } else {
            normalized.to_lowercase()
        };
        if check_length && folded.chars().count() > MAX_FIELD_LENGTH {
            return Err(ValidationError::FieldTooLong {
                table: table_ref.to_string(),
                field: field_ref.to_string(),
                value: folded,
                max_length: MAX_FIELD_LENGTH,
            });
        }

        match self.detailed_type() {
            DetailedType::Integer => {
                if is_sentinel(&folded) {
                    return Ok(FieldValue::Plain(Value::Str(folded)));
                }
                if let Ok(i) = folded.parse::<i64>() {
                    return Ok(FieldValue::Plain(Value::Int(i)));
                }
                // An integer field accepts an integral float.
                match folded.parse::<f64>() {
                    Ok(f) if f.fract() == 0.0 => Ok(FieldValue::Plain(Value::Int(f as i64))),
                    _ => Err(ValidationError::NotANumber {
                        table: table_ref.to_string(),
                        field: field_ref.to_string(),
                        expected: "integer",
                        value: folded,
                    }),
                }
            }
            DetailedType::Real => {
                if is_sentinel(&folded) {
                    return Ok(FieldValue::Plain(Value::Str(folded)));
                }
                match folded.parse::<f64>() {
                    Ok(f) => Ok(FieldValue::Plain(Value::Real(f))),
                    Err(_) => Err(ValidationError::NotANumber {
                        table: table_ref.to_string(),
                        field: field_ref.to_string(),
                        expected: "real number",
                        value: folded,
                    }),
                }
            }
            DetailedType::Alpha
            | DetailedType::Choice
            | DetailedType::Node
            | DetailedType::ExternalList => Ok(FieldValue::Plain(Value::Str(folded))),
            DetailedType::Reference => Ok(FieldValue::Hook(Hook::new(
                self.references().to_vec(),
                folded,
            ))),
            DetailedType::ObjectList => Ok(FieldValue::Link(Link::new(
                self.object_lists().to_vec(),
                folded,
            ))),
        }
    }

    fn deserialize_int(
        &self,
        raw: i64,
        table_ref: &str,
        field_ref: &str,
    ) -> Result<FieldValue, ValidationError> {
        match self.detailed_type() {
            DetailedType::Integer => Ok(FieldValue::Plain(Value::Int(raw))),
            DetailedType::Real => Ok(FieldValue::Plain(Value::Real(raw as f64))),
            _ => Err(ValidationError::WrongValueType {
                table: table_ref.to_string(),
                field: field_ref.to_string(),
                expected: "text",
                value: raw.to_string(),
            }),
        }
    }

    fn deserialize_real(
        &self,
        raw: f64,
        table_ref: &str,
        field_ref: &str,
    ) -> Result<FieldValue, ValidationError> {
        match self.detailed_type() {
            DetailedType::Real => Ok(FieldValue::Plain(Value::Real(raw))),
            DetailedType::Integer => {
                if raw.fract() == 0.0 {
                    Ok(FieldValue::Plain(Value::Int(raw as i64)))
                } else {
                    Err(ValidationError::NotANumber {
                        table: table_ref.to_string(),
                        field: field_ref.to_string(),
                        expected: "integer",
                        value: raw.to_string(),
                    })
                }
            }
            _ => Err(ValidationError::WrongValueType {
                table: table_ref.to_string(),
                field: field_ref.to_string(),
                expected: "text",
                value: raw.to_string(),
            }),
        }
    }
}

fn is_sentinel(folded: &str) -> bool {
    let lower = folded.to_lowercase();
    NUMERIC_SENTINELS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_field(index: usize, name: &str) -> FieldDescriptor {
        FieldDescriptor::new(index, BasicType::Text, Some(name.to_string()))
    }

    fn numeric_field(index: usize, name: &str) -> FieldDescriptor {
        FieldDescriptor::new(index, BasicType::Numeric, Some(name.to_string()))
    }

    #[test]
    fn test_derive_ref() {
        assert_eq!(derive_ref("Zone Name"), "zone_name");
        assert_eq!(derive_ref("Vertex 1 X-coordinate"), "vertex_1_x_coordinate");
        assert_eq!(derive_ref("Name"), "name");
    }

    #[test]
    fn test_detailed_type_precedence_reference_wins() {
        let mut f = text_field(0, "Name");
        f.add_tag("type", Some("alpha".to_string()));
        f.add_tag("reference", Some("ZoneNames".to_string()));
        assert_eq!(f.detailed_type(), DetailedType::Reference);
    }

    #[test]
    fn test_detailed_type_declared_type() {
        let mut f = numeric_field(1, "Count");
        f.add_tag("type", Some("integer".to_string()));
        assert_eq!(f.detailed_type(), DetailedType::Integer);
    }

    #[test]
    fn test_detailed_type_key_means_choice() {
        let mut f = text_field(1, "Mode");
        f.add_tag("key", Some("Continuous".to_string()));
        f.add_tag("key", Some("Discrete".to_string()));
        assert_eq!(f.detailed_type(), DetailedType::Choice);
    }

    #[test]
    fn test_detailed_type_object_list() {
        let mut f = text_field(1, "Zone Name");
        f.add_tag("object-list", Some("ZoneNames".to_string()));
        assert_eq!(f.detailed_type(), DetailedType::ObjectList);
    }

    #[test]
    fn test_detailed_type_fallbacks() {
        assert_eq!(text_field(0, "X").detailed_type(), DetailedType::Alpha);
        assert_eq!(numeric_field(0, "X").detailed_type(), DetailedType::Real);
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  a   b\t c "), "a b c");
        assert_eq!(normalize_text("Café"), "Cafe");
        assert_eq!(normalize_text("日本"), "");
    }

    #[test]
    fn test_deserialize_case_folds() {
        let f = text_field(0, "Name");
        let v = f
            .deserialize(&Value::Str("MixedCase".into()), "zone", "name", true)
            .unwrap();
        assert_eq!(v, FieldValue::Plain(Value::Str("mixedcase".into())));
    }

    #[test]
    fn test_deserialize_retaincase() {
        let mut f = text_field(0, "Name");
        f.add_tag("retaincase", None);
        let v = f
            .deserialize(&Value::Str("MixedCase".into()), "zone", "name", true)
            .unwrap();
        assert_eq!(v, FieldValue::Plain(Value::Str("MixedCase".into())));
    }

    #[test]
    fn test_deserialize_empty_becomes_null() {
        let f = text_field(0, "Name");
        let v = f
            .deserialize(&Value::Str("   ".into()), "zone", "name", true)
            .unwrap();
        assert!(v.is_null());
    }

    #[test]
    fn test_deserialize_too_long() {
        let f = text_field(0, "Name");
        let long = "x".repeat(MAX_FIELD_LENGTH + 1);
        let err = f
            .deserialize(&Value::Str(long.clone()), "zone", "name", true)
            .unwrap_err();
        match err {
            ValidationError::FieldTooLong { table, field, .. } => {
                assert_eq!(table, "zone");
                assert_eq!(field, "name");
            }
            other => panic!("unexpected error: {other}"),
        }

        // Length checking disabled by the caller.
        assert!(f
            .deserialize(&Value::Str(long), "zone", "name", false)
            .is_ok());
    }

    #[test]
    fn test_deserialize_numeric_sentinels() {
        let mut f = numeric_field(1, "Capacity");
        f.add_tag("type", Some("real".to_string()));
        let v = f
            .deserialize(&Value::Str("Autosize".into()), "coil", "capacity", true)
            .unwrap();
        assert_eq!(v, FieldValue::Plain(Value::Str("autosize".into())));
    }

    #[test]
    fn test_deserialize_integer_accepts_integral_float() {
        let mut f = numeric_field(1, "Count");
        f.add_tag("type", Some("integer".to_string()));

        let v = f
            .deserialize(&Value::Str("3.0".into()), "t", "count", true)
            .unwrap();
        assert_eq!(v, FieldValue::Plain(Value::Int(3)));

        let v = f.deserialize(&Value::Real(4.0), "t", "count", true).unwrap();
        assert_eq!(v, FieldValue::Plain(Value::Int(4)));

        let err = f
            .deserialize(&Value::Str("3.5".into()), "t", "count", true)
            .unwrap_err();
        assert!(matches!(err, ValidationError::NotANumber { .. }));
    }

    #[test]
    fn test_deserialize_real_parse_failure() {
        let f = numeric_field(1, "Height");
        let err = f
            .deserialize(&Value::Str("tall".into()), "wall", "height", true)
            .unwrap_err();
        assert!(matches!(err, ValidationError::NotANumber { .. }));
    }

    #[test]
    fn test_deserialize_number_into_text_field_fails() {
        let f = text_field(0, "Name");
        let err = f.deserialize(&Value::Int(3), "zone", "name", true).unwrap_err();
        assert!(matches!(err, ValidationError::WrongValueType { .. }));
    }

    #[test]
    fn test_deserialize_reference_wraps_hook() {
        let mut f = text_field(0, "Name");
        f.add_tag("reference", Some("ZoneNames".to_string()));
        f.add_tag("reference", Some("AllNames".to_string()));

        let v = f
            .deserialize(&Value::Str("Kitchen".into()), "zone", "name", true)
            .unwrap();
        let hook = v.as_hook().unwrap();
        assert_eq!(hook.value(), "kitchen");
        assert_eq!(hook.references(), ["ZoneNames", "AllNames"]);
    }

    #[test]
    fn test_deserialize_object_list_wraps_link() {
        let mut f = text_field(1, "Zone Name");
        f.add_tag("object-list", Some("ZoneNames".to_string()));

        let v = f
            .deserialize(&Value::Str("Kitchen".into()), "wall", "zone_name", true)
            .unwrap();
        let link = v.as_link().unwrap();
        assert_eq!(link.value(), "kitchen");
        assert_eq!(link.references(), ["ZoneNames"]);
    }

    #[test]
    fn test_field_value_local_value() {
        let hook = FieldValue::Hook(Hook::new(vec!["N".into()], "v"));
        assert_eq!(hook.local_value(), Value::Str("v".into()));
        assert!(FieldValue::Plain(Value::Null).is_null());
    }

    #[test]
    fn test_detailed_type_memoized() {
        let mut f = text_field(0, "Name");
        assert_eq!(f.detailed_type(), DetailedType::Alpha);
        // Tag changes after first use do not alter the memoized type.
        f.add_tag("reference", Some("Names".to_string()));
        assert_eq!(f.detailed_type(), DetailedType::Alpha);
    }
}
