//! The schema dictionary: a grammar-described definition of every table
//! and field kind, analogous to a database schema.
//!
//! [`Idd::parse`] consumes the line-oriented grammar: group markers,
//! table declarations (`Name,`), field declarations (`A1,` / `N2;` with
//! trailing `\field` / `\note` tags), and tag lines (`\tag value`). Tags
//! attach to the current field, or to the current table when no field has
//! started yet. Any unmatched line is a fatal parse error; the grammar is
//! assumed internally consistent modulo the documented correction table
//! in [`corrections`].

pub mod cache;
mod corrections;
pub mod field;
pub mod table;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::error::SchemaParseError;
use crate::idd::field::{derive_ref, BasicType, FieldDescriptor};
use crate::idd::table::TableDescriptor;

/// A schema version triple.
pub type IddVersion = (u64, u64, u64);

/// Bookkeeping headers that carry no record type of their own.
const SENTINEL_TABLES: [&str; 4] = [
    "Lead Input",
    "End Lead Input",
    "Simulation Data",
    "End Simulation Data",
];

struct LinePatterns {
    version: Regex,
    field_token: Regex,
    table_name: Regex,
}

impl LinePatterns {
    fn new() -> Self {
        // Escaped literals only; these patterns always compile.
        Self {
            version: Regex::new(r"^!\s*IDD_Version\s+(\d+)\.(\d+)\.(\d+)").unwrap(),
            field_token: Regex::new(r"^([AN])\d+$").unwrap(),
            table_name: Regex::new(r"^[A-Za-z][A-Za-z0-9:\-./ ]*$").unwrap(),
        }
    }
}

/// The parsed schema dictionary.
#[derive(Debug)]
pub struct Idd {
    version: IddVersion,
    tables: Vec<Arc<TableDescriptor>>,
    by_ref: HashMap<String, usize>,
}

impl Idd {
    /// Parses a grammar file's text into a schema dictionary.
    ///
    /// Applies the known-defect correction pass, then runs
    /// extensible-cycle detection per table.
    pub fn parse(text: &str) -> Result<Self, SchemaParseError> {
        let patterns = LinePatterns::new();
        let mut version: IddVersion = (0, 0, 0);
        let mut group: Option<String> = None;
        let mut tables: Vec<TableDescriptor> = Vec::new();
        // None while outside any table; sentinel headers also reset this.
        let mut in_table = false;
        let mut in_sentinel = false;

        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('!') {
                if let Some(caps) = patterns.version.captures(line) {
                    version = parse_version_caps(&caps);
                }
                continue;
            }
            if let Some(tag_text) = line.strip_prefix('\\') {
                let (tag, value) = split_tag(tag_text);
                if tag == "group" {
                    group = value;
                    continue;
                }
                if in_sentinel {
                    continue;
                }
                if !in_table {
                    return Err(SchemaParseError::TagOutsideTable {
                        line_no,
                        tag: tag.to_string(),
                    });
                }
                let table = tables
                    .last_mut()
                    .unwrap_or_else(|| unreachable!("in_table implies a current table"));
                attach_tag(table, tag, value);
                continue;
            }

            // Content line: a field-declaration run or a table header.
            let (content, tags) = match line.find('\\') {
                Some(pos) => (line[..pos].trim_end(), Some(&line[pos..])),
                None => (line, None),
            };
            let tokens: Vec<&str> = content
                .split([',', ';'])
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect();

            if !tokens.is_empty()
                && tokens.iter().all(|t| patterns.field_token.is_match(t))
            {
                if in_sentinel {
                    continue;
                }
                if !in_table {
                    return Err(SchemaParseError::FieldOutsideTable { line_no });
                }
                let table = tables
                    .last_mut()
                    .unwrap_or_else(|| unreachable!("in_table implies a current table"));
                for token in &tokens {
                    let letter = token
                        .chars()
                        .next()
                        .unwrap_or_else(|| unreachable!("token matched [AN]\\d+"));
                    let basic = BasicType::from_letter(letter)
                        .unwrap_or_else(|| unreachable!("token matched [AN]\\d+"));
                    let index = table.field_count();
                    table.add_field(FieldDescriptor::new(index, basic, None));
                }
                if let Some(tag_text) = tags {
                    for piece in tag_text.split('\\').filter(|p| !p.trim().is_empty()) {
                        let (tag, value) = split_tag(piece.trim());
                        attach_tag(table, tag, value);
                    }
                }
                continue;
            }

            // Table header: one name token terminated by `,` (or `;` for
            // field-less declarations and sentinel headers).
            if tokens.len() == 1
                && (content.ends_with(',') || content.ends_with(';'))
                && patterns.table_name.is_match(tokens[0])
            {
                let name = tokens[0];
                if SENTINEL_TABLES
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(name))
                {
                    in_table = false;
                    in_sentinel = true;
                    continue;
                }
                let mut table = TableDescriptor::new(name, group.clone());
                if let Some(tag_text) = tags {
                    for piece in tag_text.split('\\').filter(|p| !p.trim().is_empty()) {
                        let (tag, value) = split_tag(piece.trim());
                        table.add_tag(tag, value);
                    }
                }
                tables.push(table);
                in_table = true;
                in_sentinel = false;
                continue;
            }

            return Err(SchemaParseError::UnmatchedLine {
                line_no,
                content: line.to_string(),
            });
        }

        corrections::apply(&mut tables, version);
        for table in &mut tables {
            table.detect_extensible()?;
        }

        let mut by_ref = HashMap::with_capacity(tables.len());
        for (i, table) in tables.iter().enumerate() {
            by_ref.insert(table.table_ref().to_string(), i);
        }
        debug!(
            tables = tables.len(),
            version = ?version,
            "parsed schema dictionary"
        );
        Ok(Self {
            version,
            tables: tables.into_iter().map(Arc::new).collect(),
            by_ref,
        })
    }

    /// Reads and parses a grammar file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaParseError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Scans for the `!IDD_Version x.y.z` header without a full parse.
    #[must_use]
    pub fn peek_version(text: &str) -> Option<IddVersion> {
        let version = LinePatterns::new().version;
        text.lines()
            .take(64)
            .find_map(|line| version.captures(line.trim()))
            .map(|caps| parse_version_caps(&caps))
    }

    /// The declared schema version, `(0, 0, 0)` when absent.
    #[must_use]
    pub const fn version(&self) -> IddVersion {
        self.version
    }

    /// Number of table descriptors.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// All table descriptors in declaration order.
    #[must_use]
    pub fn tables(&self) -> &[Arc<TableDescriptor>] {
        &self.tables
    }

    /// Looks up a table by declared name or ref (case-insensitive).
    #[must_use]
    pub fn table(&self, name_or_ref: &str) -> Option<&Arc<TableDescriptor>> {
        self.table_index(name_or_ref).map(|i| &self.tables[i])
    }

    /// Position of a table in declaration order.
    #[must_use]
    pub fn table_index(&self, name_or_ref: &str) -> Option<usize> {
        self.by_ref.get(&derive_ref(name_or_ref)).copied()
    }
}

fn parse_version_caps(caps: &regex::Captures<'_>) -> IddVersion {
    let part = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    (part(1), part(2), part(3))
}

fn split_tag(text: &str) -> (&str, Option<String>) {
    match text.find(char::is_whitespace) {
        Some(pos) => {
            let value = text[pos..].trim();
            (
                &text[..pos],
                (!value.is_empty()).then(|| value.to_string()),
            )
        }
        None => (text, None),
    }
}

fn attach_tag(table: &mut TableDescriptor, tag: &str, value: Option<String>) {
    if table.field_count() == 0 {
        table.add_tag(tag, value);
        return;
    }
    let index = table.field_count() - 1;
    let field = table
        .field_mut(index)
        .unwrap_or_else(|| unreachable!("index < field_count"));
    if tag == "field" {
        if let Some(name) = value {
            field.set_name(name);
        }
        return;
    }
    field.add_tag(tag, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idd::field::DetailedType;

    const SMALL_IDD: &str = "\
!IDD_Version 9.4.0
\\group Thermal Zones

Lead Input;

Zone,
   \\memo Defines a thermal zone
   A1, \\field Name
       \\required-field
       \\reference ZoneNames
   N1, \\field Direction of Relative North
       \\units deg

Wall,
   A1, \\field Name
       \\required-field
       \\reference WallNames
   A2, \\field Zone Name
       \\type object-list
       \\object-list ZoneNames
";

    #[test]
    fn test_parse_small_idd() {
        let idd = Idd::parse(SMALL_IDD).unwrap();
        assert_eq!(idd.version(), (9, 4, 0));
        assert_eq!(idd.table_count(), 2);

        let zone = idd.table("Zone").unwrap();
        assert_eq!(zone.table_ref(), "zone");
        assert_eq!(zone.group_name(), Some("Thermal Zones"));
        assert_eq!(zone.field_count(), 2);
        assert!(zone.has_tag("memo"));

        let name = &zone.fields()[0];
        assert_eq!(name.field_ref(), Some("name"));
        assert!(name.is_required());
        assert_eq!(name.detailed_type(), DetailedType::Reference);

        let north = &zone.fields()[1];
        assert_eq!(north.field_ref(), Some("direction_of_relative_north"));
        assert_eq!(north.detailed_type(), DetailedType::Real);
    }

    #[test]
    fn test_object_list_field() {
        let idd = Idd::parse(SMALL_IDD).unwrap();
        let wall = idd.table("wall").unwrap();
        let zone_name = &wall.fields()[1];
        assert_eq!(zone_name.detailed_type(), DetailedType::ObjectList);
        assert_eq!(zone_name.object_lists(), ["ZoneNames"]);
    }

    #[test]
    fn test_sentinel_tables_skipped() {
        let idd = Idd::parse(SMALL_IDD).unwrap();
        assert!(idd.table("Lead Input").is_none());
    }

    #[test]
    fn test_anonymous_field_run() {
        let text = "\
Curve:Cubic,
   A1, \\field Name
   N1, N2, N3; \\note coefficients
";
        let idd = Idd::parse(text).unwrap();
        let curve = idd.table("Curve:Cubic").unwrap();
        assert_eq!(curve.field_count(), 4);
        assert!(curve.fields()[1].field_ref().is_none());
        assert_eq!(curve.fields()[3].tag_values("note"), ["coefficients"]);
    }

    #[test]
    fn test_unmatched_line_is_fatal() {
        let err = Idd::parse("Zone,\n   A1, \\field Name\n???\n").unwrap_err();
        match err {
            SchemaParseError::UnmatchedLine { line_no, content } => {
                assert_eq!(line_no, 3);
                assert_eq!(content, "???");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_tag_before_any_table_is_fatal() {
        let err = Idd::parse("\\memo orphan\n").unwrap_err();
        assert!(matches!(err, SchemaParseError::TagOutsideTable { .. }));
    }

    #[test]
    fn test_field_before_any_table_is_fatal() {
        let err = Idd::parse("A1, \\field Name\n").unwrap_err();
        assert!(matches!(err, SchemaParseError::FieldOutsideTable { .. }));
    }

    #[test]
    fn test_peek_version() {
        assert_eq!(Idd::peek_version(SMALL_IDD), Some((9, 4, 0)));
        assert_eq!(Idd::peek_version("Zone,\n"), None);
    }

    #[test]
    fn test_version_defaults_to_zero() {
        let idd = Idd::parse("Zone,\n   A1, \\field Name\n").unwrap();
        assert_eq!(idd.version(), (0, 0, 0));
    }

    #[test]
    fn test_extensible_table_end_to_end() {
        let text = "\
ZoneList,
   \\extensible:1
   A1, \\field Name
       \\required-field
       \\reference ZoneListNames
   A2, \\field Zone 1 Name
       \\begin-extensible
       \\type object-list
       \\object-list ZoneNames
   A3, \\field Zone 2 Name
       \\type object-list
       \\object-list ZoneNames
";
        let idd = Idd::parse(text).unwrap();
        let zonelist = idd.table("ZoneList").unwrap();
        let ext = zonelist.extensible_info().unwrap();
        assert_eq!(ext.cycle_start(), 1);
        assert_eq!(ext.cycle_len(), 1);
        assert_eq!(zonelist.field_count(), 2);
        assert_eq!(zonelist.get_field_index("zone_4_name").unwrap(), 4);
    }
}
