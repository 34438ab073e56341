//! Known upstream grammar defects, corrected after parse.
//!
//! The published grammar files carry a handful of documented mistakes:
//! wrong extensible cycle markers, missing case-sensitivity tags, and
//! reference tags that only appeared in later schema versions. This pass
//! mutates descriptor tags before extensible-cycle detection runs, keyed
//! by table ref and schema version range. Every applied correction is
//! logged.

use tracing::warn;

use crate::idd::table::TableDescriptor;
use crate::idd::IddVersion;

enum Fix {
    /// Add a tag to every field from `start_index` on.
    AddFieldTagFrom {
        start_index: usize,
        tag: &'static str,
        value: Option<&'static str>,
    },
    /// Add a tag to a single field.
    AddFieldTag {
        index: usize,
        tag: &'static str,
        value: Option<&'static str>,
    },
    /// Replace a table-level tag key.
    ReplaceTableTag {
        old: &'static str,
        new: &'static str,
    },
}

struct Correction {
    table_ref: &'static str,
    /// Inclusive lower bound on the schema version.
    min_version: Option<IddVersion>,
    /// Exclusive upper bound on the schema version.
    max_version: Option<IddVersion>,
    note: &'static str,
    fix: Fix,
}

const CORRECTIONS: &[Correction] = &[
    Correction {
        table_ref: "schedule_compact",
        min_version: None,
        max_version: None,
        note: "schedule directives are case-sensitive but the grammar omits retaincase",
        fix: Fix::AddFieldTagFrom {
            start_index: 2,
            tag: "retaincase",
            value: None,
        },
    },
    Correction {
        table_ref: "energymanagementsystem_program",
        min_version: None,
        max_version: None,
        note: "program lines are case-sensitive but the grammar omits retaincase",
        fix: Fix::AddFieldTagFrom {
            start_index: 1,
            tag: "retaincase",
            value: None,
        },
    },
    Correction {
        table_ref: "zonelist",
        min_version: None,
        max_version: Some((9, 0, 0)),
        note: "name field is missing the reference tag added in 9.0",
        fix: Fix::AddFieldTag {
            index: 0,
            tag: "reference",
            value: Some("ZoneListNames"),
        },
    },
    Correction {
        table_ref: "table_multivariablelookup",
        min_version: None,
        max_version: Some((9, 0, 0)),
        note: "declared cycle length 2 does not match the single repeating field",
        fix: Fix::ReplaceTableTag {
            old: "extensible:2",
            new: "extensible:1",
        },
    },
];

fn in_range(version: IddVersion, min: Option<IddVersion>, max: Option<IddVersion>) -> bool {
    min.map_or(true, |m| version >= m) && max.map_or(true, |m| version < m)
}

/// Applies every matching correction in place. Runs after the grammar
/// parse and before extensible-cycle detection.
pub(crate) fn apply(tables: &mut [TableDescriptor], version: IddVersion) {
    for table in tables.iter_mut() {
        for correction in CORRECTIONS {
            if table.table_ref() != correction.table_ref
                || !in_range(version, correction.min_version, correction.max_version)
            {
                continue;
            }
            apply_fix(table, &correction.fix);
            warn!(
                table = %table.table_ref(),
                note = correction.note,
                "applied grammar correction"
            );
        }
    }
}

fn apply_fix(table: &mut TableDescriptor, fix: &Fix) {
    match fix {
        Fix::AddFieldTagFrom {
            start_index,
            tag,
            value,
        } => {
            for field in table.fields_mut().iter_mut().skip(*start_index) {
                if !field.has_tag(tag) {
                    field.add_tag(*tag, value.map(str::to_string));
                }
            }
        }
        Fix::AddFieldTag { index, tag, value } => {
            if let Some(field) = table.field_mut(*index) {
                if !field.has_tag(tag) {
                    field.add_tag(*tag, value.map(str::to_string));
                }
            }
        }
        Fix::ReplaceTableTag { old, new } => {
            table.replace_tag_key(old, *new);
        }
    }
}
