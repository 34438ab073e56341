//! The document codec: tokenizing input text and writing models back.
//!
//! The format is line-oriented only by convention; the tokenizer is a
//! character scanner. `!` starts a comment running to the end of the
//! line, `,` separates values, `;` terminates a record, and the first
//! value of a record is its table name. Comment lines before the first
//! record form the document's free-text header; a comment after a value
//! attaches to that field and is re-emitted on save.
//!
//! Writing is the inverse: tables in schema order, records in
//! primary-key order, one value per line at a fixed indent, field
//! comments aligned to a fixed column.

use std::fmt::Write as _;

use crate::model::{Epm, RecordInput};
use crate::value::Value;

/// Column where field comments start on save.
const COMMENT_COLUMN: usize = 35;

/// Indent for value lines on save.
const INDENT: &str = "    ";

/// A tokenized document: header comment plus raw record inputs.
///
/// Tokenizing never fails; unknown tables and bad values are the
/// model's concern.
#[derive(Debug)]
pub(crate) struct Document {
    pub(crate) header: String,
    pub(crate) records: Vec<RecordInput>,
}

pub(crate) fn tokenize(text: &str) -> Document {
    let mut header_lines: Vec<String> = Vec::new();
    let mut seen_record = false;
    let mut records: Vec<RecordInput> = Vec::new();

    // In-progress record: tokens[0] is the table name, the rest are
    // field values, comments parallel to the fields.
    let mut tokens: Vec<String> = Vec::new();
    let mut comments: Vec<Option<String>> = Vec::new();
    let mut buf = String::new();

    for raw_line in text.lines() {
        let (content, comment) = match raw_line.find('!') {
            Some(pos) => (&raw_line[..pos], Some(&raw_line[pos + 1..])),
            None => (raw_line, None),
        };

        let mut closed_on_line: Option<usize> = None;
        for c in content.chars() {
            match c {
                ',' | ';' => {
                    let token = buf.trim().to_string();
                    buf.clear();
                    tokens.push(token);
                    if tokens.len() > 1 {
                        comments.push(None);
                    }
                    if c == ';' {
                        records.push(close_record(&mut tokens, &mut comments));
                        closed_on_line = Some(records.len() - 1);
                    }
                }
                _ => buf.push(c),
            }
        }
        if !content.trim().is_empty() {
            seen_record = true;
        }

        if let Some(comment) = comment {
            let comment = comment.trim_start_matches('-').trim();
            if comment.is_empty() {
                continue;
            }
            if tokens.len() > 1 {
                attach(&mut comments, tokens.len() - 2, comment);
            } else if let Some(i) = closed_on_line {
                let record = &mut records[i];
                if let Some(last) = record.values.len().checked_sub(1) {
                    attach(&mut record.comments, last, comment);
                }
            } else if !seen_record {
                header_lines.push(comment.to_string());
            }
        }
    }

    // Lenient flush of an unterminated trailing record.
    if !buf.trim().is_empty() {
        tokens.push(buf.trim().to_string());
        if tokens.len() > 1 {
            comments.push(None);
        }
    }
    if !tokens.is_empty() {
        records.push(close_record(&mut tokens, &mut comments));
    }

    Document {
        header: header_lines.join("\n"),
        records,
    }
}

fn close_record(tokens: &mut Vec<String>, comments: &mut Vec<Option<String>>) -> RecordInput {
    let mut drained = tokens.drain(..);
    let table = drained.next().unwrap_or_default();
    let values = drained
        .map(|t| {
            if t.is_empty() {
                Value::Null
            } else {
                Value::Str(t)
            }
        })
        .collect::<Vec<_>>();
    let mut comments: Vec<Option<String>> = std::mem::take(comments);
    comments.resize(values.len(), None);
    let mut input = RecordInput::new(table, values);
    input.comments = comments;
    input
}

fn attach(comments: &mut [Option<String>], index: usize, comment: &str) {
    let Some(slot) = comments.get_mut(index) else {
        return;
    };
    match slot {
        Some(existing) => {
            existing.push(' ');
            existing.push_str(comment);
        }
        None => *slot = Some(comment.to_string()),
    }
}

pub(crate) fn write_idf(epm: &Epm) -> String {
    let mut out = String::new();
    if !epm.header_comment().is_empty() {
        for line in epm.header_comment().lines() {
            let _ = writeln!(out, "! {line}");
        }
        out.push('\n');
    }

    for table in epm.tables() {
        for record in table.records() {
            let _ = writeln!(out, "{},", table.table_name());
            let len = record.len();
            for i in 0..len {
                let sep = if i + 1 == len { ';' } else { ',' };
                let mut line = format!("{INDENT}{}{sep}", record.value(i));
                if let Some(comment) = record.comment(i) {
                    if line.len() >= COMMENT_COLUMN {
                        line.push(' ');
                    } else {
                        line.extend(std::iter::repeat(' ').take(COMMENT_COLUMN - line.len()));
                    }
                    line.push_str("! ");
                    line.push_str(comment);
                }
                out.push_str(&line);
                out.push('\n');
            }
            out.push('\n');
        }
    }
    out
}
