//! Parser for the wide peer-review export format.
//!
//! The export interleaves three kinds of rows (see [`ExportLayout`]): the
//! header row defines the student slots and question fields, row 3 carries
//! the `"Last, First"` names, and every later row is one review event aimed
//! at a single student. This module walks the file once, building up a
//! registry of per-student answer containers, then hands the registry to
//! [`finalize`](crate::scores::finalize).

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::layout::ExportLayout;
use crate::scores::{Answer, StudentRecord, SurveyResults, TypeInference, finalize};

/// Errors raised by the structural portion of the parser.
///
/// Structural problems are fatal; per-value anomalies (blank names, mixed
/// field typing) are logged and tolerated instead.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed export at row {row}: {reason}")]
    MalformedInput { row: usize, reason: String },

    #[error("unparseable name cell at row {row}, column {column}: {cell:?}")]
    MalformedName {
        row: usize,
        column: usize,
        cell: String,
    },

    #[error("row {row} targets unknown respondent {slot:?}")]
    UnknownRespondent { row: usize, slot: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Knobs for one parsing run.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub layout: ExportLayout,
    /// Skip rows whose respondent index matches no student slot instead of
    /// failing the whole batch.
    pub lenient: bool,
    pub inference: TypeInference,
}

/// Parses an export file from disk. See [`parse_export_from_reader`].
pub fn parse_export(
    path: impl AsRef<Path>,
    opts: &ParseOptions,
) -> Result<SurveyResults, ParseError> {
    let path = path.as_ref();
    info!(path = %path.display(), "Parsing survey export");
    parse_export_from_reader(File::open(path)?, opts)
}

/// Parses a full survey export and returns finalized, sorted results.
pub fn parse_export_from_reader<R: io::Read>(
    reader: R,
    opts: &ParseOptions,
) -> Result<SurveyResults, ParseError> {
    let layout = &opts.layout;
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut rows = csv_reader.records();
    let header = match rows.next() {
        Some(row) => row?,
        None => {
            return Err(ParseError::MalformedInput {
                row: 0,
                reason: "file is empty".to_string(),
            });
        }
    };

    let schema = infer_field_schema(&header, layout)?;
    let (mut registry, order) = build_registry(&header, &schema.keys, layout);
    debug!(
        students = order.len(),
        fields = schema.keys.len(),
        answer_columns = schema.column_keys.len(),
        "Header row inferred"
    );

    let mut names_resolved = false;
    let mut review_rows = 0u32;

    for (offset, row) in rows.enumerate() {
        let row_index = offset + 1;
        let row = row?;

        if row_index < layout.name_row {
            continue;
        }
        if row_index == layout.name_row {
            resolve_names(&row, row_index, &mut registry, &order, layout)?;
            names_resolved = true;
            continue;
        }
        if aggregate_row(&row, row_index, &mut registry, &schema.column_keys, opts)? {
            review_rows += 1;
        }
    }

    if !names_resolved {
        return Err(ParseError::MalformedInput {
            row: layout.name_row,
            reason: "name row missing, file ends too early".to_string(),
        });
    }

    info!(review_rows, "Export rows consumed");
    Ok(finalize(registry, &order, &schema.keys, opts.inference))
}

/// `true` for cells of the form `student<digits>`.
fn is_student_slot(cell: &str) -> bool {
    cell.strip_prefix("student")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// The question schema inferred from the header row.
#[derive(Debug)]
struct FieldSchema {
    /// Ordered, de-duplicated field keys.
    keys: Vec<String>,
    /// The key owning each raw question column, in column order. A data row
    /// carries one answer cell per entry here, so the sub-question columns of
    /// a multi-part field (`Rating_1`, `Rating_2`, ...) each feed an answer
    /// into the shared `Rating` container.
    column_keys: Vec<String>,
}

/// Locates the question region of the header row and derives the field
/// schema. A key is the header cell up to the first `_`, which collapses
/// multi-part sub-questions into one logical field.
fn infer_field_schema(
    header: &StringRecord,
    layout: &ExportLayout,
) -> Result<FieldSchema, ParseError> {
    let width = header.len();
    if width < layout.min_width() {
        return Err(ParseError::MalformedInput {
            row: 0,
            reason: format!(
                "header has {width} columns, at least {} expected",
                layout.min_width()
            ),
        });
    }

    let mut col = layout.student_block_start;
    while col < width && is_student_slot(header.get(col).unwrap_or("")) {
        col += 1;
    }
    if col == width {
        return Err(ParseError::MalformedInput {
            row: 0,
            reason: "student slot columns run to the end of the header".to_string(),
        });
    }

    let mut keys: Vec<String> = Vec::new();
    let mut column_keys: Vec<String> = Vec::new();
    while col < layout.question_region_end(width) {
        let cell = header.get(col).unwrap_or("");
        let key = cell.split('_').next().unwrap_or(cell);
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
        column_keys.push(key.to_string());
        col += 1;
    }

    Ok(FieldSchema { keys, column_keys })
}

/// Creates one empty [`StudentRecord`] per slot cell of the header row,
/// remembering discovery order for positional name assignment.
fn build_registry(
    header: &StringRecord,
    field_keys: &[String],
    layout: &ExportLayout,
) -> (HashMap<String, StudentRecord>, Vec<String>) {
    let width = header.len();
    let mut registry = HashMap::new();
    let mut order = Vec::new();

    for col in layout.student_block_start..layout.student_block_end(width) {
        let slot = header.get(col).unwrap_or("").to_string();
        if registry
            .insert(slot.clone(), StudentRecord::with_fields(field_keys))
            .is_some()
        {
            warn!(slot = %slot, column = col, "Duplicate student slot in header");
        }
        order.push(slot);
    }

    (registry, order)
}

/// Fills in first/last names from the name row, positionally in slot
/// discovery order. A blank cell becomes `("BLANK", "BLANK")` rather than a
/// failure; a cell without a `", "` separator is a structural error.
fn resolve_names(
    row: &StringRecord,
    row_index: usize,
    registry: &mut HashMap<String, StudentRecord>,
    order: &[String],
    layout: &ExportLayout,
) -> Result<(), ParseError> {
    let width = row.len();
    if width < layout.min_width() {
        return Err(ParseError::MalformedInput {
            row: row_index,
            reason: format!(
                "name row has {width} columns, at least {} expected",
                layout.min_width()
            ),
        });
    }

    let name_columns = layout.student_block_start..layout.student_block_end(width);
    for (slot, col) in order.iter().zip(name_columns) {
        let cell = row.get(col).unwrap_or("");
        let (last, first) = if cell.trim().is_empty() {
            warn!(
                row = row_index,
                column = col,
                slot = %slot,
                "Blank name cell, substituting BLANK"
            );
            ("BLANK".to_string(), "BLANK".to_string())
        } else {
            match cell.split_once(", ") {
                Some((last, first)) => (last.to_string(), first.to_string()),
                None => {
                    return Err(ParseError::MalformedName {
                        row: row_index,
                        column: col,
                        cell: cell.to_string(),
                    });
                }
            }
        };

        if let Some(record) = registry.get_mut(slot) {
            record.last = last;
            record.first = first;
        }
    }

    Ok(())
}

/// Consumes one review row: finds the target student via the respondent
/// index, appends one typed answer per raw question column, and bumps the
/// student's review count. Returns `true` if the row was attributed to a
/// student.
fn aggregate_row(
    row: &StringRecord,
    row_index: usize,
    registry: &mut HashMap<String, StudentRecord>,
    column_keys: &[String],
    opts: &ParseOptions,
) -> Result<bool, ParseError> {
    let layout = &opts.layout;
    let width = row.len();
    if width < layout.min_width() {
        return Err(ParseError::MalformedInput {
            row: row_index,
            reason: format!(
                "data row has {width} columns, at least {} expected",
                layout.min_width()
            ),
        });
    }

    let respondent = row
        .get(layout.respondent_column(width))
        .unwrap_or("")
        .trim();
    let slot = format!("student{respondent}");

    let Some(record) = registry.get_mut(&slot) else {
        if opts.lenient {
            warn!(row = row_index, slot = %slot, "Unknown respondent, skipping row");
            return Ok(false);
        }
        return Err(ParseError::UnknownRespondent {
            row: row_index,
            slot,
        });
    };

    let mut col = layout.answer_start(width);
    for key in column_keys {
        let cell = row.get(col).unwrap_or("");
        if let Some(answer) = Answer::from_cell(cell) {
            // Containers for every key exist by construction.
            if let Some(container) = record.answers.get_mut(key) {
                container.push(answer);
            }
        }
        col += 1;
    }

    record.count += 1;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scores::{FieldKind, FieldType, SurveyField};

    /// Builds an export row of `width` cells from `(column, value)` pairs.
    fn row(width: usize, cells: &[(usize, &str)]) -> String {
        let mut fields = vec![String::new(); width];
        for (col, value) in cells {
            fields[*col] = value.to_string();
        }
        fields.join(",")
    }

    /// A minimal default-layout export: width 26, two student slots at
    /// columns 14-15, the question region at 16..23 collapsing to a single
    /// "Rating" key owning all seven columns, the respondent index at column
    /// 16 of data rows and one answer cell per question column from 17.
    fn minimal_export(data_rows: &[&str]) -> String {
        let header = row(
            26,
            &[
                (0, "ResponseID"),
                (14, "student1"),
                (15, "student2"),
                (16, "Rating_1"),
                (17, "Rating_2"),
                (18, "Rating_3"),
                (19, "Rating_4"),
                (20, "Rating_5"),
                (21, "Rating_6"),
                (22, "Rating_7"),
                (23, "LocationLatitude"),
                (24, "LocationLongitude"),
                (25, "LocationAccuracy"),
            ],
        );
        let names = row(26, &[(14, "\"Doe, Jane\""), (15, "\"Smith, John\"")]);
        let mut lines = vec![
            header,
            row(26, &[(0, "R_1")]),
            row(26, &[(0, "R_2")]),
            names,
        ];
        lines.extend(data_rows.iter().map(|r| r.to_string()));
        lines.join("\n")
    }

    fn data_row(respondent: &str, answer: &str) -> String {
        row(26, &[(16, respondent), (17, answer)])
    }

    #[test]
    fn test_concrete_two_student_scenario() {
        // One "Rating" field, two reviews of student1: a skipped answer then
        // a 5. Student2 receives nothing and is dropped.
        let export = minimal_export(&[&data_row("1", "-1"), &data_row("1", "5")]);
        let results =
            parse_export_from_reader(export.as_bytes(), &ParseOptions::default()).unwrap();

        assert_eq!(
            results.fields,
            vec![SurveyField {
                key: "Rating".to_string(),
                field_type: FieldType::Numeric
            }]
        );
        assert_eq!(results.reports.len(), 1);
        let report = &results.reports[0];
        assert_eq!(report.last, "Doe");
        assert_eq!(report.first, "Jane");
        assert_eq!(report.count, 2);
        assert_eq!(report.total, 5.0);
        let FieldKind::Numeric { values, average } = &report.fields[0].kind else {
            panic!("expected numeric field");
        };
        assert_eq!(values, &[5.0]);
        assert_eq!(*average, Some(5.0));
    }

    #[test]
    fn test_multi_part_answers_share_one_container() {
        // Rating_1..Rating_5 collapse to one key but keep five answer
        // columns, so every sub-question answer lands in "Rating" and the
        // Clarity and Comments cells still reach their own fields.
        let header = row(
            26,
            &[
                (0, "ResponseID"),
                (14, "student1"),
                (15, "student2"),
                (16, "Rating_1"),
                (17, "Rating_2"),
                (18, "Rating_3"),
                (19, "Rating_4"),
                (20, "Rating_5"),
                (21, "Clarity"),
                (22, "Comments"),
                (23, "LocationLatitude"),
                (24, "LocationLongitude"),
                (25, "LocationAccuracy"),
            ],
        );
        let names = row(26, &[(14, "\"Doe, Jane\""), (15, "\"Smith, John\"")]);
        let review = row(
            26,
            &[
                (16, "1"),
                (17, "5"),
                (18, "4"),
                (19, "3"),
                (20, "2"),
                (21, "1"),
                (22, "9"),
                (23, "nice work"),
            ],
        );
        let export = [header, row(26, &[]), row(26, &[]), names, review].join("\n");

        let results =
            parse_export_from_reader(export.as_bytes(), &ParseOptions::default()).unwrap();

        let keys: Vec<&str> = results.fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["Rating", "Clarity", "Comments"]);

        let report = &results.reports[0];
        let FieldKind::Numeric { values, average } = &report.fields[0].kind else {
            panic!("expected numeric Rating field");
        };
        assert_eq!(values, &[5.0, 4.0, 3.0, 2.0, 1.0]);
        assert_eq!(*average, Some(3.0));
        let FieldKind::Numeric { values, average } = &report.fields[1].kind else {
            panic!("expected numeric Clarity field");
        };
        assert_eq!(values, &[9.0]);
        assert_eq!(*average, Some(9.0));
        let FieldKind::Text { comments } = &report.fields[2].kind else {
            panic!("expected text Comments field");
        };
        assert_eq!(comments, &["nice work"]);
        assert_eq!(report.total, 12.0);
    }

    #[test]
    fn test_field_keys_collapse_underscore_variants() {
        // No data rows: nobody is substantive, but parsing must succeed and
        // infer exactly one field key from the seven Rating_N columns.
        let export = minimal_export(&[]);
        let results =
            parse_export_from_reader(export.as_bytes(), &ParseOptions::default()).unwrap();
        assert_eq!(results.fields.len(), 1);
        assert_eq!(results.fields[0].key, "Rating");
        assert!(results.reports.is_empty());
    }

    #[test]
    fn test_counts_sum_to_matched_rows() {
        let export = minimal_export(&[
            &data_row("1", "4"),
            &data_row("2", "3"),
            &data_row("1", "5"),
        ]);
        let results =
            parse_export_from_reader(export.as_bytes(), &ParseOptions::default()).unwrap();

        let total_count: u32 = results.reports.iter().map(|r| r.count).sum();
        assert_eq!(total_count, 3);
    }

    #[test]
    fn test_blank_name_cell_substitutes_blank() {
        let mut lines: Vec<String> = minimal_export(&[]).lines().map(str::to_string).collect();
        // Student2's name cell is blank.
        lines[3] = row(26, &[(14, "\"Doe, Jane\"")]);
        lines.push(data_row("2", "4"));
        let export = lines.join("\n");

        let results =
            parse_export_from_reader(export.as_bytes(), &ParseOptions::default()).unwrap();

        assert_eq!(results.reports.len(), 1);
        assert_eq!(results.reports[0].last, "BLANK");
        assert_eq!(results.reports[0].first, "BLANK");
    }

    #[test]
    fn test_name_cell_without_separator_is_fatal() {
        let mut lines: Vec<String> = minimal_export(&[]).lines().map(str::to_string).collect();
        lines[3] = row(26, &[(14, "\"Doe, Jane\""), (15, "Smith John")]);
        let export = lines.join("\n");

        let err =
            parse_export_from_reader(export.as_bytes(), &ParseOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::MalformedName {
                row: 3,
                column: 15,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_respondent_is_fatal_by_default() {
        let export = minimal_export(&[&data_row("9", "4")]);
        let err =
            parse_export_from_reader(export.as_bytes(), &ParseOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::UnknownRespondent { row: 4, ref slot } if slot == "student9"
        ));
    }

    #[test]
    fn test_unknown_respondent_skipped_when_lenient() {
        let export = minimal_export(&[&data_row("9", "4"), &data_row("1", "5")]);
        let opts = ParseOptions {
            lenient: true,
            ..Default::default()
        };
        let results = parse_export_from_reader(export.as_bytes(), &opts).unwrap();

        assert_eq!(results.reports.len(), 1);
        assert_eq!(results.reports[0].count, 1);
    }

    #[test]
    fn test_header_scan_running_off_the_row_is_fatal() {
        // Every cell from the student block onward matches studentNN, so the
        // scan never finds the question region.
        let cells: Vec<(usize, &str)> = (14..26).map(|c| (c, "student1")).collect();
        let header = row(26, &cells);
        let err =
            parse_export_from_reader(header.as_bytes(), &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedInput { row: 0, .. }));
    }

    #[test]
    fn test_short_header_is_fatal() {
        let export = "a,b,c";
        let err =
            parse_export_from_reader(export.as_bytes(), &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedInput { row: 0, .. }));
    }

    #[test]
    fn test_missing_name_row_is_fatal() {
        let export = minimal_export(&[]);
        let truncated: String = export.lines().take(2).collect::<Vec<_>>().join("\n");
        let err =
            parse_export_from_reader(truncated.as_bytes(), &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedInput { row: 3, .. }));
    }

    #[test]
    fn test_short_data_row_is_fatal() {
        let mut lines: Vec<String> = minimal_export(&[]).lines().map(str::to_string).collect();
        lines.push("only,three,cells".to_string());
        let export = lines.join("\n");

        let err =
            parse_export_from_reader(export.as_bytes(), &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedInput { row: 4, .. }));
    }

    #[test]
    fn test_blank_text_answers_are_dropped() {
        // Student1 gets one review whose only answer is whitespace.
        let export = minimal_export(&[&row(26, &[(16, "1"), (17, "   ")])]);
        let results =
            parse_export_from_reader(export.as_bytes(), &ParseOptions::default()).unwrap();

        // The review was counted but contributed nothing, so the record is
        // not substantive and is dropped.
        assert!(results.reports.is_empty());
    }

    #[test]
    fn test_is_student_slot() {
        assert!(is_student_slot("student1"));
        assert!(is_student_slot("student42"));
        assert!(!is_student_slot("student"));
        assert!(!is_student_slot("students"));
        assert!(!is_student_slot("Q1"));
        assert!(!is_student_slot(""));
    }
}
