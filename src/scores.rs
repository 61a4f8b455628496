//! Per-student answer accumulation and score finalization.
//!
//! Answers are typed at ingestion (`Number` vs `Text`), which removes the
//! guesswork the legacy tool did by sniffing the first stored value. That
//! first-element heuristic is still available behind
//! [`TypeInference::FirstElement`] for output parity with the old tool.

use std::collections::HashMap;

use tracing::{debug, warn};

/// One survey answer, typed when the cell is read.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    /// A cell that parsed as an integer or decimal. `raw` keeps the original
    /// text so legacy type inference can re-examine it.
    Number { raw: String, value: f64 },
    /// A non-blank free-text cell.
    Text(String),
}

impl Answer {
    /// Types a raw export cell. Blank cells carry no answer and yield `None`;
    /// a respondent who skipped a rating shows up as the literal `-1`
    /// sentinel instead, which is kept here and filtered out later.
    pub fn from_cell(cell: &str) -> Option<Answer> {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<f64>() {
            Ok(value) => Some(Answer::Number {
                raw: trimmed.to_string(),
                value,
            }),
            Err(_) => Some(Answer::Text(cell.to_string())),
        }
    }

    /// The answer rendered back as text, for fields that end up textual.
    fn as_text(&self) -> &str {
        match self {
            Answer::Number { raw, .. } => raw,
            Answer::Text(s) => s,
        }
    }
}

/// Mutable record for one student slot while export rows are consumed.
#[derive(Debug, Default)]
pub struct StudentRecord {
    pub first: String,
    pub last: String,
    /// Number of review rows that targeted this student.
    pub count: u32,
    /// Raw answers per field key, in arrival order.
    pub answers: HashMap<String, Vec<Answer>>,
}

impl StudentRecord {
    /// A fresh record with one empty answer container per field key.
    pub fn with_fields(field_keys: &[String]) -> Self {
        StudentRecord {
            answers: field_keys
                .iter()
                .map(|k| (k.clone(), Vec::new()))
                .collect(),
            ..Default::default()
        }
    }
}

/// How a field's numeric-vs-text decision is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeInference {
    /// Use the tags assigned at ingestion. A field is numeric if any student
    /// stored a numeric answer for it.
    #[default]
    Tagged,
    /// Reproduce the legacy tool: the first stored value decides the type of
    /// the whole field, and later entries that disagree are dropped.
    FirstElement,
}

/// Whether a field holds ratings or comments, resolved once per field key so
/// every output row lines up under the same header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Numeric,
    Text,
}

/// One survey question category with its resolved type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyField {
    pub key: String,
    pub field_type: FieldType,
}

/// Finalized per-field data for one student.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Ratings with the sentinel / negative values already filtered out.
    Numeric {
        values: Vec<f64>,
        average: Option<f64>,
    },
    /// Free-text comments, blanks already dropped.
    Text { comments: Vec<String> },
}

/// Finalized per-field data for one student, keyed by field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldReport {
    pub key: String,
    pub kind: FieldKind,
}

/// Immutable, output-ready view of one student who received feedback.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentReport {
    pub last: String,
    pub first: String,
    pub count: u32,
    /// Sum of all non-null field averages, rounded to one decimal.
    pub total: f64,
    /// One entry per survey field, in field order.
    pub fields: Vec<FieldReport>,
}

/// Finalized results for a whole survey: the resolved field schema plus one
/// report per substantive student, sorted by last name.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyResults {
    pub fields: Vec<SurveyField>,
    pub reports: Vec<StudentReport>,
}

/// Turns the mutable registry into sorted, output-ready reports.
///
/// Students whose every field came back empty (nobody reviewed them) are
/// dropped. `order` is the slot discovery order from the header row and makes
/// type resolution and logging deterministic.
pub fn finalize(
    mut registry: HashMap<String, StudentRecord>,
    order: &[String],
    field_keys: &[String],
    inference: TypeInference,
) -> SurveyResults {
    let fields = resolve_field_types(&registry, order, field_keys, inference);

    let mut reports = Vec::new();
    for slot in order {
        let Some(record) = registry.remove(slot) else {
            continue;
        };

        let mut field_reports = Vec::with_capacity(fields.len());
        let mut total = 0.0;
        let mut substantive = false;

        for field in &fields {
            let answers = record
                .answers
                .get(&field.key)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let kind = summarize_field(slot, field, answers, inference);
            match &kind {
                FieldKind::Numeric { values, average } => {
                    if !values.is_empty() {
                        substantive = true;
                    }
                    if let Some(avg) = average {
                        total += avg;
                    }
                }
                FieldKind::Text { comments } => {
                    if !comments.is_empty() {
                        substantive = true;
                    }
                }
            }
            field_reports.push(FieldReport {
                key: field.key.clone(),
                kind,
            });
        }

        if !substantive {
            debug!(slot = %slot, "Student received no feedback, dropping from output");
            continue;
        }

        reports.push(StudentReport {
            last: record.last,
            first: record.first,
            count: record.count,
            total: round1(total),
            fields: field_reports,
        });
    }

    reports.sort_by(|a, b| a.last.cmp(&b.last));

    SurveyResults { fields, reports }
}

/// Resolves one type per field key across all students, so the summary CSV
/// header and every row agree on which columns are ratings.
fn resolve_field_types(
    registry: &HashMap<String, StudentRecord>,
    order: &[String],
    field_keys: &[String],
    inference: TypeInference,
) -> Vec<SurveyField> {
    field_keys
        .iter()
        .map(|key| {
            let field_type = match inference {
                TypeInference::Tagged => tagged_field_type(registry, order, key),
                TypeInference::FirstElement => first_element_field_type(registry, order, key),
            };
            SurveyField {
                key: key.clone(),
                field_type,
            }
        })
        .collect()
}

fn tagged_field_type(
    registry: &HashMap<String, StudentRecord>,
    order: &[String],
    key: &str,
) -> FieldType {
    let mut saw_number = false;
    let mut saw_text = false;
    for slot in order {
        let Some(answers) = registry.get(slot).and_then(|r| r.answers.get(key)) else {
            continue;
        };
        for answer in answers {
            match answer {
                Answer::Number { .. } => saw_number = true,
                Answer::Text(_) => saw_text = true,
            }
        }
    }
    if saw_number && saw_text {
        warn!(field = key, "Field mixes numeric and text answers, treating as numeric");
    }
    if saw_number {
        FieldType::Numeric
    } else {
        FieldType::Text
    }
}

/// Legacy rule: the first stored value of the first student who has one
/// decides the type. Integer-parseable means numeric.
fn first_element_field_type(
    registry: &HashMap<String, StudentRecord>,
    order: &[String],
    key: &str,
) -> FieldType {
    for slot in order {
        let first = registry
            .get(slot)
            .and_then(|r| r.answers.get(key))
            .and_then(|answers| answers.first());
        if let Some(answer) = first {
            return if answer.as_text().trim().parse::<i64>().is_ok() {
                FieldType::Numeric
            } else {
                FieldType::Text
            };
        }
    }
    FieldType::Text
}

fn summarize_field(
    slot: &str,
    field: &SurveyField,
    answers: &[Answer],
    inference: TypeInference,
) -> FieldKind {
    match field.field_type {
        FieldType::Numeric => {
            let values: Vec<f64> = match inference {
                TypeInference::Tagged => answers
                    .iter()
                    .filter_map(|a| match a {
                        Answer::Number { value, .. } => Some(*value),
                        Answer::Text(text) => {
                            warn!(
                                slot,
                                field = %field.key,
                                text,
                                "Dropping text answer from numeric field"
                            );
                            None
                        }
                    })
                    .filter(|v| *v >= 0.0)
                    .collect(),
                // Legacy pass: integer conversion, silently dropping anything
                // that does not convert.
                TypeInference::FirstElement => answers
                    .iter()
                    .filter_map(|a| a.as_text().trim().parse::<i64>().ok())
                    .filter(|v| *v >= 0)
                    .map(|v| v as f64)
                    .collect(),
            };
            let average = if values.is_empty() {
                None
            } else {
                Some(round2(values.iter().sum::<f64>() / values.len() as f64))
            };
            FieldKind::Numeric { values, average }
        }
        FieldType::Text => FieldKind::Text {
            comments: answers
                .iter()
                .map(|a| a.as_text().to_string())
                .filter(|s| !s.trim().is_empty())
                .collect(),
        },
    }
}

/// Rounds to two decimal places (per-field averages).
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Rounds to one decimal place (the total).
pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
