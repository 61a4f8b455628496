//! Column layout of the wide survey export.
//!
//! The export format is positional: a fixed run of metadata columns, then the
//! `studentNN` slot columns, then the question columns, then trailing location
//! metadata. Every offset the parser relies on is named here so no column
//! number is hard-coded and fixtures of any width exercise the same code.

/// Named offsets describing the column conventions of one export file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportLayout {
    /// Index of the first `studentNN` column in the header row.
    pub student_block_start: usize,
    /// Row index holding the `"Last, First"` name cells.
    pub name_row: usize,
    /// Trailing header columns holding location metadata, excluded from the
    /// question region.
    pub location_tail: usize,
    /// Student-slot cells run from `student_block_start` up to
    /// `width - reserved_tail`. In a data row, the respondent-index cell sits
    /// at `width - reserved_tail`.
    pub reserved_tail: usize,
    /// Answer cells of a data row start at `width - answer_tail`, one column
    /// to the right of the respondent index.
    pub answer_tail: usize,
}

impl Default for ExportLayout {
    fn default() -> Self {
        Self {
            student_block_start: 14,
            name_row: 3,
            location_tail: 3,
            reserved_tail: 10,
            answer_tail: 9,
        }
    }
}

impl ExportLayout {
    /// Narrowest row this layout can address.
    pub fn min_width(&self) -> usize {
        self.student_block_start + self.reserved_tail
    }

    /// Column holding the respondent's slot number in a data row.
    pub fn respondent_column(&self, width: usize) -> usize {
        width - self.reserved_tail
    }

    /// First answer column of a data row.
    pub fn answer_start(&self, width: usize) -> usize {
        width - self.answer_tail
    }

    /// One-past-the-end of the student-slot block in the header row.
    pub fn student_block_end(&self, width: usize) -> usize {
        width - self.reserved_tail
    }

    /// One-past-the-end of the question region in the header row.
    pub fn question_region_end(&self, width: usize) -> usize {
        width - self.location_tail
    }
}
