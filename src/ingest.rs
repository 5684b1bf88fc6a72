//! Grade-sheet ingestion.
//!
//! A sheet carries a fixed five-row header block followed by one row per student:
//!
//! | row | content                                   |
//! |-----|-------------------------------------------|
//! | 0   | semester per column (`6`, `Sem 6`, `S6`)  |
//! | 1   | credits per column                        |
//! | 2   | subject code per column                   |
//! | 3   | subject name per column                   |
//! | 4   | label row, ignored                        |
//! | 5+  | name, register number, then grade tokens  |
//!
//! [`ingest`] turns that into per-student, per-semester records with SGPA. It performs
//! no I/O and either returns a complete [`IngestResult`] or rejects the whole sheet.

use crate::grades::{self, SemesterRecord, SubjectRecord};
use crate::sheet::{Cell, GradeSheet};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

const HEADER_ROWS: usize = 5;
const MIN_ROWS: usize = HEADER_ROWS + 1;

const SEMESTER_ROW: usize = 0;
const CREDIT_ROW: usize = 1;
const CODE_ROW: usize = 2;
const NAME_ROW: usize = 3;

/// Grades are only read from this column onward.
const FIRST_GRADE_COLUMN: usize = 2;

/// Row-2 cells that label the row or the student identity columns, compared after
/// `normalize_label`.
const HEADER_LABELS: &[&str] = &[
    "code",
    "subject code",
    "subject codes",
    "sub code",
    "subject",
    "course code",
    "name",
    "student name",
    "reg no",
    "regno",
    "register no",
    "register number",
    "registration number",
    "roll no",
    "s no",
    "sno",
    "sl no",
];

lazy_static! {
    static ref SEMESTER_TEXT_REGEX: Regex =
        Regex::new(r"(?i)^(?:semester|sem|s)\s*[-:.]?\s*([1-8])$").unwrap();
    static ref REGISTER_NUMBER_REGEX: Regex = Regex::new(r"^[0-9]{10,12}$").unwrap();
}

pub const EXPECTED_LAYOUT: &str = "expected rows: 1 semester, 2 credits, 3 subject codes, \
4 subject names, 5 labels, then one row per student (name, register number, grades)";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error(
        "sheet has {found} non-empty rows, at least {min} are required; {layout}",
        min = MIN_ROWS,
        layout = EXPECTED_LAYOUT
    )]
    EmptySheet { found: usize },

    #[error("no subject columns detected in row 3; {}", EXPECTED_LAYOUT)]
    NoSubjectColumns,

    #[error(
        "no student row has both a register number and a valid grade; {}",
        EXPECTED_LAYOUT
    )]
    NoValidStudentRows,
}

impl IngestError {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::EmptySheet { .. } => "empty_sheet",
            IngestError::NoSubjectColumns => "no_subject_columns",
            IngestError::NoValidStudentRows => "no_valid_student_rows",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectColumn {
    pub index: usize,
    pub code: String,
    pub name: String,
    pub credit: f64,
    pub semester: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRecord {
    pub register_number: String,
    pub student_name: Option<String>,
    /// 1-based row in the uploaded sheet.
    pub row_number: usize,
    #[serde(flatten)]
    pub semester: SemesterRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoRegisterNumber,
    NoGrades,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRow {
    pub row_number: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnrecognizedGrade {
    pub row_number: usize,
    pub register_number: String,
    pub subject_code: String,
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub records: Vec<IngestRecord>,
    /// Distinct students per semester.
    pub semester_distribution: BTreeMap<u8, usize>,
    pub skipped_rows: usize,
    pub skipped: Vec<SkippedRow>,
    pub subject_columns: Vec<SubjectColumn>,
    /// Tokens that look like grades but are not on either scale; scored as 0 points.
    pub unrecognized_grades: Vec<UnrecognizedGrade>,
}

impl IngestResult {
    /// CGPA per register number over the semesters found in this sheet.
    pub fn cgpa_by_student(&self) -> BTreeMap<String, f64> {
        let mut per_student: BTreeMap<String, Vec<(f64, f64)>> = BTreeMap::new();
        for r in &self.records {
            per_student
                .entry(r.register_number.clone())
                .or_default()
                .push((r.semester.sgpa, r.semester.total_credits));
        }
        per_student
            .into_iter()
            .map(|(k, v)| (k, grades::cgpa(v)))
            .collect()
    }
}

struct HeaderBlock {
    columns: Vec<SubjectColumn>,
    /// Index of the first subject column; header columns before it are labels.
    first_subject_index: usize,
}

pub fn ingest(sheet: &GradeSheet, default_semester: u8) -> Result<IngestResult, IngestError> {
    let default_semester = default_semester.clamp(grades::MIN_SEMESTER, grades::MAX_SEMESTER);

    let rows: Vec<(usize, &Vec<Cell>)> = sheet
        .rows
        .iter()
        .enumerate()
        .filter(|(_, r)| !GradeSheet::row_is_blank(r))
        .collect();
    if rows.len() < MIN_ROWS {
        return Err(IngestError::EmptySheet { found: rows.len() });
    }

    let header = read_header(
        rows[SEMESTER_ROW].1,
        rows[CREDIT_ROW].1,
        rows[CODE_ROW].1,
        rows[NAME_ROW].1,
        default_semester,
    )?;
    log::debug!(
        "detected {} subject columns starting at column {}",
        header.columns.len(),
        header.first_subject_index
    );
    let by_index: HashMap<usize, &SubjectColumn> =
        header.columns.iter().map(|c| (c.index, c)).collect();
    let known_codes: Vec<&str> = header.columns.iter().map(|c| c.code.as_str()).collect();

    let student_rows = &rows[HEADER_ROWS..];
    let shift = choose_grade_shift(student_rows, &by_index, header.first_subject_index);
    if shift != 0 {
        log::debug!("student grade columns offset from header columns by {}", shift);
    }

    let mut records = Vec::new();
    let mut skipped = Vec::new();
    let mut unrecognized_grades = Vec::new();
    let mut students_by_semester: BTreeMap<u8, BTreeSet<String>> = BTreeMap::new();

    for (raw_idx, row) in student_rows {
        let row_number = raw_idx + 1;
        let Some(register_number) = extract_register_number(row) else {
            log::debug!("row {}: no register number", row_number);
            skipped.push(SkippedRow {
                row_number,
                reason: SkipReason::NoRegisterNumber,
            });
            continue;
        };
        let student_name = extract_name(row, &known_codes);

        let mut by_semester: BTreeMap<u8, Vec<SubjectRecord>> = BTreeMap::new();
        for (col, cell) in row.iter().enumerate().skip(FIRST_GRADE_COLUMN) {
            let Some(token) = cell.text() else {
                continue;
            };
            if !grades::is_grade_token(token) {
                continue;
            }
            let Some(subject) = header_column(col, shift).and_then(|h| by_index.get(&h)) else {
                continue;
            };
            if !grades::is_known_grade(token) {
                log::warn!(
                    "row {}: unrecognized grade {:?} for {}, scored as 0",
                    row_number,
                    token,
                    subject.code
                );
                unrecognized_grades.push(UnrecognizedGrade {
                    row_number,
                    register_number: register_number.clone(),
                    subject_code: subject.code.clone(),
                    grade: token.to_string(),
                });
            }
            by_semester
                .entry(subject.semester)
                .or_default()
                .push(SubjectRecord::new(
                    &subject.code,
                    &subject.name,
                    subject.credit,
                    token,
                ));
        }

        if by_semester.is_empty() {
            log::debug!("row {}: no grades for {}", row_number, register_number);
            skipped.push(SkippedRow {
                row_number,
                reason: SkipReason::NoGrades,
            });
            continue;
        }

        for (semester, subjects) in by_semester {
            students_by_semester
                .entry(semester)
                .or_default()
                .insert(register_number.clone());
            records.push(IngestRecord {
                register_number: register_number.clone(),
                student_name: student_name.clone(),
                row_number,
                semester: SemesterRecord::from_subjects(semester, subjects),
            });
        }
    }

    if records.is_empty() {
        return Err(IngestError::NoValidStudentRows);
    }

    Ok(IngestResult {
        records,
        semester_distribution: students_by_semester
            .into_iter()
            .map(|(k, v)| (k, v.len()))
            .collect(),
        skipped_rows: skipped.len(),
        skipped,
        subject_columns: header.columns,
        unrecognized_grades,
    })
}

fn read_header(
    semester_row: &[Cell],
    credit_row: &[Cell],
    code_row: &[Cell],
    name_row: &[Cell],
    default_semester: u8,
) -> Result<HeaderBlock, IngestError> {
    let direct: Vec<Option<u8>> = semester_row.iter().map(parse_semester).collect();

    let mut columns = Vec::new();
    // Column 0 always holds the row labels.
    for (index, cell) in code_row.iter().enumerate().skip(1) {
        let Some(code) = cell.text() else {
            continue;
        };
        if is_header_label(code) {
            continue;
        }
        let name = name_row
            .get(index)
            .and_then(|c| c.display())
            .unwrap_or_else(|| code.to_string());
        let credit = credit_row
            .get(index)
            .and_then(Cell::number)
            .filter(|n| *n >= 0.0)
            .unwrap_or(0.0);
        columns.push(SubjectColumn {
            index,
            code: code.to_string(),
            name,
            credit,
            semester: resolve_semester(&direct, index, default_semester),
        });
    }

    let Some(first_subject_index) = columns.first().map(|c| c.index) else {
        return Err(IngestError::NoSubjectColumns);
    };
    Ok(HeaderBlock {
        columns,
        first_subject_index,
    })
}

fn normalize_label(s: &str) -> String {
    s.to_lowercase()
        .replace(['.', '_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_header_label(s: &str) -> bool {
    HEADER_LABELS.contains(&normalize_label(s).as_str())
}

fn header_column(col: usize, shift: isize) -> Option<usize> {
    usize::try_from(col as isize - shift).ok()
}

fn grades_under_subjects(
    student_rows: &[(usize, &Vec<Cell>)],
    by_index: &HashMap<usize, &SubjectColumn>,
    shift: isize,
) -> usize {
    student_rows
        .iter()
        .filter(|(_, row)| extract_register_number(row).is_some())
        .flat_map(|&(_, row)| row.iter().enumerate().skip(FIRST_GRADE_COLUMN))
        .filter(|(col, cell)| {
            cell.text().map(grades::is_grade_token).unwrap_or(false)
                && header_column(*col, shift)
                    .map(|h| by_index.contains_key(&h))
                    .unwrap_or(false)
        })
        .count()
}

/// Student column `c` reads header column `c - shift`.
///
/// A grade normally sits under its own subject column (shift 0). Some exports put a
/// single label column in the header block but two identity columns (name, register
/// number) in student rows, so every grade lands one column right of its subject. The
/// alignment that puts more grade tokens under subject columns wins; ties stay at 0.
fn choose_grade_shift(
    student_rows: &[(usize, &Vec<Cell>)],
    by_index: &HashMap<usize, &SubjectColumn>,
    first_subject_index: usize,
) -> isize {
    let leading = FIRST_GRADE_COLUMN as isize - first_subject_index as isize;
    if leading == 0 {
        return 0;
    }
    let same_index = grades_under_subjects(student_rows, by_index, 0);
    if grades_under_subjects(student_rows, by_index, leading) > same_index {
        leading
    } else {
        0
    }
}

fn parse_semester(cell: &Cell) -> Option<u8> {
    let in_range = |n: i64| grades::is_valid_semester(n).then_some(n as u8);
    match cell {
        Cell::Number(n) if n.fract() == 0.0 => in_range(*n as i64),
        Cell::Text(_) => {
            let t = cell.text()?;
            if let Ok(n) = t.parse::<i64>() {
                return in_range(n);
            }
            let caps = SEMESTER_TEXT_REGEX.captures(t)?;
            in_range(caps.get(1)?.as_str().parse().ok()?)
        }
        _ => None,
    }
}

/// Nearest directly-mapped column by distance, left side first on a tie.
pub(crate) fn resolve_semester(direct: &[Option<u8>], index: usize, default: u8) -> u8 {
    if let Some(Some(s)) = direct.get(index) {
        return *s;
    }
    let len = direct.len().max(index + 1);
    for d in 1..len {
        if let Some(left) = index.checked_sub(d) {
            if let Some(Some(s)) = direct.get(left) {
                return *s;
            }
        }
        if let Some(Some(s)) = direct.get(index + d) {
            return *s;
        }
    }
    default
}

fn register_number_of(cell: &Cell) -> Option<String> {
    let s = cell.display()?;
    if !REGISTER_NUMBER_REGEX.is_match(&s) {
        return None;
    }
    if s.len() == 12 {
        Some(s)
    } else {
        Some(s[s.len() - 10..].to_string())
    }
}

fn extract_register_number(row: &[Cell]) -> Option<String> {
    row.iter().find_map(register_number_of)
}

fn extract_name(row: &[Cell], known_codes: &[&str]) -> Option<String> {
    row.iter()
        .filter_map(Cell::text)
        .find(|t| {
            t.chars().count() > 2
                && t.parse::<f64>().is_err()
                && !grades::is_grade_token(t)
                && !known_codes.contains(t)
        })
        .map(|t| t.to_string())
}
