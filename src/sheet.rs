use calamine::{open_workbook_auto, Data, Reader};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

/// One spreadsheet cell after loading. Workbook readers hand back strings, numbers and
/// empties interchangeably; every extraction point coerces through the helpers below.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Blank,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Blank => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(n) => !n.is_finite(),
        }
    }

    /// Trimmed text of a `Text` cell. Numbers are not rendered here.
    pub fn text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    None
                } else {
                    Some(t)
                }
            }
            _ => None,
        }
    }

    /// Text for either kind of non-blank cell; integral numbers render without a
    /// fractional part so `710022104002.0` reads back as `710022104002`.
    pub fn display(&self) -> Option<String> {
        match self {
            Cell::Blank => None,
            Cell::Text(_) => self.text().map(|s| s.to_string()),
            Cell::Number(n) => {
                if !n.is_finite() {
                    None
                } else if n.fract() == 0.0 && n.abs() < 1e15 {
                    Some(format!("{}", *n as i64))
                } else {
                    Some(n.to_string())
                }
            }
        }
    }

    pub fn number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) if n.is_finite() => Some(*n),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }
}

impl From<&Data> for Cell {
    fn from(d: &Data) -> Self {
        match d {
            Data::Empty => Cell::Blank,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::Error(_) => Cell::Blank,
            other => Cell::Text(other.to_string()),
        }
    }
}

impl From<&Value> for Cell {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => Cell::Blank,
            Value::String(s) => Cell::Text(s.clone()),
            Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Blank),
            Value::Bool(b) => Cell::Text(b.to_string()),
            other => Cell::Text(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradeSheet {
    pub rows: Vec<Vec<Cell>>,
}

impl GradeSheet {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }

    /// Builds a sheet from a JSON array of arrays (strings, numbers, nulls).
    pub fn from_json_rows(raw: &Value) -> Result<Self, SheetError> {
        let Some(rows) = raw.as_array() else {
            return Err(SheetError::Shape("rows must be an array of arrays".into()));
        };
        let mut out = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let Some(cells) = row.as_array() else {
                return Err(SheetError::Shape(format!("rows[{}] must be an array", i)));
            };
            out.push(cells.iter().map(Cell::from).collect());
        }
        Ok(Self::new(out))
    }

    pub fn row_is_blank(row: &[Cell]) -> bool {
        row.iter().all(Cell::is_blank)
    }
}

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("unsupported spreadsheet extension: {0}")]
    UnsupportedFormat(String),

    #[error("failed to open workbook: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("failed to read csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("workbook has no worksheets")]
    NoWorksheet,

    #[error("{0}")]
    Shape(String),
}

/// Loads the first worksheet of `path`. The reader is picked by extension.
pub fn load_grade_sheet(path: &Path) -> Result<GradeSheet, SheetError> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => load_workbook(path),
        "csv" => load_csv(path),
        _ => Err(SheetError::UnsupportedFormat(ext)),
    }
}

fn load_workbook(path: &Path) -> Result<GradeSheet, SheetError> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(SheetError::NoWorksheet)??;

    // Ranges begin at the first used cell, not at A1. Pad back so column indexes match
    // what the user sees.
    let (row_off, col_off) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));

    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); row_off];
    for r in range.rows() {
        let mut row = vec![Cell::Blank; col_off];
        row.extend(r.iter().map(Cell::from));
        rows.push(row);
    }
    log::debug!(
        "loaded workbook {} ({} rows)",
        path.to_string_lossy(),
        rows.len()
    );
    Ok(GradeSheet::new(rows))
}

fn load_csv(path: &Path) -> Result<GradeSheet, SheetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|s| {
                    if s.trim().is_empty() {
                        Cell::Blank
                    } else {
                        Cell::Text(s.to_string())
                    }
                })
                .collect(),
        );
    }
    Ok(GradeSheet::new(rows))
}
