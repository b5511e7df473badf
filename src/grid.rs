use std::path::Path;

use chrono::NaiveDateTime;

use crate::error::{IngestError, Result};

/// One untyped spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Blank,
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
    Bool(bool),
}

static BLANK: Cell = Cell::Blank;

impl Cell {
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Blank => true,
            Cell::Text(s) => {
                let s = s.trim();
                s.is_empty() || s.eq_ignore_ascii_case("nan")
            }
            Cell::Number(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Display text used for header matching and text fields. Integral numbers
    /// print without a fractional part.
    pub fn text(&self) -> String {
        match self {
            Cell::Blank => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(f) => format_number(*f),
            Cell::Date(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Cell::Bool(b) => b.to_string(),
        }
    }
}

pub fn format_number(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

/// Rows x columns of cells, zero-based. Rows may be ragged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawGrid {
    rows: Vec<Vec<Cell>>,
}

impl RawGrid {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }

    /// Builds a text-only grid; empty strings become blanks.
    pub fn from_text_rows(rows: &[&[&str]]) -> Self {
        Self::new(
            rows.iter()
                .map(|r| r.iter().map(|v| text_cell(v)).collect())
                .collect(),
        )
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn row(&self, r: usize) -> &[Cell] {
        self.rows.get(r).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn cell(&self, r: usize, c: usize) -> &Cell {
        self.rows.get(r).and_then(|row| row.get(c)).unwrap_or(&BLANK)
    }

    pub fn is_blank_row(&self, r: usize) -> bool {
        self.row(r).iter().all(Cell::is_blank)
    }
}

fn text_cell(v: &str) -> Cell {
    if v.trim().is_empty() {
        Cell::Blank
    } else {
        Cell::Text(v.to_string())
    }
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

pub fn load_grid(file_path: &Path) -> Result<RawGrid> {
    let ext = file_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => load_csv(file_path),
        #[cfg(feature = "xlsx")]
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => load_workbook(file_path),
        _ => Err(IngestError::UnsupportedFile(
            file_path.display().to_string(),
        )),
    }
}

pub fn load_csv(file_path: &Path) -> Result<RawGrid> {
    let file = std::fs::File::open(file_path)?;
    read_csv(std::io::BufReader::new(file))
}

pub fn read_csv<R: std::io::Read>(reader: R) -> Result<RawGrid> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        rows.push(record.iter().map(text_cell).collect());
    }
    Ok(RawGrid::new(rows))
}

/// Reads the first worksheet. calamine trims leading empty rows and columns
/// from the range, so the grid is re-padded to keep positional indices stable.
#[cfg(feature = "xlsx")]
pub fn load_workbook(file_path: &Path) -> Result<RawGrid> {
    use calamine::Reader;

    let mut workbook = calamine::open_workbook_auto(file_path)
        .map_err(|e| IngestError::Workbook(format!("Failed to open {}: {e}", file_path.display())))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(Ok(range)) => range,
        Some(Err(e)) => return Err(IngestError::Workbook(format!("Failed to read first sheet: {e}"))),
        None => return Ok(RawGrid::default()),
    };
    let (row_offset, col_offset) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));

    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); row_offset];
    for row in range.rows() {
        let mut cells = vec![Cell::Blank; col_offset];
        cells.extend(row.iter().map(from_calamine));
        rows.push(cells);
    }
    Ok(RawGrid::new(rows))
}

#[cfg(feature = "xlsx")]
fn from_calamine(data: &calamine::Data) -> Cell {
    use calamine::Data;

    match data {
        Data::Empty | Data::Error(_) => Cell::Blank,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => text_cell(s),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => match crate::decode::serial_to_datetime(dt.as_f64()) {
            Some(ts) => Cell::Date(ts),
            None => Cell::Number(dt.as_f64()),
        },
    }
}
