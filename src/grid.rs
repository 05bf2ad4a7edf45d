//! First-worksheet view of a workbook as a grid of typed cells.
//!
//! Rows and columns are 1-based, the way they are numbered in a spreadsheet
//! (`A1` is `cell_at(1, 1)`). Empty cells are `None`.

use anyhow::Context;
use calamine::{open_workbook_auto, Data, DataType, Range, Reader};
use chrono::{NaiveDateTime, Timelike};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    /// Display text of the cell. Whole numbers render without a decimal part so
    /// numeric roll numbers read back as `1024`, not `1024.0`.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(f) => format_number(*f),
            CellValue::Bool(b) => {
                if *b {
                    "TRUE".to_string()
                } else {
                    "FALSE".to_string()
                }
            }
            CellValue::DateTime(dt) => {
                if dt.time().num_seconds_from_midnight() == 0 {
                    dt.date().format("%Y-%m-%d").to_string()
                } else {
                    dt.format("%Y-%m-%d %H:%M:%S").to_string()
                }
            }
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(f) => Some(*f),
            CellValue::Text(s) => {
                let t = s.trim().trim_end_matches('%').trim();
                if t.is_empty() {
                    return None;
                }
                t.replace(',', "").parse::<f64>().ok().filter(|f| f.is_finite())
            }
            CellValue::Bool(_) | CellValue::DateTime(_) => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.trim().is_empty())
    }
}

fn format_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        format!("{:.0}", f)
    } else {
        f.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    rows: Vec<Vec<Option<CellValue>>>,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a grid from text rows starting at `A1`; empty strings are empty cells.
    pub fn from_text_rows<S: AsRef<str>>(rows: &[Vec<S>]) -> Self {
        let mut grid = Grid::new();
        for (r, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                let v = v.as_ref();
                if !v.is_empty() {
                    grid.set(r as u32 + 1, c as u32 + 1, CellValue::Text(v.to_string()));
                }
            }
        }
        grid
    }

    pub fn set(&mut self, row: u32, col: u32, value: CellValue) {
        if row == 0 || col == 0 {
            return;
        }
        let (r0, c0) = ((row - 1) as usize, (col - 1) as usize);
        if self.rows.len() <= r0 {
            self.rows.resize_with(r0 + 1, Vec::new);
        }
        let cells = &mut self.rows[r0];
        if cells.len() <= c0 {
            cells.resize(c0 + 1, None);
        }
        cells[c0] = Some(value);
    }

    pub fn cell_at(&self, row: u32, col: u32) -> Option<&CellValue> {
        if row == 0 || col == 0 {
            return None;
        }
        self.rows
            .get((row - 1) as usize)
            .and_then(|cells| cells.get((col - 1) as usize))
            .and_then(|c| c.as_ref())
    }

    /// Trimmed text of a cell; empty string for empty cells.
    pub fn text_at(&self, row: u32, col: u32) -> String {
        self.cell_at(row, col)
            .map(|c| c.as_text().trim().to_string())
            .unwrap_or_default()
    }

    /// Last row of the used range (0 for an empty sheet).
    pub fn last_row(&self) -> u32 {
        self.rows.len() as u32
    }

    /// Widest populated column of a row.
    pub fn row_width(&self, row: u32) -> u32 {
        if row == 0 {
            return 0;
        }
        self.rows
            .get((row - 1) as usize)
            .map(|cells| cells.len() as u32)
            .unwrap_or(0)
    }

    pub fn is_row_blank(&self, row: u32) -> bool {
        (1..=self.row_width(row)).all(|c| match self.cell_at(row, c) {
            None => true,
            Some(v) => v.is_blank(),
        })
    }
}

/// Loads the first worksheet. `.csv` files are read as text; everything else
/// goes through calamine's format detection (xlsx, xlsm, xlsb, xls, ods).
pub fn load_grid(path: &Path) -> anyhow::Result<Grid> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if ext == "csv" {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
        return grid_from_csv(&bytes);
    }

    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open workbook {}", path.to_string_lossy()))?;
    let Some(range) = workbook.worksheet_range_at(0) else {
        return Ok(Grid::new());
    };
    let range = range.context("failed to read first worksheet")?;
    Ok(grid_from_range(&range))
}

fn grid_from_range(range: &Range<Data>) -> Grid {
    let mut grid = Grid::new();
    let Some((start_row, start_col)) = range.start() else {
        return grid;
    };
    // Range rows are relative to range.start().
    for (r, cells) in range.rows().enumerate() {
        for (c, cell) in cells.iter().enumerate() {
            if let Some(v) = cell_from_data(cell) {
                grid.set(start_row + r as u32 + 1, start_col + c as u32 + 1, v);
            }
        }
    }
    grid
}

fn cell_from_data(v: &Data) -> Option<CellValue> {
    match v {
        Data::Empty => None,
        Data::String(s) => Some(CellValue::Text(s.clone())),
        Data::Float(f) => Some(CellValue::Number(*f)),
        Data::Int(i) => Some(CellValue::Number(*i as f64)),
        Data::Bool(b) => Some(CellValue::Bool(*b)),
        Data::DateTime(dt) => dt.as_datetime().map(CellValue::DateTime),
        Data::DateTimeIso(s) => Some(
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .map(CellValue::DateTime)
                .unwrap_or_else(|_| CellValue::Text(s.clone())),
        ),
        Data::DurationIso(s) => Some(CellValue::Text(s.clone())),
        Data::Error(_) => None,
    }
}

/// Calendar timestamp for an Excel serial held in a plain numeric cell.
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    Data::Float(serial).as_datetime()
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Every CSV record becomes one sheet row. Lines holding nothing at all are
/// skipped by the reader; rows of empty fields (`,,,`) are kept as blank rows.
fn grid_from_csv(bytes: &[u8]) -> anyhow::Result<Grid> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut grid = Grid::new();
    let mut record = csv::ByteRecord::new();
    let mut row: u32 = 0;
    while reader
        .read_byte_record(&mut record)
        .with_context(|| format!("malformed csv after row {}", row))?
    {
        row += 1;
        for (c, field) in record.iter().enumerate() {
            let text = String::from_utf8_lossy(field);
            if !text.trim().is_empty() {
                grid.set(row, c as u32 + 1, CellValue::Text(text.into_owned()));
            }
        }
    }
    Ok(grid)
}
