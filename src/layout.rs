//! Sheet layout discovery: the test metadata block, the header row and the
//! mapping from discovered header text to canonical columns.

use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::grid::{serial_to_datetime, CellValue, Grid};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::{HashMap, HashSet};

pub const COL_ROLL: &str = "StuID";
pub const COL_NAME: &str = "Name";
pub const COL_BATCH: &str = "Batch";
pub const COL_TOTAL_R: &str = "Total-R";
pub const COL_TOTAL_W: &str = "Total-W";
pub const COL_TOTAL_U: &str = "Total-U";
pub const COL_TOTAL_S: &str = "Total-S";
pub const COL_PERCENTAGE: &str = "%age";
pub const COL_RANK: &str = "Rank";

pub const CANONICAL_COLUMNS: [&str; 21] = [
    COL_ROLL,
    COL_NAME,
    COL_BATCH,
    "Phy-R",
    "Phy-W",
    "Phy-U",
    "Phy-T",
    "Chem-R",
    "Chem-W",
    "Chem-U",
    "Chem-T",
    "Math-R",
    "Math-W",
    "Math-U",
    "Math-T",
    COL_TOTAL_R,
    COL_TOTAL_W,
    COL_TOTAL_U,
    COL_TOTAL_S,
    COL_PERCENTAGE,
    COL_RANK,
];

/// Literal column-A labels that mark the header row.
const ROLL_HEADER_LABELS: [&str; 3] = ["stuid", "student id", "roll number"];

/// Header prefixes belonging to result columns; such columns are never
/// treated as student profile fields.
const RESULT_PREFIXES: [&str; 6] = ["phy", "chem", "math", "total", "%age", "rank"];

const FOUND_PREVIEW_LEN: usize = 10;

// ---------------------------------------------------------------------------
// Metadata block

#[derive(Debug, Clone, PartialEq)]
pub struct TestMetadata {
    pub test_name: Option<String>,
    /// `None` when the block has no date or it could not be parsed.
    pub test_date: Option<NaiveDate>,
    pub max_marks: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetaField {
    Name,
    Date,
    MaxMarks,
}

fn classify_label(label: &str) -> Option<MetaField> {
    let l = label.trim().to_lowercase();
    if l.is_empty() {
        return None;
    }
    if l.contains("date") {
        Some(MetaField::Date)
    } else if l.contains("max") || l.contains("mark") {
        Some(MetaField::MaxMarks)
    } else if l.contains("name") || l.contains("test") || l.contains("exam") {
        Some(MetaField::Name)
    } else {
        None
    }
}

#[derive(Default)]
struct MetaSlots {
    // (priority, value); positional = 0, inline label = 1, adjacent label = 2.
    name: Option<(u8, CellValue)>,
    date: Option<(u8, CellValue)>,
    max_marks: Option<(u8, CellValue)>,
}

impl MetaSlots {
    fn offer(&mut self, field: MetaField, priority: u8, value: CellValue) {
        let slot = match field {
            MetaField::Name => &mut self.name,
            MetaField::Date => &mut self.date,
            MetaField::MaxMarks => &mut self.max_marks,
        };
        match slot {
            Some((p, _)) if *p >= priority => {}
            _ => *slot = Some((priority, value)),
        }
    }
}

/// Reads the small label/value block (rows `1..=metadata_rows` of the value
/// column and the label column to its left).
pub fn extract_metadata(grid: &Grid, cfg: &ImportConfig) -> TestMetadata {
    let value_col = cfg.metadata_value_column;
    let label_col = cfg.metadata_label_column;
    let mut slots = MetaSlots::default();

    for row in 1..=cfg.metadata_rows {
        let Some(cell) = grid.cell_at(row, value_col) else {
            continue;
        };
        if cell.is_blank() {
            continue;
        }
        if let CellValue::Text(text) = cell {
            if let Some((label, value)) = text.split_once(':') {
                if let Some(field) = classify_label(label) {
                    let value = value.trim();
                    if !value.is_empty() {
                        slots.offer(field, 1, CellValue::Text(value.to_string()));
                    }
                    continue;
                }
            }
        }
        match row {
            1 => slots.offer(MetaField::Name, 0, cell.clone()),
            2 => slots.offer(MetaField::Date, 0, cell.clone()),
            _ => {}
        }
    }

    // Labels in the adjacent column beat anything parsed inline.
    for row in 1..=cfg.metadata_rows {
        let label = grid.text_at(row, label_col);
        let Some(field) = classify_label(label.trim_end_matches(':')) else {
            continue;
        };
        if let Some(cell) = grid.cell_at(row, value_col) {
            if !cell.is_blank() {
                slots.offer(field, 2, cell.clone());
            }
        }
    }

    let test_name = slots
        .name
        .map(|(_, v)| v.as_text().trim().to_string())
        .filter(|s| !s.is_empty());
    let test_date = slots.date.and_then(|(_, v)| cell_to_date(&v));
    let max_marks = slots
        .max_marks
        .and_then(|(_, v)| cell_to_integer(&v))
        .unwrap_or(cfg.default_max_marks);

    TestMetadata {
        test_name,
        test_date,
        max_marks,
    }
}

fn cell_to_integer(v: &CellValue) -> Option<i64> {
    match v {
        CellValue::Number(f) if f.fract() == 0.0 => Some(*f as i64),
        CellValue::Text(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn cell_to_date(v: &CellValue) -> Option<NaiveDate> {
    match v {
        CellValue::DateTime(dt) => Some(dt.date()),
        CellValue::Number(f) => serial_to_datetime(*f).map(|dt| dt.date()),
        CellValue::Text(s) => parse_test_date(s),
        CellValue::Bool(_) => None,
    }
}

/// Lenient date parsing for hand-typed test dates. Day-first forms are tried
/// before month-first ones.
pub fn parse_test_date(s: &str) -> Option<NaiveDate> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    const DATE_FORMATS: [&str; 12] = [
        "%Y-%m-%d",
        "%d/%m/%Y",
        "%d-%m-%Y",
        "%d.%m.%Y",
        "%m/%d/%Y",
        "%Y/%m/%d",
        "%d/%m/%y",
        "%d %B %Y",
        "%d %b %Y",
        "%B %d, %Y",
        "%b %d, %Y",
        "%d-%b-%Y",
    ];
    for f in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(t, f) {
            return Some(d);
        }
    }
    for f in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, f) {
            return Some(dt.date());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.date_naive());
    }
    None
}

// ---------------------------------------------------------------------------
// Header row

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSource {
    /// Column A carries a roll-number label.
    Label,
    /// The probe row holds enough canonical column names.
    Probe,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderRow {
    pub row: u32,
    pub source: HeaderSource,
}

/// A literal roll-number label in column A wins; the probe row is only
/// considered when no label is found.
pub fn locate_header_row(grid: &Grid, cfg: &ImportConfig) -> HeaderRow {
    for row in 1..=cfg.header_scan_rows {
        let text = grid.text_at(row, 1).to_lowercase();
        if ROLL_HEADER_LABELS.contains(&text.as_str()) {
            return HeaderRow {
                row,
                source: HeaderSource::Label,
            };
        }
    }

    let probe = cfg.header_probe_row;
    let matches = (1..=grid.row_width(probe))
        .filter(|&c| {
            let text = grid.text_at(probe, c);
            CANONICAL_COLUMNS
                .iter()
                .any(|name| name.eq_ignore_ascii_case(&text))
        })
        .count();
    if matches >= cfg.header_probe_min_matches {
        return HeaderRow {
            row: probe,
            source: HeaderSource::Probe,
        };
    }

    HeaderRow {
        row: cfg.default_header_row,
        source: HeaderSource::Default,
    }
}

// ---------------------------------------------------------------------------
// Column mapping

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileField {
    ParentName,
    ParentOccupation,
    Address,
    ContactNumber,
    GeneralRemark,
}

const PROFILE_SYNONYMS: &[(&str, ProfileField)] = &[
    ("parent", ProfileField::ParentName),
    ("parent name", ProfileField::ParentName),
    ("parents name", ProfileField::ParentName),
    ("father name", ProfileField::ParentName),
    ("father's name", ProfileField::ParentName),
    ("guardian", ProfileField::ParentName),
    ("guardian name", ProfileField::ParentName),
    ("parent occupation", ProfileField::ParentOccupation),
    ("occupation", ProfileField::ParentOccupation),
    ("father occupation", ProfileField::ParentOccupation),
    ("address", ProfileField::Address),
    ("residence", ProfileField::Address),
    ("contact", ProfileField::ContactNumber),
    ("contact number", ProfileField::ContactNumber),
    ("contact no", ProfileField::ContactNumber),
    ("phone", ProfileField::ContactNumber),
    ("phone number", ProfileField::ContactNumber),
    ("mobile", ProfileField::ContactNumber),
    ("mobile number", ProfileField::ContactNumber),
    ("remark", ProfileField::GeneralRemark),
    ("remarks", ProfileField::GeneralRemark),
    ("note", ProfileField::GeneralRemark),
    ("notes", ProfileField::GeneralRemark),
    ("comment", ProfileField::GeneralRemark),
    ("comments", ProfileField::GeneralRemark),
];

fn profile_field_for(header: &str) -> Option<ProfileField> {
    let key = header.trim().to_lowercase();
    PROFILE_SYNONYMS
        .iter()
        .find(|(synonym, _)| *synonym == key)
        .map(|(_, field)| *field)
}

/// Canonical column name -> sheet column; every row read goes through it.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMap {
    columns: HashMap<&'static str, u32>,
    pub profile_columns: Vec<(ProfileField, u32)>,
}

impl ColumnMap {
    pub fn column(&self, canonical: &str) -> Option<u32> {
        self.columns.get(canonical).copied()
    }

    pub fn profile_column(&self, field: ProfileField) -> Option<u32> {
        self.profile_columns
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, c)| *c)
    }
}

/// Resolves every canonical column against the header row (exact match first,
/// then case-insensitive) and picks up optional profile columns.
pub fn map_columns(grid: &Grid, header_row: u32) -> Result<ColumnMap, ImportError> {
    let discovered: Vec<(u32, String)> = (1..=grid.row_width(header_row))
        .map(|c| (c, grid.text_at(header_row, c)))
        .filter(|(_, h)| !h.is_empty())
        .collect();

    let mut columns = HashMap::new();
    let mut consumed = HashSet::new();
    let mut missing = Vec::new();

    for name in CANONICAL_COLUMNS {
        let hit = discovered
            .iter()
            .find(|(c, h)| !consumed.contains(c) && h == name)
            .or_else(|| {
                discovered
                    .iter()
                    .find(|(c, h)| !consumed.contains(c) && h.eq_ignore_ascii_case(name))
            });
        match hit {
            Some((c, _)) => {
                consumed.insert(*c);
                columns.insert(name, *c);
            }
            None => missing.push(name.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(ImportError::MissingColumns {
            missing,
            found: discovered
                .iter()
                .take(FOUND_PREVIEW_LEN)
                .map(|(_, h)| h.clone())
                .collect(),
        });
    }

    let mut profile_columns: Vec<(ProfileField, u32)> = Vec::new();
    for (c, header) in &discovered {
        if consumed.contains(c) {
            continue;
        }
        let lower = header.to_lowercase();
        if RESULT_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            continue;
        }
        if let Some(field) = profile_field_for(header) {
            if !profile_columns.iter().any(|(f, _)| *f == field) {
                profile_columns.push((field, *c));
            }
        }
    }

    Ok(ColumnMap {
        columns,
        profile_columns,
    })
}
