use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use calamine::{open_workbook, Data, Range, Reader, Xlsx};

/// A spreadsheet row keyed by column header.
pub type TableRow = HashMap<String, CellValue>;

/// Raw cell value decoupled from the spreadsheet backend so the coercion
/// helpers and the document builder stay testable without workbook files.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

/// The three named sheets the corpus is built from.
pub struct WorkbookTables {
    pub rating: Vec<TableRow>,
    pub certificate: Vec<TableRow>,
    pub statistics: Vec<TableRow>,
}

pub fn load_workbook_tables(path: &Path) -> Result<WorkbookTables> {
    let mut workbook: Xlsx<_> = open_workbook(path)
        .with_context(|| format!("failed to open workbook: {}", path.display()))?;

    Ok(WorkbookTables {
        rating: sheet_rows(&mut workbook, "rating")?,
        certificate: sheet_rows(&mut workbook, "certificate")?,
        statistics: sheet_rows(&mut workbook, "certificate_statistics")?,
    })
}

fn sheet_rows<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    name: &str,
) -> Result<Vec<TableRow>> {
    let range = workbook
        .worksheet_range(name)
        .with_context(|| format!("workbook is missing sheet '{name}'"))?;
    Ok(table_rows(&range))
}

/// Converts a sheet range into header-keyed rows. Row 1 supplies the headers;
/// columns with blank headers are dropped and fully blank rows are skipped.
fn table_rows(range: &Range<Data>) -> Vec<TableRow> {
    let mut rows_iter = range.rows();
    let Some(header_cells) = rows_iter.next() else {
        return Vec::new();
    };

    let headers = header_cells
        .iter()
        .map(|cell| match cell {
            Data::Empty => String::new(),
            Data::String(text) => text.trim().to_string(),
            other => other.to_string().trim().to_string(),
        })
        .collect::<Vec<String>>();

    let mut rows = Vec::<TableRow>::new();
    for raw in rows_iter {
        let cells = raw.iter().map(cell_value).collect::<Vec<CellValue>>();
        if cells.iter().all(is_blank_cell) {
            continue;
        }

        let mut row = TableRow::new();
        for (index, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let cell = cells.get(index).cloned().unwrap_or(CellValue::Empty);
            row.insert(header.clone(), cell);
        }
        rows.push(row);
    }

    rows
}

fn cell_value(data: &Data) -> CellValue {
    match data {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::String(text) => CellValue::Text(text.clone()),
        Data::Float(value) => CellValue::Number(*value),
        Data::Int(value) => CellValue::Number(*value as f64),
        Data::Bool(value) => CellValue::Bool(*value),
        Data::DateTime(value) => CellValue::Number(value.as_f64()),
        Data::DateTimeIso(text) | Data::DurationIso(text) => CellValue::Text(text.clone()),
    }
}

fn is_blank_cell(cell: &CellValue) -> bool {
    match cell {
        CellValue::Empty => true,
        CellValue::Text(text) => text.is_empty(),
        _ => false,
    }
}

/// Trimmed non-empty text, or None. Integral numbers render without a
/// fractional part so numeric ids and years survive the spreadsheet round-trip.
pub fn normalize_text(cell: &CellValue) -> Option<String> {
    match cell {
        CellValue::Empty => None,
        CellValue::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        CellValue::Number(value) => {
            if value.is_nan() {
                return None;
            }
            if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
                Some(format!("{}", *value as i64))
            } else {
                Some(value.to_string())
            }
        }
        CellValue::Bool(value) => Some(value.to_string()),
    }
}

/// Lenient integer coercion: blank, "null", and non-numeric text degrade to None.
pub fn to_int(cell: &CellValue) -> Option<i64> {
    match cell {
        CellValue::Empty | CellValue::Bool(_) => None,
        CellValue::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed == "null" {
                return None;
            }
            trimmed.parse::<i64>().ok()
        }
        CellValue::Number(value) => {
            if value.is_nan() {
                None
            } else {
                Some(value.round() as i64)
            }
        }
    }
}

/// Lenient float coercion with the same degradation rules as [`to_int`].
pub fn to_float(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Empty | CellValue::Bool(_) => None,
        CellValue::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed == "null" {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|value| !value.is_nan())
        }
        CellValue::Number(value) => {
            if value.is_nan() {
                None
            } else {
                Some(*value)
            }
        }
    }
}
