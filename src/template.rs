use calamine::{Data, Reader, open_workbook_auto};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::grid::{Grid, Row};

/// Reference grid for the specialty mapping editor
///
/// Loaded once from a local spreadsheet file and kept for the lifetime of
/// the process. Every row is exactly as wide as the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Template {
    pub header: Row,
    pub rows: Grid,
}

impl Template {
    /// Build a template from raw rows, the first of which is the header
    ///
    /// Data rows are padded or cut to the header's width.
    pub fn from_rows(mut raw: Vec<Row>) -> Result<Self> {
        if raw.is_empty() {
            return Err(AppError::Template("template file is empty".to_string()));
        }
        let header = raw.remove(0);
        let width = header.len();
        if width == 0 || header.iter().all(|h| h.trim().is_empty()) {
            return Err(AppError::Template("template header row is empty".to_string()));
        }

        let rows = raw
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();

        Ok(Template {
            header,
            rows: Grid::new(rows),
        })
    }

    pub fn width(&self) -> usize {
        self.header.len()
    }
}

/// Load a template from a CSV file
///
/// Quoted fields may contain commas, doubled quotes and line breaks.
///
/// # Arguments
/// * `filepath` - Path to the CSV file to load
///
/// # Returns
/// * `Result<Template>` - The loaded template or an error
///
/// # Examples
/// ```no_run
/// use secure_entry::template::from_csv;
///
/// match from_csv("specialty_mapping.csv") {
///     Ok(template) => println!("Loaded {} mapping rows", template.rows.len()),
///     Err(e) => eprintln!("Error loading CSV: {}", e),
/// }
/// ```
pub fn from_csv(filepath: impl AsRef<Path>) -> Result<Template> {
    let content = fs::read_to_string(filepath)?;
    Template::from_rows(parse_csv(&content))
}

/// Load a template from the first worksheet of an Excel or ODS file
///
/// Numbers are rendered the way the sheet would show them, empty cells
/// become empty strings.
///
/// # Arguments
/// * `filepath` - Path to the workbook to load
///
/// # Returns
/// * `Result<Template>` - The loaded template or an error
pub fn from_excel(filepath: impl AsRef<Path>) -> Result<Template> {
    let mut workbook = open_workbook_auto(filepath.as_ref())
        .map_err(|e| AppError::Template(format!("unable to open workbook: {e}")))?;

    // Get the first worksheet
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| AppError::Template("no sheets found in workbook".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| AppError::Template(format!("unable to read worksheet {sheet_name}: {e}")))?;

    let raw = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    Template::from_rows(raw)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

// Parse CSV text into rows. Quoted fields may span line breaks;
// lines holding only whitespace are skipped.
fn parse_csv(content: &str) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = content.chars().peekable();

    let mut end_row = |row: &mut Row, field: &mut String, quoted: bool| {
        row.push(std::mem::take(field));
        let blank = !quoted && row.len() == 1 && row[0].trim().is_empty();
        let finished = std::mem::take(row);
        if !blank {
            rows.push(finished);
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    // Double quote inside quoted field - add a single quote
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                    quoted = true;
                }
            }
            ',' if !in_quotes => {
                row.push(std::mem::take(&mut current_field));
            }
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                end_row(&mut row, &mut current_field, quoted);
                quoted = false;
            }
            _ => current_field.push(c),
        }
    }

    if !row.is_empty() || !current_field.is_empty() {
        end_row(&mut row, &mut current_field, quoted);
    }
    rows
}

/// Detect file type and load the template with the matching reader
///
/// # Arguments
/// * `filepath` - Path to a `.csv`, `.xlsx`, `.xlsm`, `.xls` or `.ods` file
///
/// # Returns
/// * `Result<Template>` - The loaded template or an error
pub fn load_template(filepath: impl AsRef<Path>) -> Result<Template> {
    let path = filepath.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match extension.as_deref() {
        Some("csv") => from_csv(path),
        Some("xlsx") | Some("xlsm") | Some("xls") | Some("ods") => from_excel(path),
        Some(ext) => Err(AppError::Template(format!("unsupported file extension: {ext}"))),
        None => Err(AppError::Template("file has no extension".to_string())),
    }
}
