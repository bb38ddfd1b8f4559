//! Read-only view of previously submitted worksheets.

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::grid::Row;
use crate::locator::{DATE_FORMAT, parse_sheet_date, sheet_name};
use crate::sheets::{SheetService, Worksheet};

/// A dated worksheet found in the spreadsheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub date: NaiveDate,
    pub title: String,
}

/// Contents of one worksheet: first row as header, the rest as data
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct HistoryTable {
    pub title: String,
    pub header: Row,
    pub rows: Vec<Row>,
}

impl HistoryTable {
    fn from_values(title: String, mut values: Vec<Row>) -> Self {
        if values.is_empty() {
            return HistoryTable {
                title,
                ..Default::default()
            };
        }
        let mut header = values.remove(0);
        let width = values.iter().map(Vec::len).chain([header.len()]).max().unwrap_or(0);
        header.resize(width, String::new());
        for row in &mut values {
            row.resize(width, String::new());
        }
        HistoryTable {
            title,
            header,
            rows: values,
        }
    }
}

/// Worksheets named `{prefix}{YYYY-MM-DD}`, newest first
///
/// Titles whose suffix is not a date are skipped.
pub async fn list_dates(service: &dyn SheetService, prefix: &str) -> Result<Vec<HistoryEntry>> {
    let mut entries: Vec<HistoryEntry> = service
        .worksheets()
        .await?
        .into_iter()
        .filter_map(|Worksheet { title, .. }| {
            parse_sheet_date(prefix, &title).map(|date| HistoryEntry { date, title })
        })
        .collect();

    entries.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(entries)
}

/// Parse a `YYYY-MM-DD` date chosen in the history selector
pub fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
        .map_err(|_| AppError::Validation(format!("'{text}' is not a YYYY-MM-DD date")))
}

/// All rows of the worksheet for `date`
pub async fn load(service: &dyn SheetService, prefix: &str, date: NaiveDate) -> Result<HistoryTable> {
    let title = sheet_name(prefix, date);
    let ws = service
        .worksheet(&title)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("worksheet {title}")))?;

    let values = service.get_all_values(&ws).await?;
    Ok(HistoryTable::from_values(ws.title, values))
}
