//! Remote spreadsheet access.
//!
//! The service is only reached through [`SheetService`]. The Google Sheets
//! client lives in `google.rs`; [`MemorySheets`] keeps worksheets in process
//! for offline runs and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

use crate::error::{AppError, Result};

/// Handle to one worksheet of the open spreadsheet document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worksheet {
    pub id: i64,
    pub title: String,
    pub rows: u32,
    pub cols: u32,
}

/// How the service interprets written values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueInput {
    /// Stored verbatim
    Raw,
    /// Parsed as if typed into the sheet UI (numbers, dates, formulas)
    UserEntered,
}

impl ValueInput {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueInput::Raw => "RAW",
            ValueInput::UserEntered => "USER_ENTERED",
        }
    }
}

/// Operations consumed from the remote spreadsheet service
#[async_trait]
pub trait SheetService: Send + Sync {
    /// All worksheets of the document, in tab order
    async fn worksheets(&self) -> Result<Vec<Worksheet>>;

    /// Worksheet with exactly this title, if any
    async fn worksheet(&self, title: &str) -> Result<Option<Worksheet>> {
        Ok(self
            .worksheets()
            .await?
            .into_iter()
            .find(|ws| ws.title == title))
    }

    async fn add_worksheet(&self, title: &str, rows: u32, cols: u32) -> Result<Worksheet>;

    /// Append one row after the last non-empty row of the worksheet
    async fn append_row(&self, ws: &Worksheet, values: &[String], input: ValueInput)
    -> Result<()>;

    /// Erase every value, keeping the worksheet itself
    async fn clear(&self, ws: &Worksheet) -> Result<()>;

    /// Write a block of values whose top-left corner is `start` (A1 notation)
    async fn update(
        &self,
        ws: &Worksheet,
        start: &str,
        values: &[Vec<String>],
        input: ValueInput,
    ) -> Result<()>;

    /// Every row up to the last non-empty one
    async fn get_all_values(&self, ws: &Worksheet) -> Result<Vec<Vec<String>>>;
}

/// Convert column number to letter (A=1, B=2, etc.)
///
/// ```
/// use secure_entry::sheets::column_to_letter;
///
/// assert_eq!(column_to_letter(1), "A");
/// assert_eq!(column_to_letter(26), "Z");
/// assert_eq!(column_to_letter(27), "AA");
/// ```
pub fn column_to_letter(col: u32) -> String {
    let mut name = String::new();
    let mut n = col;

    while n > 0 {
        n -= 1;
        name.insert(0, (b'A' + (n % 26) as u8) as char);
        n /= 26;
    }

    name
}

/// Parse an A1 cell reference into zero-based (row, col)
pub fn parse_a1(cell: &str) -> Result<(usize, usize)> {
    let split = cell
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| AppError::Validation(format!("bad cell reference '{cell}'")))?;
    let (letters, digits) = cell.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(AppError::Validation(format!("bad cell reference '{cell}'")));
    }

    let col = letters
        .bytes()
        .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize);
    let row: usize = digits
        .parse()
        .map_err(|_| AppError::Validation(format!("bad cell reference '{cell}'")))?;
    if row == 0 {
        return Err(AppError::Validation(format!("bad cell reference '{cell}'")));
    }

    Ok((row - 1, col - 1))
}

/// A1 range covering `rows` x `cols` cells from `start`, qualified with the
/// worksheet title
pub fn a1_range(title: &str, start: &str, rows: usize, cols: usize) -> Result<String> {
    let (row, col) = parse_a1(start)?;
    let end_row = row + rows.max(1);
    let end_col = column_to_letter((col + cols.max(1)) as u32);
    Ok(format!(
        "{}!{}:{}{}",
        quote_title(title),
        start,
        end_col,
        end_row
    ))
}

/// Sheet titles are single-quoted in ranges, inner quotes doubled
pub fn quote_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// A remote call as seen by [`MemorySheets`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetCall {
    List,
    Add(String),
    Append(String, Vec<String>),
    Clear(String),
    Update(String, String),
    Read(String),
}

impl SheetCall {
    /// True for calls that change remote content
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            SheetCall::Add(_) | SheetCall::Append(..) | SheetCall::Clear(_) | SheetCall::Update(..)
        )
    }
}

#[derive(Debug, Default)]
struct MemoryBook {
    sheets: Vec<(Worksheet, Vec<Vec<String>>)>,
    calls: Vec<SheetCall>,
    next_id: i64,
    fail_on: Option<String>,
}

/// In-process spreadsheet with the same contract as the remote one
#[derive(Debug, Default)]
pub struct MemorySheets {
    book: Mutex<MemoryBook>,
}

impl MemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self) -> Result<MutexGuard<'_, MemoryBook>> {
        self.book
            .lock()
            .map_err(|_| AppError::Remote("memory sheets lock poisoned".to_string()))
    }

    /// Every call made so far, oldest first
    pub fn calls(&self) -> Vec<SheetCall> {
        self.book.lock().map(|b| b.calls.clone()).unwrap_or_default()
    }

    /// Make every later call whose kind name matches fail with a remote error.
    ///
    /// Kind names: `list`, `add`, `append`, `clear`, `update`, `read`.
    pub fn fail_on(&self, kind: &str) {
        if let Ok(mut book) = self.book.lock() {
            book.fail_on = Some(kind.to_string());
        }
    }

    /// Stop failing calls set up by [`MemorySheets::fail_on`]
    pub fn clear_faults(&self) {
        if let Ok(mut book) = self.book.lock() {
            book.fail_on = None;
        }
    }

    /// Current values of a worksheet, trailing empty rows trimmed
    pub fn values(&self, title: &str) -> Option<Vec<Vec<String>>> {
        let book = self.book.lock().ok()?;
        book.sheets
            .iter()
            .find(|(ws, _)| ws.title == title)
            .map(|(_, values)| trimmed(values))
    }

    fn record(&self, kind: &str, call: SheetCall) -> Result<MutexGuard<'_, MemoryBook>> {
        let mut book = self.book()?;
        book.calls.push(call);
        if book.fail_on.as_deref() == Some(kind) {
            return Err(AppError::Remote(format!("simulated {kind} failure")));
        }
        Ok(book)
    }
}

fn trimmed(values: &[Vec<String>]) -> Vec<Vec<String>> {
    let last = values
        .iter()
        .rposition(|row| row.iter().any(|c| !c.is_empty()))
        .map(|i| i + 1)
        .unwrap_or(0);
    values[..last]
        .iter()
        .map(|row| {
            let end = row
                .iter()
                .rposition(|c| !c.is_empty())
                .map(|i| i + 1)
                .unwrap_or(0);
            row[..end].to_vec()
        })
        .collect()
}

fn find_mut<'a>(
    book: &'a mut MemoryBook,
    ws: &Worksheet,
) -> Result<&'a mut Vec<Vec<String>>> {
    book.sheets
        .iter_mut()
        .find(|(sheet, _)| sheet.id == ws.id)
        .map(|(_, values)| values)
        .ok_or_else(|| AppError::Remote(format!("worksheet '{}' does not exist", ws.title)))
}

#[async_trait]
impl SheetService for MemorySheets {
    async fn worksheets(&self) -> Result<Vec<Worksheet>> {
        let book = self.record("list", SheetCall::List)?;
        Ok(book.sheets.iter().map(|(ws, _)| ws.clone()).collect())
    }

    async fn add_worksheet(&self, title: &str, rows: u32, cols: u32) -> Result<Worksheet> {
        let mut book = self.record("add", SheetCall::Add(title.to_string()))?;
        if book.sheets.iter().any(|(ws, _)| ws.title == title) {
            return Err(AppError::Remote(format!(
                "A sheet with the name \"{title}\" already exists"
            )));
        }
        book.next_id += 1;
        let ws = Worksheet {
            id: book.next_id,
            title: title.to_string(),
            rows,
            cols,
        };
        book.sheets.push((ws.clone(), Vec::new()));
        Ok(ws)
    }

    async fn append_row(
        &self,
        ws: &Worksheet,
        values: &[String],
        _input: ValueInput,
    ) -> Result<()> {
        let mut book = self.record(
            "append",
            SheetCall::Append(ws.title.clone(), values.to_vec()),
        )?;
        let sheet = find_mut(&mut book, ws)?;
        let used = trimmed(sheet).len();
        sheet.truncate(used);
        sheet.push(values.to_vec());
        Ok(())
    }

    async fn clear(&self, ws: &Worksheet) -> Result<()> {
        let mut book = self.record("clear", SheetCall::Clear(ws.title.clone()))?;
        find_mut(&mut book, ws)?.clear();
        Ok(())
    }

    async fn update(
        &self,
        ws: &Worksheet,
        start: &str,
        values: &[Vec<String>],
        _input: ValueInput,
    ) -> Result<()> {
        let (row0, col0) = parse_a1(start)?;
        let mut book = self.record(
            "update",
            SheetCall::Update(ws.title.clone(), start.to_string()),
        )?;
        let sheet = find_mut(&mut book, ws)?;
        for (r, row) in values.iter().enumerate() {
            let target_row = row0 + r;
            if sheet.len() <= target_row {
                sheet.resize(target_row + 1, Vec::new());
            }
            let target = &mut sheet[target_row];
            if target.len() < col0 + row.len() {
                target.resize(col0 + row.len(), String::new());
            }
            for (c, value) in row.iter().enumerate() {
                target[col0 + c] = value.clone();
            }
        }
        Ok(())
    }

    async fn get_all_values(&self, ws: &Worksheet) -> Result<Vec<Vec<String>>> {
        let mut book = self.record("read", SheetCall::Read(ws.title.clone()))?;
        Ok(trimmed(find_mut(&mut book, ws)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn column_letters_roll_over() {
        assert_eq!(column_to_letter(4), "D");
        assert_eq!(column_to_letter(52), "AZ");
        assert_eq!(column_to_letter(703), "AAA");
    }

    #[test]
    fn a1_parsing() {
        assert_eq!(parse_a1("A1").unwrap(), (0, 0));
        assert_eq!(parse_a1("D12").unwrap(), (11, 3));
        assert_eq!(parse_a1("AA3").unwrap(), (2, 26));
        assert!(parse_a1("A0").is_err());
        assert!(parse_a1("12").is_err());
        assert!(parse_a1("a1").is_err());
    }

    #[test]
    fn ranges_quote_titles() {
        assert_eq!(
            a1_range("mapping_2024-05-01", "A1", 3, 4).unwrap(),
            "'mapping_2024-05-01'!A1:D3"
        );
        assert_eq!(quote_title("it's"), "'it''s'");
    }

    #[tokio::test]
    async fn append_goes_after_last_used_row() {
        let sheets = MemorySheets::new();
        let ws = sheets.add_worksheet("data_x", 2000, 4).await.unwrap();
        sheets
            .append_row(&ws, &strings(&["h1", "h2"]), ValueInput::Raw)
            .await
            .unwrap();
        sheets
            .append_row(&ws, &strings(&["a", "b"]), ValueInput::UserEntered)
            .await
            .unwrap();
        assert_eq!(
            sheets.get_all_values(&ws).await.unwrap(),
            vec![strings(&["h1", "h2"]), strings(&["a", "b"])]
        );
    }

    #[tokio::test]
    async fn update_writes_block_at_offset() {
        let sheets = MemorySheets::new();
        let ws = sheets.add_worksheet("m", 10, 3).await.unwrap();
        sheets
            .update(&ws, "B2", &[strings(&["x", "y"])], ValueInput::Raw)
            .await
            .unwrap();
        assert_eq!(sheets.values("m").unwrap(), vec![vec![], strings(&["", "x", "y"])]);
        sheets.clear(&ws).await.unwrap();
        assert!(sheets.values("m").unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_titles_and_injected_faults_are_remote_errors() {
        let sheets = MemorySheets::new();
        sheets.add_worksheet("a", 1, 1).await.unwrap();
        assert!(matches!(
            sheets.add_worksheet("a", 1, 1).await,
            Err(AppError::Remote(_))
        ));

        sheets.fail_on("list");
        assert!(matches!(sheets.worksheets().await, Err(AppError::Remote(_))));
    }

    #[tokio::test]
    async fn calls_are_recorded() {
        let sheets = MemorySheets::new();
        let ws = sheets.add_worksheet("a", 1, 1).await.unwrap();
        sheets.get_all_values(&ws).await.unwrap();
        let calls = sheets.calls();
        assert_eq!(calls, vec![SheetCall::Add("a".into()), SheetCall::Read("a".into())]);
        assert!(calls[0].is_write());
        assert!(!calls[1].is_write());
    }
}
