//! Dated worksheet targeting.
//!
//! Every submission lands in a worksheet named after the calendar day in
//! one fixed timezone, e.g. `data_2024-05-01`.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use lazy_static::lazy_static;
use log::info;
use regex::Regex;

use crate::error::{AppError, Result};
use crate::sheets::{SheetService, ValueInput, Worksheet};

pub const DATA_PREFIX: &str = "data_";
pub const MAPPING_PREFIX: &str = "mapping_";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

lazy_static! {
    static ref OFFSET_REGEX: Regex = Regex::new(r"^([+-])(\d{2}):(\d{2})$").unwrap();
}

/// `{prefix}{YYYY-MM-DD}`
pub fn sheet_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}{}", prefix, date.format(DATE_FORMAT))
}

/// Date encoded in a worksheet title, if it is `{prefix}{YYYY-MM-DD}`
pub fn parse_sheet_date(prefix: &str, title: &str) -> Option<NaiveDate> {
    let suffix = title.strip_prefix(prefix)?;
    NaiveDate::parse_from_str(suffix, DATE_FORMAT)
        .ok()
        .filter(|date| date.format(DATE_FORMAT).to_string() == suffix)
}

/// Calendar date of `now` in the given timezone
pub fn date_in(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// Today's calendar date in the given timezone
pub fn today(offset: FixedOffset) -> NaiveDate {
    date_in(Utc::now(), offset)
}

/// Parse a `+HH:MM` / `-HH:MM` UTC offset
pub fn parse_offset(text: &str) -> Result<FixedOffset> {
    let bad = || AppError::Config(format!("invalid timezone offset '{text}', expected +HH:MM"));
    let caps = OFFSET_REGEX.captures(text.trim()).ok_or_else(bad)?;

    let sign = &caps[1];
    let hours: i32 = caps[2].parse().map_err(|_| bad())?;
    let minutes: i32 = caps[3].parse().map_err(|_| bad())?;
    if hours > 23 || minutes > 59 {
        return Err(bad());
    }
    let seconds = (hours * 3600 + minutes * 60) * if sign == "-" { -1 } else { 1 };
    FixedOffset::east_opt(seconds).ok_or_else(bad)
}

/// Finds or lazily creates the worksheet for a purpose prefix and a day
#[derive(Debug, Clone)]
pub struct SheetLocator {
    pub prefix: String,
    /// Row capacity of newly created worksheets
    pub rows: u32,
    /// Column capacity of newly created worksheets
    pub cols: u32,
    /// Written as the first row of a freshly created worksheet
    pub header: Option<Vec<String>>,
}

impl SheetLocator {
    /// Locator for the main data worksheets; new sheets get a header row
    pub fn data(prefix: &str, rows: u32, columns: &[String]) -> Self {
        SheetLocator {
            prefix: prefix.to_string(),
            rows,
            cols: columns.len() as u32,
            header: Some(columns.to_vec()),
        }
    }

    /// Locator for mapping worksheets, which are rewritten wholesale on save
    pub fn mapping(prefix: &str, rows: u32, cols: u32) -> Self {
        SheetLocator {
            prefix: prefix.to_string(),
            rows,
            cols,
            header: None,
        }
    }

    pub fn name_for(&self, date: NaiveDate) -> String {
        sheet_name(&self.prefix, date)
    }

    /// Handle to the worksheet for `date`, creating it when absent
    ///
    /// Calling this twice for the same date returns the same worksheet.
    /// Remote faults are returned as-is; nothing is retried. A worksheet
    /// whose header append failed after creation keeps no header row, since
    /// later calls find it and skip the header.
    pub async fn locate(&self, service: &dyn SheetService, date: NaiveDate) -> Result<Worksheet> {
        let name = self.name_for(date);
        if let Some(ws) = service.worksheet(&name).await? {
            return Ok(ws);
        }

        let ws = service.add_worksheet(&name, self.rows, self.cols).await?;
        info!("created worksheet {} ({}x{})", name, self.rows, self.cols);

        if let Some(header) = &self.header {
            service.append_row(&ws, header, ValueInput::Raw).await?;
        }

        Ok(ws)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::{MemorySheets, SheetCall};
    use chrono::TimeZone;

    fn columns() -> Vec<String> {
        ["col1", "col2", "col3", "col4"].iter().map(|c| c.to_string()).collect()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn names_are_prefix_plus_iso_date() {
        assert_eq!(sheet_name(DATA_PREFIX, day(2024, 3, 7)), "data_2024-03-07");
        assert_eq!(sheet_name(MAPPING_PREFIX, day(2024, 12, 31)), "mapping_2024-12-31");
    }

    #[test]
    fn sheet_dates_parse_strictly() {
        assert_eq!(parse_sheet_date("data_", "data_2024-03-07"), Some(day(2024, 3, 7)));
        assert_eq!(parse_sheet_date("data_", "data_2024-3-7"), None);
        assert_eq!(parse_sheet_date("data_", "data_latest"), None);
        assert_eq!(parse_sheet_date("data_", "mapping_2024-03-07"), None);
        assert_eq!(parse_sheet_date("data_", "data_2024-02-30"), None);
    }

    #[test]
    fn offsets_parse() {
        assert_eq!(parse_offset("+05:30").unwrap().local_minus_utc(), 19800);
        assert_eq!(parse_offset("-03:00").unwrap().local_minus_utc(), -10800);
        assert!(parse_offset("05:30").is_err());
        assert!(parse_offset("+25:00").is_err());
    }

    #[test]
    fn date_follows_the_fixed_timezone() {
        let kolkata = parse_offset("+05:30").unwrap();
        // 20:00 UTC is already the next day in Kolkata
        let now = Utc.with_ymd_and_hms(2024, 1, 31, 20, 0, 0).unwrap();
        assert_eq!(date_in(now, kolkata), day(2024, 2, 1));
        assert_eq!(date_in(now, parse_offset("+00:00").unwrap()), day(2024, 1, 31));
    }

    #[tokio::test]
    async fn creates_sheet_with_header_once_per_day() {
        let sheets = MemorySheets::new();
        let locator = SheetLocator::data(DATA_PREFIX, 2000, &columns());

        let first = locator.locate(&sheets, day(2024, 5, 1)).await.unwrap();
        let second = locator.locate(&sheets, day(2024, 5, 1)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.title, "data_2024-05-01");
        assert_eq!((first.rows, first.cols), (2000, 4));
        assert_eq!(sheets.values("data_2024-05-01").unwrap(), vec![columns()]);

        let adds = sheets
            .calls()
            .into_iter()
            .filter(|c| matches!(c, SheetCall::Add(_)))
            .count();
        assert_eq!(adds, 1);
    }

    #[tokio::test]
    async fn mapping_sheets_get_no_header() {
        let sheets = MemorySheets::new();
        let locator = SheetLocator::mapping(MAPPING_PREFIX, 200, 6);
        let ws = locator.locate(&sheets, day(2024, 5, 1)).await.unwrap();
        assert_eq!(ws.title, "mapping_2024-05-01");
        assert!(sheets.values(&ws.title).unwrap().is_empty());
    }

    #[tokio::test]
    async fn header_lost_when_append_fails_after_create() {
        let service = MemorySheets::new();
        let locator = SheetLocator::data(DATA_PREFIX, 2000, &columns());
        service.fail_on("append");
        assert!(locator.locate(&service, day(2024, 5, 1)).await.is_err());

        service.clear_faults();
        let ws = locator.locate(&service, day(2024, 5, 1)).await.unwrap();
        assert_eq!(ws.title, "data_2024-05-01");
        assert_eq!(service.values("data_2024-05-01"), Some(vec![]));
    }

    #[tokio::test]
    async fn remote_faults_propagate() {
        let sheets = MemorySheets::new();
        sheets.fail_on("add");
        let locator = SheetLocator::data(DATA_PREFIX, 2000, &columns());
        let err = locator.locate(&sheets, day(2024, 5, 1)).await.unwrap_err();
        assert!(matches!(err, AppError::Remote(_)));
    }
}
