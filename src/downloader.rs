use crate::error::{AppError, Result};
use crate::history::HistoryTable;

/// Export format offered by the history download button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            other => Err(AppError::Validation(format!("unknown export format '{other}'"))),
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

/// Convert a history table to CSV format
///
/// The header row comes first, then every data row. Fields containing
/// commas, quotes or line breaks are quoted, inner quotes doubled.
///
/// # Arguments
/// * `table` - Worksheet contents to convert
///
/// # Returns
/// * `String` - CSV content
///
/// # Examples
/// ```
/// use secure_entry::downloader::to_csv;
/// use secure_entry::history::HistoryTable;
///
/// let table = HistoryTable {
///     title: "data_2024-05-01".to_string(),
///     header: vec!["col1".to_string(), "col2".to_string()],
///     rows: vec![vec!["a,b".to_string(), "c".to_string()]],
/// };
/// assert_eq!(to_csv(&table), "col1,col2\n\"a,b\",c\n");
/// ```
pub fn to_csv(table: &HistoryTable) -> String {
    let mut csv_content = String::new();

    for row in std::iter::once(&table.header).chain(table.rows.iter()) {
        for (c, value) in row.iter().enumerate() {
            if c > 0 {
                csv_content.push(',');
            }
            // Handle value - escape commas, quotes, newlines as needed
            if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
                let escaped = value.replace('"', "\"\"");
                csv_content.push_str(&format!("\"{}\"", escaped));
            } else {
                csv_content.push_str(value);
            }
        }
        csv_content.push('\n');
    }

    csv_content
}

/// Convert a history table to XLSX format
///
/// Writes every cell as text into a single worksheet named after the
/// remote worksheet, header in the first row.
///
/// # Arguments
/// * `table` - Worksheet contents to convert
///
/// # Returns
/// * `Result<Vec<u8>>` - XLSX file content as bytes or an error
#[cfg(feature = "web")]
pub fn to_xlsx(table: &HistoryTable) -> Result<Vec<u8>> {
    use rust_xlsxwriter::{Format, Workbook, Worksheet};

    let xlsx_err = |e: rust_xlsxwriter::XlsxError| AppError::Export(format!("xlsx: {e}"));

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name(&table.title).map_err(xlsx_err)?;

    let bold = Format::new().set_bold();
    for (c, value) in table.header.iter().enumerate() {
        worksheet
            .write_string_with_format(0, c as u16, value, &bold)
            .map_err(xlsx_err)?;
    }

    for (r, row) in table.rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            worksheet
                .write_string((r + 1) as u32, c as u16, value)
                .map_err(xlsx_err)?;
        }
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer().map_err(xlsx_err)
}

/// File name offered to the browser for a download
pub fn file_name(table: &HistoryTable, format: ExportFormat) -> String {
    format!("{}.{}", table.title, format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> HistoryTable {
        HistoryTable {
            title: "data_2024-05-01".to_string(),
            header: vec!["col1".into(), "col2".into()],
            rows: vec![
                vec!["plain".into(), "say \"hi\"".into()],
                vec!["line\nbreak".into(), String::new()],
            ],
        }
    }

    #[test]
    fn csv_escapes_special_characters() {
        assert_eq!(
            to_csv(&table()),
            "col1,col2\nplain,\"say \"\"hi\"\"\"\n\"line\nbreak\",\n"
        );
    }

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!(ExportFormat::parse("CSV").unwrap(), ExportFormat::Csv);
        assert_eq!(ExportFormat::parse("xlsx").unwrap(), ExportFormat::Xlsx);
        assert!(ExportFormat::parse("pdf").is_err());
        assert_eq!(file_name(&table(), ExportFormat::Xlsx), "data_2024-05-01.xlsx");
    }

    #[cfg(feature = "web")]
    #[test]
    fn xlsx_writer_faults_are_export_errors() {
        let mut bad = table();
        bad.title = "data[2024-05-01]".to_string();
        assert!(matches!(to_xlsx(&bad), Err(AppError::Export(_))));
    }

    #[cfg(feature = "web")]
    #[test]
    fn xlsx_is_a_zip_container() {
        let bytes = to_xlsx(&table()).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }
}
