//! Turning an edited grid into the exact rows written to the remote sheet.

use log::{debug, info};

use crate::error::{AppError, Result};
use crate::grid::Grid;
use crate::locator::SheetLocator;
use crate::sheets::{SheetService, ValueInput, Worksheet};
use crate::template::Template;
use chrono::NaiveDate;

/// Append the non-blank rows of `grid` to `ws`, in order, one call per row
///
/// Returns how many rows were written. Rows are written as typed so the
/// sheet parses numbers and dates the same way a person typing would.
pub async fn append_rows(service: &dyn SheetService, ws: &Worksheet, grid: &Grid) -> Result<usize> {
    let mut written = 0;
    for row in grid.non_blank_rows() {
        service.append_row(ws, row, ValueInput::UserEntered).await?;
        written += 1;
    }
    Ok(written)
}

/// Submit an entry grid to today's data worksheet
///
/// A grid with nothing but blank rows never reaches the service: the
/// worksheet is not even looked up and `Ok(0)` comes back.
pub async fn submit_entry(
    service: &dyn SheetService,
    locator: &SheetLocator,
    date: NaiveDate,
    grid: &Grid,
) -> Result<usize> {
    if grid.is_blank() {
        debug!("entry grid is blank, nothing to submit");
        return Ok(0);
    }

    let ws = locator.locate(service, date).await?;
    let written = append_rows(service, &ws, grid).await?;
    info!("appended {} rows to {}", written, ws.title);
    Ok(written)
}

/// Leading rows and columns whose values always come from the template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrozenRegion {
    pub rows: usize,
    pub cols: usize,
}

impl Default for FrozenRegion {
    fn default() -> Self {
        FrozenRegion { rows: 1, cols: 2 }
    }
}

impl FrozenRegion {
    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.rows || col < self.cols
    }
}

/// Merge user edits with the template's frozen cells
///
/// The edited grid must have the template's shape. Every frozen position is
/// overwritten with the template value; edits there are discarded, not
/// rejected.
pub fn reconcile_mapping(edited: &Grid, template: &Template, frozen: FrozenRegion) -> Result<Grid> {
    let expected = template.rows.len();
    if edited.len() != expected {
        return Err(AppError::Validation(format!(
            "mapping grid has {} rows, expected {}",
            edited.len(),
            expected
        )));
    }

    let mut merged = edited.clone();
    for (r, (row, original)) in merged
        .rows
        .iter_mut()
        .zip(template.rows.rows.iter())
        .enumerate()
    {
        if row.len() != original.len() {
            return Err(AppError::Validation(format!(
                "mapping row {} has {} cells, expected {}",
                r + 1,
                row.len(),
                original.len()
            )));
        }
        for (c, (cell, value)) in row.iter_mut().zip(original).enumerate() {
            if frozen.contains(r, c) {
                cell.clone_from(value);
            }
        }
    }
    Ok(merged)
}

/// Replace the mapping worksheet's contents with header + reconciled rows
///
/// The worksheet is cleared first and rewritten from `A1`. If the rewrite
/// fails after the clear succeeded, the worksheet stays empty.
pub async fn save_mapping(
    service: &dyn SheetService,
    locator: &SheetLocator,
    date: NaiveDate,
    edited: &Grid,
    template: &Template,
    frozen: FrozenRegion,
) -> Result<Worksheet> {
    let merged = reconcile_mapping(edited, template, frozen)?;
    let ws = locator.locate(service, date).await?;

    let mut values = Vec::with_capacity(merged.len() + 1);
    values.push(template.header.clone());
    values.extend(merged.rows);

    service.clear(&ws).await?;
    service
        .update(&ws, "A1", &values, ValueInput::UserEntered)
        .await?;
    info!("rewrote {} with {} mapping rows", ws.title, values.len() - 1);
    Ok(ws)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Row;
    use crate::locator::{DATA_PREFIX, MAPPING_PREFIX};
    use crate::sheets::{MemorySheets, SheetCall};

    fn row(cells: &[&str]) -> Row {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn data_locator() -> SheetLocator {
        SheetLocator::data(DATA_PREFIX, 2000, &row(&["col1", "col2", "col3", "col4"]))
    }

    fn template() -> Template {
        Template {
            header: row(&["Specialty", "Code", "Doctor", "Room"]),
            rows: Grid::new(vec![
                row(&["Cardiology", "C1", "Dr. A", "101"]),
                row(&["Neurology", "N1", "Dr. B", "102"]),
                row(&["Oncology", "O1", "", ""]),
            ]),
        }
    }

    #[tokio::test]
    async fn blank_grid_writes_nothing() {
        let sheets = MemorySheets::new();
        let grid = Grid::new(vec![row(&["", " ", "", ""]), row(&["", "", "", ""])]);
        let written = submit_entry(&sheets, &data_locator(), day(), &grid).await.unwrap();
        assert_eq!(written, 0);
        assert!(sheets.calls().is_empty());
    }

    #[tokio::test]
    async fn only_non_blank_rows_are_appended_in_order() {
        let sheets = MemorySheets::new();
        let grid = Grid::new(vec![
            row(&["1", "", "", ""]),
            row(&["", "", "", ""]),
            row(&["", "two", "", ""]),
            row(&["  ", "", "", ""]),
            row(&["", "", "", "=3"]),
        ]);
        let written = submit_entry(&sheets, &data_locator(), day(), &grid).await.unwrap();
        assert_eq!(written, 3);
        assert_eq!(
            sheets.values("data_2024-05-01").unwrap(),
            vec![
                row(&["col1", "col2", "col3", "col4"]),
                row(&["1"]),
                row(&["", "two"]),
                row(&["", "", "", "=3"]),
            ]
        );
    }

    #[tokio::test]
    async fn append_failure_surfaces_remote_error() {
        let sheets = MemorySheets::new();
        let ws = sheets.add_worksheet("data_2024-05-01", 10, 4).await.unwrap();
        sheets.fail_on("append");
        let grid = Grid::new(vec![row(&["x", "", "", ""])]);
        let err = append_rows(&sheets, &ws, &grid).await.unwrap_err();
        assert!(err.to_string().contains("simulated append failure"));
    }

    #[test]
    fn frozen_cells_are_restored_from_template() {
        let template = template();
        let edited = Grid::new(vec![
            row(&["HACKED", "X", "Dr. Z", "999"]),
            row(&["Neuro", "N9", "Dr. Y", "202"]),
            row(&["", "", "Dr. C", "303"]),
        ]);
        let merged = reconcile_mapping(&edited, &template, FrozenRegion::default()).unwrap();
        assert_eq!(
            merged.rows,
            vec![
                row(&["Cardiology", "C1", "Dr. A", "101"]),
                row(&["Neurology", "N1", "Dr. Y", "202"]),
                row(&["Oncology", "O1", "Dr. C", "303"]),
            ]
        );
    }

    #[test]
    fn column_only_freeze_keeps_first_row_edits() {
        let frozen = FrozenRegion { rows: 0, cols: 2 };
        let edited = Grid::new(vec![
            row(&["a", "b", "Dr. Q", "1"]),
            row(&["Neurology", "N1", "Dr. B", "102"]),
            row(&["Oncology", "O1", "", ""]),
        ]);
        let merged = reconcile_mapping(&edited, &template(), frozen).unwrap();
        assert_eq!(merged.rows[0], row(&["Cardiology", "C1", "Dr. Q", "1"]));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let edited = Grid::new(vec![row(&["a", "b", "c", "d"])]);
        assert!(matches!(
            reconcile_mapping(&edited, &template(), FrozenRegion::default()),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn mapping_save_clears_and_rewrites_with_header() {
        let sheets = MemorySheets::new();
        let locator = SheetLocator::mapping(MAPPING_PREFIX, 100, 4);
        let template = template();
        let ws = locator.locate(&sheets, day()).await.unwrap();
        sheets
            .update(&ws, "A1", &vec![row(&["stale", "stale", "stale", "stale"]); 6], ValueInput::Raw)
            .await
            .unwrap();

        let mut edited = template.rows.clone();
        edited.rows[0][0] = "changed".to_string();
        edited.rows[2][3] = "404".to_string();
        save_mapping(&sheets, &locator, day(), &edited, &template, FrozenRegion::default())
            .await
            .unwrap();

        let stored = sheets.values("mapping_2024-05-01").unwrap();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[0], template.header);
        assert_eq!(stored[1], row(&["Cardiology", "C1", "Dr. A", "101"]));
        assert_eq!(stored[3], row(&["Oncology", "O1", "", "404"]));

        let calls = sheets.calls();
        let clear = calls
            .iter()
            .position(|c| matches!(c, SheetCall::Clear(_)))
            .unwrap();
        let update = calls
            .iter()
            .rposition(|c| matches!(c, SheetCall::Update(..)))
            .unwrap();
        assert!(clear < update);
    }

    #[tokio::test]
    async fn failed_rewrite_leaves_sheet_cleared() {
        let sheets = MemorySheets::new();
        let locator = SheetLocator::mapping(MAPPING_PREFIX, 100, 4);
        let template = template();
        let ws = locator.locate(&sheets, day()).await.unwrap();
        sheets
            .update(&ws, "A1", &[row(&["old"])], ValueInput::Raw)
            .await
            .unwrap();

        sheets.fail_on("update");
        let result = save_mapping(
            &sheets,
            &locator,
            day(),
            &template.rows,
            &template,
            FrozenRegion::default(),
        )
        .await;
        assert!(matches!(result, Err(AppError::Remote(_))));
        assert!(sheets.values("mapping_2024-05-01").unwrap().is_empty());
    }
}
