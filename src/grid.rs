use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A single row of text cells, identified only by its position in a grid
pub type Row = Vec<String>;

/// Ordered rows of text cells as typed into the editable grid
///
/// Grids travel to and from the browser as a plain JSON array of arrays.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grid {
    pub rows: Vec<Row>,
}

impl Grid {
    pub fn new(rows: Vec<Row>) -> Self {
        Grid { rows }
    }

    /// `rows` empty rows of `cols` empty cells each
    pub fn blank(rows: usize, cols: usize) -> Self {
        Grid {
            rows: vec![vec![String::new(); cols]; rows],
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Width of the widest row
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// True when every cell of every row is blank
    pub fn is_blank(&self) -> bool {
        self.rows.iter().all(|row| is_blank_row(row))
    }

    /// Rows that carry at least one non-blank cell, in original order
    pub fn non_blank_rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().filter(|row| !is_blank_row(row))
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    /// Check that no row is wider than `width` columns.
    ///
    /// Short rows are padded with empty cells so every row ends up exactly
    /// `width` wide.
    pub fn conform(&mut self, width: usize) -> Result<()> {
        for (idx, row) in self.rows.iter_mut().enumerate() {
            if row.len() > width {
                return Err(AppError::Validation(format!(
                    "row {} has {} cells, expected at most {}",
                    idx + 1,
                    row.len(),
                    width
                )));
            }
            row.resize(width, String::new());
        }
        Ok(())
    }
}

/// A row is blank when every cell is empty or whitespace
pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}
