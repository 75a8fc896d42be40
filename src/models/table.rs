use serde_json::Value;

use crate::error::SyncError;

/// A single cell. Sheets and Airtable both speak JSON scalars.
pub type Cell = Value;

/// The explicit empty cell used wherever a store omits a value.
pub fn empty_cell() -> Cell {
    Value::String(String::new())
}

/// Returns true for cells that carry no value.
pub fn is_empty_cell(cell: &Cell) -> bool {
    match cell {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Renders a cell as plain text, used for header names and record ids.
pub fn cell_text(cell: &Cell) -> String {
    match cell {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A header row plus data rows, every row as long as the header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    header: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Builds a table, rejecting rows whose length differs from the header.
    pub fn new(header: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self, SyncError> {
        for (index, row) in rows.iter().enumerate() {
            if row.len() != header.len() {
                return Err(SyncError::MalformedTable {
                    row: index + 1,
                    expected: header.len(),
                    found: row.len(),
                });
            }
        }
        Ok(Self { header, rows })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a table from a row-major grid whose first row is the header.
    pub fn from_grid(grid: Vec<Vec<Cell>>) -> Result<Self, SyncError> {
        let mut rows = grid.into_iter();
        let header = match rows.next() {
            Some(header) => header.iter().map(cell_text).collect(),
            None => return Ok(Self::empty()),
        };
        Self::new(header, rows.collect())
    }

    /// Like [`Table::from_grid`], but pads short rows with empty cells.
    ///
    /// Sheets trims trailing blanks from every row it returns. Rows longer
    /// than the header are still rejected.
    pub fn from_grid_padded(grid: Vec<Vec<Cell>>) -> Result<Self, SyncError> {
        let width = grid.first().map(Vec::len).unwrap_or(0);
        let padded = grid
            .into_iter()
            .map(|mut row| {
                if row.len() < width {
                    row.resize(width, empty_cell());
                }
                row
            })
            .collect();
        Self::from_grid(padded)
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.rows.is_empty()
    }

    /// Row-major grid including the header row.
    pub fn to_grid(&self) -> Vec<Vec<Cell>> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut grid = Vec::with_capacity(self.rows.len() + 1);
        grid.push(
            self.header
                .iter()
                .map(|h| Value::String(h.clone()))
                .collect(),
        );
        grid.extend(self.rows.iter().cloned());
        grid
    }
}
