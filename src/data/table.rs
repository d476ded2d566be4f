//! Minimal in-memory table used by tabular datasets.
//!
//! Tables are stored column-major regardless of how they were built, so two
//! tables with equal values compare and digest equally.

use serde::{Deserialize, Serialize};

use super::DatasetError;

/// A single table cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Opaque binary payload; excluded from content digests.
    Bytes(Vec<u8>),
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Cell::Int(v as i64)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Str(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Str(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Cell>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    num_rows: usize,
}

impl Table {
    /// Build from named columns, which must all have the same length.
    pub fn from_columns<I, S>(columns: I) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = (S, Vec<Cell>)>,
        S: Into<String>,
    {
        let columns: Vec<Column> = columns
            .into_iter()
            .map(|(name, values)| Column {
                name: name.into(),
                values,
            })
            .collect();

        let num_rows = columns.first().map_or(0, |c| c.values.len());
        if let Some(bad) = columns.iter().find(|c| c.values.len() != num_rows) {
            return Err(DatasetError::InvalidTable(format!(
                "column {:?} has {} values, expected {}",
                bad.name,
                bad.values.len(),
                num_rows
            )));
        }
        Ok(Self { columns, num_rows })
    }

    /// Build from column names and rows, which must all match the header width.
    pub fn from_rows<S: Into<String>>(
        names: impl IntoIterator<Item = S>,
        rows: impl IntoIterator<Item = Vec<Cell>>,
    ) -> Result<Self, DatasetError> {
        let mut columns: Vec<Column> = names
            .into_iter()
            .map(|name| Column {
                name: name.into(),
                values: Vec::new(),
            })
            .collect();

        let mut num_rows = 0;
        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DatasetError::InvalidTable(format!(
                    "row {} has {} cells, expected {}",
                    index,
                    row.len(),
                    columns.len()
                )));
            }
            for (column, cell) in columns.iter_mut().zip(row) {
                column.values.push(cell);
            }
            num_rows += 1;
        }
        Ok(Self { columns, num_rows })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_elements(&self) -> usize {
        self.num_rows * self.columns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_and_column_builds_are_equal() {
        let by_rows = Table::from_rows(
            ["a", "b"],
            vec![
                vec![Cell::from(1), Cell::from("x")],
                vec![Cell::from(2), Cell::from("y")],
            ],
        )
        .unwrap();
        let by_columns = Table::from_columns(vec![
            ("a", vec![Cell::from(1), Cell::from(2)]),
            ("b", vec![Cell::from("x"), Cell::from("y")]),
        ])
        .unwrap();

        assert_eq!(by_rows, by_columns);
        assert_eq!(by_rows.num_rows(), 2);
        assert_eq!(by_rows.num_elements(), 4);
    }

    #[test]
    fn test_ragged_input_is_rejected() {
        let err = Table::from_columns(vec![
            ("a", vec![Cell::from(1)]),
            ("b", vec![Cell::from(1), Cell::from(2)]),
        ])
        .unwrap_err();
        assert!(matches!(err, DatasetError::InvalidTable(_)));

        let err = Table::from_rows(["a", "b"], vec![vec![Cell::from(1)]]).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidTable(_)));
    }
}
