//! Column schemas and schema inference.

use serde::{Deserialize, Serialize};

use super::table::{Cell, Table};
use super::DatasetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Long,
    Double,
    String,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColSpec {
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub name: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ColSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            data_type,
            name: name.into(),
            required: true,
        }
    }
}

/// Ordered column specifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    pub columns: Vec<ColSpec>,
}

impl Schema {
    pub fn new(columns: Vec<ColSpec>) -> Self {
        Self { columns }
    }

    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn to_json(&self) -> Result<String, DatasetError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, DatasetError> {
        Ok(serde_json::from_str(json)?)
    }
}

fn cell_type(cell: &Cell) -> Option<DataType> {
    match cell {
        Cell::Null => None,
        Cell::Bool(_) => Some(DataType::Boolean),
        Cell::Int(_) => Some(DataType::Long),
        Cell::Float(_) => Some(DataType::Double),
        Cell::Str(_) => Some(DataType::String),
        Cell::Bytes(_) => Some(DataType::Binary),
    }
}

/// Infer a schema from at most `max_rows` rows of a table.
///
/// A column mixing value types cannot be described and is an error. Integer
/// and float values in one column widen to `double`. A column with nulls is
/// marked not required; an all-null column is an error.
pub fn infer_schema(table: &Table, max_rows: usize) -> Result<Schema, DatasetError> {
    let mut specs = Vec::with_capacity(table.num_columns());
    for column in table.columns() {
        let mut inferred: Option<DataType> = None;
        let mut has_nulls = false;
        for cell in column.values.iter().take(max_rows) {
            let Some(found) = cell_type(cell) else {
                has_nulls = true;
                continue;
            };
            inferred = match inferred {
                None => Some(found),
                Some(current) if current == found => Some(current),
                Some(DataType::Long) if found == DataType::Double => Some(DataType::Double),
                Some(DataType::Double) if found == DataType::Long => Some(DataType::Double),
                Some(current) => {
                    return Err(DatasetError::SchemaInference(format!(
                        "column {:?} mixes {:?} and {:?} values",
                        column.name, current, found
                    )))
                }
            };
        }

        let data_type = inferred.ok_or_else(|| {
            DatasetError::SchemaInference(format!(
                "column {:?} has no non-null values",
                column.name
            ))
        })?;
        specs.push(ColSpec {
            data_type,
            name: column.name.clone(),
            required: !has_nulls,
        });
    }
    Ok(Schema::new(specs))
}
