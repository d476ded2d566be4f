//! Metadata-only and tabular datasets.

use serde_json::{json, Map, Value};
use tracing::warn;

use super::digest::{compute_metadata_digest, compute_tabular_digest, MAX_ROWS};
use super::schema::{infer_schema, Schema};
use super::source::DatasetSource;
use super::table::Table;
use super::DatasetError;

/// Name given to datasets created without one.
pub const DEFAULT_DATASET_NAME: &str = "dataset";

/// A dataset reference that can be logged against a run.
pub trait Dataset {
    fn name(&self) -> &str;

    fn digest(&self) -> &str;

    fn source(&self) -> &DatasetSource;

    fn schema(&self) -> Option<&Schema> {
        None
    }

    fn profile(&self) -> Option<Value> {
        None
    }

    /// String-valued description: name, digest, source, source type and,
    /// when available, schema and profile as JSON strings.
    fn to_dict(&self) -> Result<Map<String, Value>, DatasetError> {
        let mut dict = Map::new();
        dict.insert("name".into(), json!(self.name()));
        dict.insert("digest".into(), json!(self.digest()));
        dict.insert("source".into(), json!(self.source().to_json()?));
        dict.insert("source_type".into(), json!(self.source().source_type()));
        if let Some(schema) = self.schema() {
            let wrapped = json!({ "qcflow_colspec": schema.to_dict() });
            dict.insert("schema".into(), json!(serde_json::to_string(&wrapped)?));
        }
        if let Some(profile) = self.profile() {
            dict.insert("profile".into(), json!(serde_json::to_string(&profile)?));
        }
        Ok(dict)
    }

    fn to_json(&self) -> Result<String, DatasetError> {
        Ok(serde_json::to_string(&self.to_dict()?)?)
    }
}

/// Dataset described only by its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaDataset {
    name: String,
    digest: String,
    source: DatasetSource,
    schema: Option<Schema>,
}

impl MetaDataset {
    pub fn new(
        source: DatasetSource,
        name: Option<String>,
        digest: Option<String>,
        schema: Option<Schema>,
    ) -> Result<Self, DatasetError> {
        let name = name.unwrap_or_else(|| DEFAULT_DATASET_NAME.to_string());
        let digest = match digest {
            Some(digest) => digest,
            None => compute_metadata_digest(&name, &source, schema.as_ref())?,
        };
        Ok(Self {
            name,
            digest,
            source,
            schema,
        })
    }
}

impl Dataset for MetaDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn digest(&self) -> &str {
        &self.digest
    }

    fn source(&self) -> &DatasetSource {
        &self.source
    }

    fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }
}

/// Dataset backed by an in-memory table.
#[derive(Debug, Clone, PartialEq)]
pub struct TabularDataset {
    table: Table,
    source: DatasetSource,
    targets: Option<String>,
    predictions: Option<String>,
    name: String,
    digest: String,
    schema: Option<Schema>,
}

impl TabularDataset {
    /// Wrap a table.
    ///
    /// `targets` and `predictions` must name existing columns. A schema that
    /// cannot be inferred is logged and left empty.
    pub fn new(
        table: Table,
        source: DatasetSource,
        targets: Option<String>,
        name: Option<String>,
        digest: Option<String>,
        predictions: Option<String>,
    ) -> Result<Self, DatasetError> {
        for (kind, column) in [("targets", &targets), ("predictions", &predictions)] {
            if let Some(column) = column {
                if table.column(column).is_none() {
                    return Err(DatasetError::MissingColumn {
                        kind,
                        column: column.clone(),
                    });
                }
            }
        }

        let schema = match infer_schema(&table, MAX_ROWS) {
            Ok(schema) => Some(schema),
            Err(e) => {
                warn!(error = %e, "Failed to infer schema for tabular dataset");
                None
            }
        };

        let digest = digest.unwrap_or_else(|| compute_tabular_digest(&table));
        Ok(Self {
            table,
            source,
            targets,
            predictions,
            name: name.unwrap_or_else(|| DEFAULT_DATASET_NAME.to_string()),
            digest,
            schema,
        })
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn targets(&self) -> Option<&str> {
        self.targets.as_deref()
    }

    pub fn predictions(&self) -> Option<&str> {
        self.predictions.as_deref()
    }
}

impl Dataset for TabularDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn digest(&self) -> &str {
        &self.digest
    }

    fn source(&self) -> &DatasetSource {
        &self.source
    }

    fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    fn profile(&self) -> Option<Value> {
        Some(json!({
            "num_rows": self.table.num_rows(),
            "num_elements": self.table.num_elements(),
        }))
    }
}
