//! Dataset lineage: sources, schemas, tables and digests.

pub mod dataset;
pub mod digest;
pub mod schema;
pub mod source;
pub mod table;

use thiserror::Error;

pub use dataset::{Dataset, MetaDataset, TabularDataset, DEFAULT_DATASET_NAME};
pub use digest::{compute_metadata_digest, compute_tabular_digest, MAX_ROWS};
pub use schema::{infer_schema, ColSpec, DataType, Schema};
pub use source::{source_registry, DatasetSource, SourceRegistry};
pub use table::{Cell, Table};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Unrecognized dataset source type: {0}")]
    UnknownSourceType(String),

    #[error("Invalid {source_type} dataset source: {message}")]
    InvalidSource {
        source_type: String,
        message: String,
    },

    #[error("The table does not contain the specified {kind} column {column:?}")]
    MissingColumn { kind: &'static str, column: String },

    #[error("Invalid table: {0}")]
    InvalidTable(String),

    #[error("Failed to infer schema: {0}")]
    SchemaInference(String),

    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
