//! Dataset digests.
//!
//! Digests are the first 8 hex characters of a SHA-256 and must be stable
//! across processes, so every input is reduced to a canonical byte form first.

use serde_json::json;
use sha2::{Digest, Sha256};

use super::schema::Schema;
use super::source::DatasetSource;
use super::table::{Cell, Column, Table};
use super::DatasetError;

/// Rows of a table that contribute cell values to its digest.
///
/// Rows past the cap only contribute through the total row count.
pub const MAX_ROWS: usize = 10_000;

pub const DIGEST_LENGTH: usize = 8;

fn truncated_hex(hasher: Sha256) -> String {
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(DIGEST_LENGTH);
    digest
}

/// Digest of a metadata-only dataset.
///
/// Hashes the compact JSON of `{name, source, source_type, schema}` with keys
/// in sorted order; `source` is the source's own JSON string and `schema` is
/// `""` when absent.
pub fn compute_metadata_digest(
    name: &str,
    source: &DatasetSource,
    schema: Option<&Schema>,
) -> Result<String, DatasetError> {
    let config = json!({
        "name": name,
        "source": source.to_json()?,
        "source_type": source.source_type(),
        "schema": schema.map(Schema::to_dict).unwrap_or_else(|| json!("")),
    });
    let canonical = serde_json::to_string(&config)?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(truncated_hex(hasher))
}

fn is_hashable(column: &Column) -> bool {
    !column.values.iter().any(|cell| matches!(cell, Cell::Bytes(_)))
}

fn encode_cell(hasher: &mut Sha256, cell: &Cell) {
    match cell {
        Cell::Null => hasher.update([b'N']),
        Cell::Bool(v) => hasher.update([b'B', u8::from(*v)]),
        Cell::Int(v) => {
            hasher.update([b'I']);
            hasher.update(v.to_le_bytes());
        }
        Cell::Float(v) => {
            // -0.0 and 0.0 are equal values; all NaNs are one value.
            let normalized = if *v == 0.0 {
                0.0f64
            } else if v.is_nan() {
                f64::NAN
            } else {
                *v
            };
            hasher.update([b'F']);
            hasher.update(normalized.to_bits().to_le_bytes());
        }
        Cell::Str(s) => {
            hasher.update([b'S']);
            hasher.update((s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Cell::Bytes(_) => {}
    }
}

/// Digest of a table's content.
///
/// Covers the cells of the first [`MAX_ROWS`] rows of every column holding
/// only string, numeric, boolean or null values, in row order, plus the total
/// row count and all column names. Binary columns contribute their name only.
pub fn compute_tabular_digest(table: &Table) -> String {
    let hashable: Vec<&Column> = table.columns().iter().filter(|c| is_hashable(c)).collect();
    let rows = table.num_rows().min(MAX_ROWS);

    let mut hasher = Sha256::new();
    for row in 0..rows {
        for column in &hashable {
            encode_cell(&mut hasher, &column.values[row]);
        }
    }

    hasher.update((table.num_rows() as u64).to_le_bytes());
    for name in table.column_names() {
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
    }
    truncated_hex(hasher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::schema::{ColSpec, DataType};

    fn table(values: Vec<f64>) -> Table {
        let labels: Vec<Cell> = values.iter().map(|v| Cell::from(format!("l{}", v))).collect();
        Table::from_columns(vec![
            ("x", values.into_iter().map(Cell::from).collect()),
            ("label", labels),
        ])
        .unwrap()
    }

    #[test]
    fn test_metadata_digest_is_stable() {
        let source = DatasetSource::http("https://example.com/data.csv");
        let schema = Schema::new(vec![ColSpec::new("text", DataType::String)]);

        let a = compute_metadata_digest("train", &source, Some(&schema)).unwrap();
        let b = compute_metadata_digest("train", &source, Some(&schema)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DIGEST_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_metadata_digest_depends_on_every_input() {
        let source = DatasetSource::http("https://example.com/data.csv");
        let other_source = DatasetSource::http("https://example.com/other.csv");
        let schema = Schema::new(vec![ColSpec::new("text", DataType::String)]);

        let base = compute_metadata_digest("train", &source, None).unwrap();
        assert_ne!(base, compute_metadata_digest("test", &source, None).unwrap());
        assert_ne!(base, compute_metadata_digest("train", &other_source, None).unwrap());
        assert_ne!(base, compute_metadata_digest("train", &source, Some(&schema)).unwrap());
    }

    #[test]
    fn test_metadata_digest_pinned_value() {
        // Guards against accidental changes to the canonical form.
        let source = DatasetSource::http("https://example.com/data.csv");
        let canonical = r#"{"name":"train","schema":"","source":"{\"url\":\"https://example.com/data.csv\"}","source_type":"http"}"#;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let expected = truncated_hex(hasher);

        assert_eq!(compute_metadata_digest("train", &source, None).unwrap(), expected);
    }

    #[test]
    fn test_tabular_digest_changes_with_any_cell() {
        let base = compute_tabular_digest(&table(vec![1.0, 2.0, 3.0]));
        assert_eq!(base, compute_tabular_digest(&table(vec![1.0, 2.0, 3.0])));
        assert_ne!(base, compute_tabular_digest(&table(vec![1.0, 2.0, 4.0])));
        assert_ne!(base, compute_tabular_digest(&table(vec![3.0, 2.0, 1.0])));
        assert_ne!(base, compute_tabular_digest(&table(vec![1.0, 2.0])));
    }

    #[test]
    fn test_tabular_digest_converges_across_representations() {
        let by_rows = Table::from_rows(
            ["x", "flag"],
            vec![
                vec![Cell::from(-0.0), Cell::from(true)],
                vec![Cell::from(1.5), Cell::from(false)],
            ],
        )
        .unwrap();
        let by_columns = Table::from_columns(vec![
            ("x", vec![Cell::from(0.0), Cell::from(1.5)]),
            ("flag", vec![Cell::from(true), Cell::from(false)]),
        ])
        .unwrap();
        assert_eq!(compute_tabular_digest(&by_rows), compute_tabular_digest(&by_columns));
    }

    #[test]
    fn test_tabular_digest_column_names_matter() {
        let a = Table::from_columns(vec![("a", vec![Cell::from(1)])]).unwrap();
        let b = Table::from_columns(vec![("b", vec![Cell::from(1)])]).unwrap();
        assert_ne!(compute_tabular_digest(&a), compute_tabular_digest(&b));
    }

    #[test]
    fn test_tabular_digest_ignores_binary_values() {
        let a = Table::from_columns(vec![
            ("x", vec![Cell::from(1)]),
            ("blob", vec![Cell::Bytes(vec![1, 2, 3])]),
        ])
        .unwrap();
        let b = Table::from_columns(vec![
            ("x", vec![Cell::from(1)]),
            ("blob", vec![Cell::Bytes(vec![9])]),
        ])
        .unwrap();
        assert_eq!(compute_tabular_digest(&a), compute_tabular_digest(&b));
    }

    #[test]
    fn test_tabular_digest_samples_a_deterministic_prefix() {
        let size = MAX_ROWS + 50;
        let values: Vec<f64> = (0..size).map(|i| i as f64).collect();
        let base = compute_tabular_digest(&table(values.clone()));

        // A change past the cap does not alter the digest.
        let mut beyond = values.clone();
        beyond[MAX_ROWS + 10] = -1.0;
        assert_eq!(base, compute_tabular_digest(&table(beyond)));

        // A change inside the cap does.
        let mut within = values.clone();
        within[MAX_ROWS - 1] = -1.0;
        assert_ne!(base, compute_tabular_digest(&table(within)));

        // Adding rows past the cap changes the row count and therefore the digest.
        let mut longer = values;
        longer.push(0.0);
        assert_ne!(base, compute_tabular_digest(&table(longer)));
    }
}
