//! Run metadata entities and the `log-batch` wire format.
//!
//! Field names match the JSON accepted by the tracking server's
//! `runs/log-batch` endpoint.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Maximum metrics in a single `log-batch` request.
pub const MAX_METRICS_PER_BATCH: usize = 1000;

/// Maximum params in a single `log-batch` request.
pub const MAX_PARAMS_PER_BATCH: usize = 100;

/// Maximum tags in a single `log-batch` request.
pub const MAX_TAGS_PER_BATCH: usize = 100;

/// Maximum entities of any kind in a single `log-batch` request.
pub const MAX_ENTITIES_PER_BATCH: usize = 1000;

pub const MAX_ENTITY_KEY_LENGTH: usize = 250;
pub const MAX_PARAM_VAL_LENGTH: usize = 6000;
pub const MAX_TAG_VAL_LENGTH: usize = 8000;

/// Rejected log item.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{kind} key must not be empty")]
    EmptyKey { kind: &'static str },

    #[error("{kind} key {key:?} has {length} characters, the limit is {limit}")]
    KeyTooLong {
        kind: &'static str,
        key: String,
        length: usize,
        limit: usize,
    },

    #[error(
        "{kind} key {key:?} may only contain alphanumerics, underscores, dashes, periods, spaces and slashes"
    )]
    InvalidKey { kind: &'static str, key: String },

    #[error("{kind} {key:?} value has {length} characters, the limit is {limit}")]
    ValueTooLong {
        kind: &'static str,
        key: String,
        length: usize,
        limit: usize,
    },
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A single metric observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub key: String,

    pub value: f64,

    /// Milliseconds since the Unix epoch
    #[serde(default = "now_millis")]
    pub timestamp: i64,

    #[serde(default)]
    pub step: i64,
}

impl Metric {
    /// Create a metric at step 0, timestamped now.
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp: now_millis(),
            step: 0,
        }
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = step;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// An immutable run parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub key: String,
    pub value: String,
}

impl Param {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A mutable run tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTag {
    pub key: String,
    pub value: String,
}

impl RunTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One write against a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogItem {
    Metric(Metric),
    Param(Param),
    Tag(RunTag),
}

impl LogItem {
    pub fn key(&self) -> &str {
        match self {
            LogItem::Metric(m) => &m.key,
            LogItem::Param(p) => &p.key,
            LogItem::Tag(t) => &t.key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LogItem::Metric(_) => "metric",
            LogItem::Param(_) => "param",
            LogItem::Tag(_) => "tag",
        }
    }

    /// Check key and value limits.
    ///
    /// Over-long param and tag values are cut to the limit (with a warning)
    /// when `truncate` is set and rejected otherwise. Keys are never truncated.
    pub fn validate(self, truncate: bool) -> Result<Self, ValidationError> {
        let kind = self.kind();
        validate_key(kind, self.key())?;

        match self {
            LogItem::Metric(metric) => Ok(LogItem::Metric(metric)),
            LogItem::Param(mut param) => {
                param.value = limit_value(kind, &param.key, param.value, MAX_PARAM_VAL_LENGTH, truncate)?;
                Ok(LogItem::Param(param))
            }
            LogItem::Tag(mut tag) => {
                tag.value = limit_value(kind, &tag.key, tag.value, MAX_TAG_VAL_LENGTH, truncate)?;
                Ok(LogItem::Tag(tag))
            }
        }
    }
}

impl From<Metric> for LogItem {
    fn from(metric: Metric) -> Self {
        LogItem::Metric(metric)
    }
}

impl From<Param> for LogItem {
    fn from(param: Param) -> Self {
        LogItem::Param(param)
    }
}

impl From<RunTag> for LogItem {
    fn from(tag: RunTag) -> Self {
        LogItem::Tag(tag)
    }
}

fn validate_key(kind: &'static str, key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey { kind });
    }

    let length = key.chars().count();
    if length > MAX_ENTITY_KEY_LENGTH {
        return Err(ValidationError::KeyTooLong {
            kind,
            key: key.to_string(),
            length,
            limit: MAX_ENTITY_KEY_LENGTH,
        });
    }

    let valid = key
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ' | '/'));
    if !valid {
        return Err(ValidationError::InvalidKey {
            kind,
            key: key.to_string(),
        });
    }
    Ok(())
}

fn limit_value(
    kind: &'static str,
    key: &str,
    value: String,
    limit: usize,
    truncate: bool,
) -> Result<String, ValidationError> {
    let length = value.chars().count();
    if length <= limit {
        return Ok(value);
    }
    if !truncate {
        return Err(ValidationError::ValueTooLong {
            kind,
            key: key.to_string(),
            length,
            limit,
        });
    }
    warn!(
        kind = kind,
        key = %key,
        length = length,
        limit = limit,
        "Truncating value to the maximum allowed length"
    );
    Ok(value.chars().take(limit).collect())
}

/// Body of a `runs/log-batch` request (minus the run id).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogBatch {
    #[serde(default)]
    pub metrics: Vec<Metric>,

    #[serde(default)]
    pub params: Vec<Param>,

    #[serde(default)]
    pub tags: Vec<RunTag>,
}

impl LogBatch {
    /// Build a batch from items, preserving their relative order per kind.
    pub fn from_items(items: impl IntoIterator<Item = LogItem>) -> Self {
        let mut batch = Self::default();
        for item in items {
            batch.push(item);
        }
        batch
    }

    pub fn push(&mut self, item: LogItem) {
        match item {
            LogItem::Metric(m) => self.metrics.push(m),
            LogItem::Param(p) => self.params.push(p),
            LogItem::Tag(t) => self.tags.push(t),
        }
    }

    /// Get the number of entities in the batch.
    pub fn len(&self) -> usize {
        self.metrics.len() + self.params.len() + self.tags.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split into request-sized batches.
    ///
    /// Each chunk respects the per-kind and total entity limits, and the order
    /// of entities of the same kind is preserved across chunks.
    pub fn into_chunks(self) -> Vec<LogBatch> {
        if self.params.len() <= MAX_PARAMS_PER_BATCH
            && self.tags.len() <= MAX_TAGS_PER_BATCH
            && self.metrics.len() <= MAX_METRICS_PER_BATCH
            && self.len() <= MAX_ENTITIES_PER_BATCH
        {
            return vec![self];
        }

        let mut params = self.params.into_iter().peekable();
        let mut tags = self.tags.into_iter().peekable();
        let mut metrics = self.metrics.into_iter().peekable();
        let mut chunks = Vec::new();

        loop {
            let mut chunk = LogBatch::default();
            while chunk.params.len() < MAX_PARAMS_PER_BATCH && chunk.len() < MAX_ENTITIES_PER_BATCH {
                match params.next() {
                    Some(p) => chunk.params.push(p),
                    None => break,
                }
            }
            while chunk.tags.len() < MAX_TAGS_PER_BATCH && chunk.len() < MAX_ENTITIES_PER_BATCH {
                match tags.next() {
                    Some(t) => chunk.tags.push(t),
                    None => break,
                }
            }
            while chunk.metrics.len() < MAX_METRICS_PER_BATCH && chunk.len() < MAX_ENTITIES_PER_BATCH {
                match metrics.next() {
                    Some(m) => chunk.metrics.push(m),
                    None => break,
                }
            }

            if chunk.is_empty() {
                break;
            }
            chunks.push(chunk);

            if params.peek().is_none() && tags.peek().is_none() && metrics.peek().is_none() {
                break;
            }
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_item_serialization() {
        let item = LogItem::Metric(Metric::new("loss", 0.5).with_step(3).with_timestamp(10));
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "metric");
        assert_eq!(json["key"], "loss");
        assert_eq!(json["step"], 3);
        assert_eq!(json["timestamp"], 10);

        let parsed: LogItem =
            serde_json::from_str(r#"{"type": "param", "key": "lr", "value": "0.01"}"#).unwrap();
        assert_eq!(parsed, LogItem::Param(Param::new("lr", "0.01")));
    }

    #[test]
    fn test_metric_defaults() {
        let before = Utc::now().timestamp_millis();
        let metric = Metric::new("acc", 0.9);
        assert_eq!(metric.step, 0);
        assert!(metric.timestamp >= before);
    }

    #[test]
    fn test_validate_rejects_bad_keys() {
        let err = LogItem::Param(Param::new("", "x")).validate(true).unwrap_err();
        assert_eq!(err, ValidationError::EmptyKey { kind: "param" });

        let err = LogItem::Tag(RunTag::new("a:b", "x")).validate(true).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidKey { .. }));

        let long_key = "k".repeat(MAX_ENTITY_KEY_LENGTH + 1);
        let err = LogItem::Metric(Metric::new(long_key, 1.0)).validate(true).unwrap_err();
        assert!(matches!(err, ValidationError::KeyTooLong { .. }));

        assert!(LogItem::Metric(Metric::new("eval/loss 1.0-b_x", 1.0)).validate(false).is_ok());
    }

    #[test]
    fn test_validate_truncates_long_values() {
        let value = "v".repeat(MAX_PARAM_VAL_LENGTH + 10);
        match LogItem::Param(Param::new("p", value)).validate(true).unwrap() {
            LogItem::Param(p) => assert_eq!(p.value.len(), MAX_PARAM_VAL_LENGTH),
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_long_values_without_truncation() {
        let value = "v".repeat(MAX_TAG_VAL_LENGTH + 1);
        let err = LogItem::Tag(RunTag::new("t", value)).validate(false).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::ValueTooLong { kind: "tag", limit: MAX_TAG_VAL_LENGTH, .. }
        ));
    }

    #[test]
    fn test_small_batch_is_one_chunk() {
        let batch = LogBatch::from_items(vec![
            Metric::new("m", 1.0).into(),
            Param::new("p", "1").into(),
            RunTag::new("t", "1").into(),
        ]);
        let chunks = batch.clone().into_chunks();
        assert_eq!(chunks, vec![batch]);
    }

    #[test]
    fn test_chunks_respect_limits_and_order() {
        let mut batch = LogBatch::default();
        for i in 0..250 {
            batch.push(Param::new(format!("p{}", i), "v").into());
        }
        for i in 0..2500 {
            batch.push(Metric::new("loss", i as f64).with_step(i).into());
        }

        let chunks = batch.into_chunks();
        for chunk in &chunks {
            assert!(chunk.params.len() <= MAX_PARAMS_PER_BATCH);
            assert!(chunk.metrics.len() <= MAX_METRICS_PER_BATCH);
            assert!(chunk.len() <= MAX_ENTITIES_PER_BATCH);
        }

        let params: Vec<String> = chunks.iter().flat_map(|c| c.params.iter().map(|p| p.key.clone())).collect();
        assert_eq!(params.len(), 250);
        assert_eq!(params[0], "p0");
        assert_eq!(params[249], "p249");

        let steps: Vec<i64> = chunks.iter().flat_map(|c| c.metrics.iter().map(|m| m.step)).collect();
        assert_eq!(steps, (0..2500).collect::<Vec<_>>());
    }
}
