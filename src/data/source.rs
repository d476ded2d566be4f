//! Dataset sources and the source registry.
//!
//! A source describes where a dataset came from. Every source serializes to
//! a flat JSON object of its own fields; the `source_type` travels next to it.
//! [`SourceRegistry`] maps a `source_type` back to a factory.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use reqwest::header::CONTENT_DISPOSITION;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::DatasetError;

/// Fallback file name for downloads without a usable name.
const DEFAULT_DOWNLOAD_NAME: &str = "dataset_source";

/// Tag key naming the code location a dataset was created from.
pub const SOURCE_NAME_TAG: &str = "qcflow.source.name";

/// Code location (script, notebook, job) that produced a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSource {
    pub tags: BTreeMap<String, String>,
}

/// Dataset served over HTTP(S).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSource {
    pub url: String,
}

impl HttpSource {
    /// Download the dataset into `dst_dir` and return the written file.
    ///
    /// The file name comes from the `Content-Disposition` header, then the
    /// last URL path segment.
    pub async fn load(&self, dst_dir: &Path) -> Result<PathBuf, DatasetError> {
        let download_error = |message: String| DatasetError::Download {
            url: self.url.clone(),
            message,
        };

        let response = reqwest::get(&self.url)
            .await
            .map_err(|e| download_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("server returned {}", status)));
        }

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .or_else(|| filename_from_url(&self.url))
            .unwrap_or_else(|| DEFAULT_DOWNLOAD_NAME.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        tokio::fs::create_dir_all(dst_dir).await?;
        let path = dst_dir.join(file_name);
        tokio::fs::write(&path, &bytes).await?;

        debug!(url = %self.url, path = %path.display(), bytes = bytes.len(), "Downloaded dataset");
        Ok(path)
    }
}

fn sanitize_file_name(name: &str) -> Option<String> {
    let name = name.trim().trim_matches('"');
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    if base.is_empty() || base == "." || base == ".." {
        None
    } else {
        Some(base.to_string())
    }
}

fn filename_from_disposition(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .and_then(sanitize_file_name)
}

fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    sanitize_file_name(segment)
}

/// File or directory in a Unity Catalog volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UcVolumeSource {
    pub path: String,
}

impl UcVolumeSource {
    /// Create a volume source.
    ///
    /// The path should look like `/Volumes/<catalog>/<schema>/<volume>/<file>`.
    /// Other paths are accepted with a warning since they cannot be verified.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        if !is_uc_volume_path(&path) {
            warn!(
                path = %path,
                "Cannot verify volume path; expected /Volumes/<catalog>/<schema>/<volume>/<path>"
            );
        }
        Self { path }
    }
}

fn is_uc_volume_path(path: &str) -> bool {
    let mut parts = path.split('/');
    parts.next() == Some("")
        && parts.next() == Some("Volumes")
        && parts.take(3).filter(|p| !p.is_empty()).count() == 3
}

/// Dataset on the Hugging Face Hub or a local builder directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HuggingFaceSource {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// A path, a list of paths, or a split-to-paths mapping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_files: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_remote_code: Option<bool>,
}

/// Delta table, addressed by path or by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_table_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_table_version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_table_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DatasetSource {
    Code(CodeSource),
    Http(HttpSource),
    UcVolume(UcVolumeSource),
    HuggingFace(HuggingFaceSource),
    Delta(DeltaSource),
}

impl DatasetSource {
    pub fn code(tags: BTreeMap<String, String>) -> Self {
        DatasetSource::Code(CodeSource { tags })
    }

    pub fn http(url: impl Into<String>) -> Self {
        DatasetSource::Http(HttpSource { url: url.into() })
    }

    pub fn uc_volume(path: impl Into<String>) -> Self {
        DatasetSource::UcVolume(UcVolumeSource::new(path))
    }

    pub fn source_type(&self) -> &'static str {
        match self {
            DatasetSource::Code(_) => "code",
            DatasetSource::Http(_) => "http",
            DatasetSource::UcVolume(_) => "uc_volume",
            DatasetSource::HuggingFace(_) => "hugging_face",
            DatasetSource::Delta(_) => "delta_table",
        }
    }

    /// Source-specific fields as a JSON object.
    pub fn to_dict(&self) -> Result<Value, DatasetError> {
        let value = match self {
            DatasetSource::Code(s) => serde_json::to_value(s)?,
            DatasetSource::Http(s) => serde_json::to_value(s)?,
            DatasetSource::UcVolume(s) => serde_json::to_value(s)?,
            DatasetSource::HuggingFace(s) => serde_json::to_value(s)?,
            DatasetSource::Delta(s) => serde_json::to_value(s)?,
        };
        Ok(value)
    }

    /// Compact JSON of [`DatasetSource::to_dict`], keys sorted.
    pub fn to_json(&self) -> Result<String, DatasetError> {
        Ok(serde_json::to_string(&self.to_dict()?)?)
    }

    pub fn from_dict(source_type: &str, dict: &Value) -> Result<Self, DatasetError> {
        source_registry().from_dict(source_type, dict)
    }

    pub fn from_json(source_type: &str, json: &str) -> Result<Self, DatasetError> {
        source_registry().from_json(source_type, json)
    }
}

/// Builds a source from its dictionary form.
pub type SourceFactory = fn(&Value) -> Result<DatasetSource, DatasetError>;

fn parse<T: for<'de> Deserialize<'de>>(source_type: &str, dict: &Value) -> Result<T, DatasetError> {
    serde_json::from_value(dict.clone()).map_err(|e| DatasetError::InvalidSource {
        source_type: source_type.to_string(),
        message: e.to_string(),
    })
}

fn code_factory(dict: &Value) -> Result<DatasetSource, DatasetError> {
    Ok(DatasetSource::Code(parse("code", dict)?))
}

fn http_factory(dict: &Value) -> Result<DatasetSource, DatasetError> {
    Ok(DatasetSource::Http(parse("http", dict)?))
}

fn uc_volume_factory(dict: &Value) -> Result<DatasetSource, DatasetError> {
    let source: UcVolumeSource = parse("uc_volume", dict)?;
    Ok(DatasetSource::UcVolume(UcVolumeSource::new(source.path)))
}

fn hugging_face_factory(dict: &Value) -> Result<DatasetSource, DatasetError> {
    Ok(DatasetSource::HuggingFace(parse("hugging_face", dict)?))
}

fn delta_factory(dict: &Value) -> Result<DatasetSource, DatasetError> {
    Ok(DatasetSource::Delta(parse("delta_table", dict)?))
}

/// Table of `source_type` to factory.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    factories: HashMap<String, SourceFactory>,
}

impl Default for SourceRegistry {
    /// Registry with the built-in source types.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("code", code_factory);
        registry.register("http", http_factory);
        registry.register("uc_volume", uc_volume_factory);
        registry.register("hugging_face", hugging_face_factory);
        registry.register("delta_table", delta_factory);
        registry
    }
}

impl SourceRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory, replacing any previous one for the same type.
    pub fn register(&mut self, source_type: impl Into<String>, factory: SourceFactory) {
        self.factories.insert(source_type.into(), factory);
    }

    pub fn source_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn from_dict(&self, source_type: &str, dict: &Value) -> Result<DatasetSource, DatasetError> {
        let factory = self
            .factories
            .get(source_type)
            .ok_or_else(|| DatasetError::UnknownSourceType(source_type.to_string()))?;
        factory(dict)
    }

    pub fn from_json(&self, source_type: &str, json: &str) -> Result<DatasetSource, DatasetError> {
        let dict: Value = serde_json::from_str(json)?;
        self.from_dict(source_type, &dict)
    }
}

/// Process-wide registry with the built-in source types.
pub fn source_registry() -> &'static SourceRegistry {
    static REGISTRY: OnceLock<SourceRegistry> = OnceLock::new();
    REGISTRY.get_or_init(SourceRegistry::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use serde_json::json;

    fn all_sources() -> Vec<DatasetSource> {
        let mut tags = BTreeMap::new();
        tags.insert(SOURCE_NAME_TAG.to_string(), "train.py".to_string());
        tags.insert("qcflow.source.type".to_string(), "LOCAL".to_string());

        vec![
            DatasetSource::code(tags),
            DatasetSource::http("https://example.com/data/imdb.tar.gz"),
            DatasetSource::uc_volume("/Volumes/catalog/schema/volume/file.json"),
            DatasetSource::HuggingFace(HuggingFaceSource {
                path: "rotten_tomatoes".to_string(),
                config_name: Some("default".to_string()),
                data_files: Some(json!({"train": "prompts.csv"})),
                revision: Some("c33cbf96".to_string()),
                split: Some("train".to_string()),
                trust_remote_code: Some(false),
                ..HuggingFaceSource::default()
            }),
            DatasetSource::Delta(DeltaSource {
                delta_table_name: Some("main.sales".to_string()),
                delta_table_version: Some(3),
                ..DeltaSource::default()
            }),
        ]
    }

    #[test]
    fn test_json_round_trip_for_every_source() {
        for source in all_sources() {
            let json = source.to_json().unwrap();
            let reloaded = DatasetSource::from_json(source.source_type(), &json).unwrap();
            assert_eq!(reloaded, source);
            assert_eq!(reloaded.to_json().unwrap(), json);
        }
    }

    #[test]
    fn test_code_source_dict() {
        let mut tags = BTreeMap::new();
        tags.insert("qcflow.source.type".to_string(), "NOTEBOOK".to_string());
        let source = DatasetSource::code(tags.clone());
        assert_eq!(source.source_type(), "code");
        assert_eq!(source.to_dict().unwrap(), json!({"tags": tags}));
    }

    #[test]
    fn test_hugging_face_omits_unset_fields() {
        let source = DatasetSource::HuggingFace(HuggingFaceSource {
            path: "imdb".to_string(),
            ..HuggingFaceSource::default()
        });
        assert_eq!(source.to_dict().unwrap(), json!({"path": "imdb"}));
    }

    #[test]
    fn test_unknown_source_type() {
        let err = DatasetSource::from_json("s3", "{}").unwrap_err();
        assert!(matches!(err, DatasetError::UnknownSourceType(t) if t == "s3"));
    }

    #[test]
    fn test_invalid_source_fields() {
        let err = DatasetSource::from_dict("http", &json!({"uri": "x"})).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidSource { .. }));
    }

    #[test]
    fn test_custom_registry_entry() {
        fn s3_as_http(dict: &Value) -> Result<DatasetSource, DatasetError> {
            let uri = dict["uri"].as_str().unwrap_or_default();
            Ok(DatasetSource::http(uri.replacen("s3://", "https://", 1)))
        }

        let mut registry = SourceRegistry::default();
        registry.register("s3", s3_as_http);
        let source = registry
            .from_dict("s3", &json!({"uri": "s3://bucket/key"}))
            .unwrap();
        assert_eq!(source, DatasetSource::http("https://bucket/key"));
        assert!(registry.source_types().contains(&"s3"));
    }

    #[test]
    fn test_uc_volume_path_pattern() {
        assert!(is_uc_volume_path("/Volumes/cat/schema/vol/file.json"));
        assert!(is_uc_volume_path("/Volumes/cat/schema/vol"));
        assert!(!is_uc_volume_path("/Volumes/cat/schema"));
        assert!(!is_uc_volume_path("dbfs:/tmp/file"));
        // Invalid paths are still accepted.
        assert_eq!(UcVolumeSource::new("relative/path").path, "relative/path");
    }

    #[test]
    fn test_download_file_names() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"data.csv\"").as_deref(),
            Some("data.csv")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(
            filename_from_url("https://host/a/b/train.parquet?x=1").as_deref(),
            Some("train.parquet")
        );
        assert_eq!(filename_from_url("https://host/"), None);
    }

    #[tokio::test]
    async fn test_http_source_load() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/files/iris.csv")
            .with_status(200)
            .with_body("a,b\n1,2\n")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = HttpSource {
            url: format!("{}/files/iris.csv", server.url()),
        };
        let path = source.load(dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("iris.csv"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_http_source_load_error_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = HttpSource {
            url: format!("{}/missing", server.url()),
        };
        let err = source.load(dir.path()).await.unwrap_err();
        assert!(matches!(err, DatasetError::Download { .. }));
    }
}
