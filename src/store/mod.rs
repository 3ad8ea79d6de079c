//! Version store for experiment configurations.
//!
//! This module provides the domain types (experiments, versions, typed
//! parameters, content-addressed file references, metadata, results) and
//! the [`Storage`] trait implemented by the SQLite backend.

mod sqlite;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use sqlite::SqliteStorage;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Maximum size of a local file accepted for a [`FileReference`] (100 MiB).
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Root of a version lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    /// Unique experiment identifier.
    pub id: String,
    /// Human-readable experiment name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// When the experiment was created.
    pub created_at: DateTime<Utc>,
}

impl Experiment {
    /// Create a new experiment.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle status of an experiment version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// Version is still being assembled.
    #[default]
    Draft,
    /// Version is running.
    Active,
    /// Version has finished; triggers the change notification.
    Completed,
    /// Version has been archived.
    Archived,
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionStatus::Draft => write!(f, "draft"),
            VersionStatus::Active => write!(f, "active"),
            VersionStatus::Completed => write!(f, "completed"),
            VersionStatus::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for VersionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(VersionStatus::Draft),
            "active" => Ok(VersionStatus::Active),
            "completed" => Ok(VersionStatus::Completed),
            "archived" => Ok(VersionStatus::Archived),
            _ => Err(format!("Unknown version status: {}", s)),
        }
    }
}

/// Semantic type of a parameter value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    /// Short string value.
    #[default]
    String,
    /// Integer value.
    Int,
    /// Floating-point value.
    Float,
    /// Long free-form text.
    Text,
    /// Boolean value (`true`/`false`/`1`/`0`).
    Bool,
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterType::String => write!(f, "string"),
            ParameterType::Int => write!(f, "int"),
            ParameterType::Float => write!(f, "float"),
            ParameterType::Text => write!(f, "text"),
            ParameterType::Bool => write!(f, "bool"),
        }
    }
}

impl std::str::FromStr for ParameterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(ParameterType::String),
            "int" => Ok(ParameterType::Int),
            "float" => Ok(ParameterType::Float),
            "text" => Ok(ParameterType::Text),
            "bool" => Ok(ParameterType::Bool),
            _ => Err(format!("Unknown parameter type: {}", s)),
        }
    }
}

/// A typed parameter owned by a version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// Unique parameter identifier.
    pub id: String,
    /// Parameter name, unique case-insensitively within a version.
    pub name: String,
    /// Value stored as text, semantically typed by `value_type`.
    pub value: String,
    /// Semantic type of the value.
    pub value_type: ParameterType,
    /// Measurement unit (may be empty).
    pub unit: String,
}

impl Parameter {
    /// Create a new parameter, validating that the value parses under the
    /// declared type. Fails before any storage I/O.
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        value_type: ParameterType,
        unit: impl Into<String>,
    ) -> StoreResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(StoreError::InvalidInput {
                message: "Parameter name must be a non-empty string".to_string(),
            });
        }
        let value = value.into();
        validate_typed_value(&value, value_type)?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name,
            value,
            value_type,
            unit: unit.into(),
        })
    }

    /// Numeric view of the value, if it parses as a float.
    pub fn numeric_value(&self) -> Option<f64> {
        self.value.trim().parse::<f64>().ok()
    }
}

fn validate_typed_value(value: &str, value_type: ParameterType) -> StoreResult<()> {
    let ok = match value_type {
        ParameterType::String | ParameterType::Text => true,
        ParameterType::Int => value.trim().parse::<i64>().is_ok(),
        ParameterType::Float => value.trim().parse::<f64>().is_ok(),
        ParameterType::Bool => matches!(
            value.to_lowercase().as_str(),
            "true" | "false" | "1" | "0"
        ),
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidValue {
            value: value.to_string(),
            value_type: value_type.to_string(),
        })
    }
}

/// Where a referenced file came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Excel workbook.
    #[default]
    Excel,
    /// SQL database export.
    Sql,
    /// Cloud object storage.
    Cloud,
    /// Remote API endpoint.
    Api,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Excel => write!(f, "excel"),
            SourceType::Sql => write!(f, "sql"),
            SourceType::Cloud => write!(f, "cloud"),
            SourceType::Api => write!(f, "api"),
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "excel" => Ok(SourceType::Excel),
            "sql" => Ok(SourceType::Sql),
            "cloud" => Ok(SourceType::Cloud),
            "api" => Ok(SourceType::Api),
            _ => Err(format!("Unknown source type: {}", s)),
        }
    }
}

/// Role of a referenced file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Input or output dataset.
    #[default]
    Dataset,
    /// Trained model artifact.
    Model,
    /// Configuration file.
    Config,
    /// Anything else.
    Other,
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::Dataset => write!(f, "dataset"),
            FileKind::Model => write!(f, "model"),
            FileKind::Config => write!(f, "config"),
            FileKind::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dataset" => Ok(FileKind::Dataset),
            "model" => Ok(FileKind::Model),
            "config" => Ok(FileKind::Config),
            "other" => Ok(FileKind::Other),
            _ => Err(format!("Unknown file type: {}", s)),
        }
    }
}

/// A content-addressed reference to a local file or remote URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReference {
    /// Unique reference identifier.
    pub id: String,
    /// Where the file came from.
    pub source_type: SourceType,
    /// Local path or remote URL.
    pub path_or_url: String,
    /// SHA-256 over the full contents; empty for remote URLs.
    pub file_hash: String,
    /// Role of the file, if known.
    pub file_type: Option<FileKind>,
    /// Size in bytes; 0 for remote URLs.
    pub size_bytes: i64,
    /// When the reference was recorded.
    pub uploaded_at: DateTime<Utc>,
}

impl FileReference {
    /// Create a new file reference.
    ///
    /// Local paths must exist and be at most [`MAX_FILE_SIZE`] bytes; the
    /// hash is computed by streaming the whole file once. Remote URLs
    /// (`http://`, `https://`, `ftp://`) get an empty hash and zero size.
    pub fn new(
        source_type: SourceType,
        path_or_url: impl Into<String>,
        file_type: Option<FileKind>,
    ) -> StoreResult<Self> {
        let path_or_url = path_or_url.into();

        let (file_hash, size_bytes) = if is_remote(&path_or_url) {
            (String::new(), 0)
        } else {
            let path = Path::new(&path_or_url);
            let meta = std::fs::metadata(path).map_err(|_| StoreError::FileMissing {
                path: path.to_path_buf(),
            })?;
            if meta.len() > MAX_FILE_SIZE {
                return Err(StoreError::FileTooLarge {
                    path: path.to_path_buf(),
                    size_bytes: meta.len(),
                    max_bytes: MAX_FILE_SIZE,
                });
            }
            (hash_file(path)?, meta.len() as i64)
        };

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            source_type,
            path_or_url,
            file_hash,
            file_type,
            size_bytes,
            uploaded_at: Utc::now(),
        })
    }

    /// Whether the reference points at a remote URL.
    pub fn is_remote(&self) -> bool {
        is_remote(&self.path_or_url)
    }
}

fn is_remote(path_or_url: &str) -> bool {
    ["http://", "https://", "ftp://"]
        .iter()
        .any(|proto| path_or_url.starts_with(proto))
}

/// SHA-256 over a file's full contents, streamed in 8 KiB chunks.
fn hash_file(path: &Path) -> StoreResult<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(&mut out, "{:02x}", b);
    }
    Ok(out)
}

/// An append-only result attached to a version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Unique result identifier.
    pub id: String,
    /// Opaque structured payload; round-trips through storage unchanged.
    pub data: serde_json::Value,
    /// Free-text metrics summary.
    pub metrics: Option<String>,
    /// When the result was recorded.
    pub created_at: DateTime<Utc>,
}

/// One version of an experiment: a node in the lineage tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentVersion {
    /// Unique version identifier.
    pub id: String,
    /// Owning experiment.
    pub experiment_id: String,
    /// Unique, monotonically increasing number within the experiment;
    /// assigned by the store at creation time.
    pub version_number: i64,
    /// Human-readable version name.
    pub version_name: String,
    /// Free-form description.
    pub description: String,
    /// Lifecycle status.
    pub status: VersionStatus,
    /// When the version was created.
    pub created_at: DateTime<Utc>,
    /// Fork parent, forming a tree (never a cycle).
    pub parent_version_id: Option<String>,
    /// Free-form change log.
    pub change_log: String,
    /// Typed parameters; replaced wholesale on update.
    pub parameters: Vec<Parameter>,
    /// Content-addressed file references.
    pub file_references: Vec<FileReference>,
    /// Key-value metadata with upsert semantics.
    pub metadata: BTreeMap<String, String>,
    /// Append-only results.
    pub results: Vec<ResultRecord>,
}

impl ExperimentVersion {
    /// Create a new draft version for an experiment.
    pub fn new(
        experiment_id: impl Into<String>,
        version_name: impl Into<String>,
        description: impl Into<String>,
    ) -> StoreResult<Self> {
        let experiment_id = experiment_id.into();
        if experiment_id.trim().is_empty() {
            return Err(StoreError::InvalidInput {
                message: "Experiment ID is required".to_string(),
            });
        }
        let version_name = version_name.into();
        if version_name.trim().is_empty() {
            return Err(StoreError::InvalidInput {
                message: "Version name is required".to_string(),
            });
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            experiment_id,
            version_number: 0,
            version_name,
            description: description.into(),
            status: VersionStatus::Draft,
            created_at: Utc::now(),
            parent_version_id: None,
            change_log: String::new(),
            parameters: Vec::new(),
            file_references: Vec::new(),
            metadata: BTreeMap::new(),
            results: Vec::new(),
        })
    }

    /// Add a parameter, rejecting case-insensitive duplicates early.
    ///
    /// The storage layer enforces the same constraint again at insert time,
    /// so concurrent writers cannot race past this check.
    pub fn add_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        value_type: ParameterType,
        unit: impl Into<String>,
    ) -> StoreResult<()> {
        let param = Parameter::new(name, value, value_type, unit)?;
        if self
            .parameters
            .iter()
            .any(|p| p.name.eq_ignore_ascii_case(&param.name))
        {
            return Err(StoreError::DuplicateParameter {
                message: format!("Parameter '{}' already exists", param.name),
            });
        }
        self.parameters.push(param);
        Ok(())
    }

    /// Attach a file reference.
    pub fn add_file_reference(&mut self, file_ref: FileReference) {
        self.file_references.push(file_ref);
    }

    /// Set the status.
    pub fn with_status(mut self, status: VersionStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the fork parent.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_version_id = Some(parent_id.into());
        self
    }

    /// Set the change log.
    pub fn with_change_log(mut self, change_log: impl Into<String>) -> Self {
        self.change_log = change_log.into();
        self
    }
}

/// Median statistic over one parameter across an experiment's versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterStat {
    /// Parameter name.
    pub param_name: String,
    /// Median of the numerically-parsed values.
    pub median_value: f64,
}

/// Storage trait for the version store.
///
/// All operations are independently transactional; correctness under
/// concurrent writers relies on storage-level uniqueness constraints, not
/// application locking. The trait exists so tests can substitute doubles.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create a version atomically: assigns `version_number = max + 1`
    /// within the experiment, creates a placeholder experiment row if
    /// needed, and bulk-inserts parameters and file references in the same
    /// transaction. Returns the version with its assigned number.
    async fn create_version(&self, version: ExperimentVersion)
        -> StoreResult<ExperimentVersion>;

    /// Fork a version: deep-copies the parent's parameters (not file
    /// references) into `new_version`, sets the parent pointer, and
    /// delegates to `create_version`. The fork is independent afterward.
    async fn fork_version(
        &self,
        parent_id: &str,
        new_version: ExperimentVersion,
    ) -> StoreResult<ExperimentVersion>;

    /// Lightweight read: the version with its parameters only.
    async fn get_version(&self, id: &str) -> StoreResult<Option<ExperimentVersion>>;

    /// Full read: parameters plus file references, metadata, and results.
    async fn get_version_with_files(&self, id: &str)
        -> StoreResult<Option<ExperimentVersion>>;

    /// The full lineage for an experiment as a flat, version-number-ordered
    /// sequence, following parent links transitively from every root.
    async fn get_version_history(
        &self,
        experiment_id: &str,
    ) -> StoreResult<Vec<ExperimentVersion>>;

    /// Overwrite name/description/status/change_log and replace the full
    /// parameter set (delete then reinsert) in one transaction. Returns the
    /// reloaded version.
    async fn update_version(&self, version: &ExperimentVersion)
        -> StoreResult<ExperimentVersion>;

    /// Append a result to a version.
    async fn add_result(
        &self,
        version_id: &str,
        data: serde_json::Value,
        metrics: Option<&str>,
    ) -> StoreResult<()>;

    /// Upsert a metadata key for a version; last write wins.
    async fn add_metadata(&self, version_id: &str, key: &str, value: &str) -> StoreResult<()>;

    /// Attach a file reference to an existing version, re-validating local
    /// path existence first.
    async fn add_file_to_version(
        &self,
        version_id: &str,
        file_ref: &FileReference,
    ) -> StoreResult<()>;

    /// Recompute and persist the median of every numerically-valued
    /// parameter across the experiment's versions.
    async fn calculate_experiment_stats(
        &self,
        experiment_id: &str,
    ) -> StoreResult<Vec<ParameterStat>>;
}
