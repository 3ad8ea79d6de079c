use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    ExperimentVersion, FileReference, Parameter, ParameterStat, ResultRecord, Storage,
};
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed version store
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StoreError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// Uses a uniquely-named shared-cache memory database so every pooled
    /// connection (including the listener's dedicated one) sees the same
    /// data, and pins one connection open so the database survives idle
    /// reaping.
    pub async fn new_in_memory() -> StoreResult<Self> {
        let name = Uuid::new_v4().simple().to_string();
        let database_url = format!("sqlite:file:{}?mode=memory&cache=shared", name);

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StoreError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection {
                message: format!("Failed to connect to in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries and the change listener
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn version_exists(&self, version_id: &str) -> StoreResult<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM experiment_versions WHERE id = ?")
                .bind(version_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }
}

/// Classify a sqlx error into the store's error taxonomy.
///
/// Unique violations on the parameters table become the distinct
/// "duplicate parameter" kind; other unique/check/foreign-key rejections
/// surface as constraint violations with the storage message preserved.
fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = err {
        let msg = db.message().to_string();
        if msg.contains("UNIQUE constraint failed") {
            if msg.contains("parameters") {
                return StoreError::DuplicateParameter { message: msg };
            }
            return StoreError::Constraint { message: msg };
        }
        if msg.contains("CHECK constraint failed")
            || msg.contains("FOREIGN KEY constraint failed")
        {
            return StoreError::Constraint { message: msg };
        }
    }
    StoreError::Sqlx(err)
}

fn require_id(id: &str, what: &str) -> StoreResult<()> {
    if id.trim().is_empty() {
        return Err(StoreError::InvalidInput {
            message: format!("{} is required", what),
        });
    }
    Ok(())
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_version(
        &self,
        mut version: ExperimentVersion,
    ) -> StoreResult<ExperimentVersion> {
        let mut tx = self.pool.begin().await?;

        let (next_number,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(MAX(version_number), 0) + 1
            FROM experiment_versions
            WHERE experiment_id = ?
            "#,
        )
        .bind(&version.experiment_id)
        .fetch_one(&mut *tx)
        .await?;
        version.version_number = next_number;

        // Placeholder experiment row if the caller never created one.
        sqlx::query(
            r#"
            INSERT INTO experiments (id, name, description, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&version.experiment_id)
        .bind("New experiment")
        .bind("Automatically created experiment")
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        sqlx::query(
            r#"
            INSERT INTO experiment_versions
                (id, experiment_id, version_number, version_name,
                 description, status, created_at, parent_version_id, change_log)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&version.id)
        .bind(&version.experiment_id)
        .bind(version.version_number)
        .bind(&version.version_name)
        .bind(&version.description)
        .bind(version.status.to_string())
        .bind(version.created_at.to_rfc3339())
        .bind(&version.parent_version_id)
        .bind(&version.change_log)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        for param in &version.parameters {
            sqlx::query(
                r#"
                INSERT INTO parameters (id, version_id, name, value, type, unit)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&param.id)
            .bind(&version.id)
            .bind(&param.name)
            .bind(&param.value)
            .bind(param.value_type.to_string())
            .bind(&param.unit)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }

        for file_ref in &version.file_references {
            insert_file_reference(&mut tx, &version.id, file_ref).await?;
        }

        tx.commit().await.map_err(classify)?;

        info!(
            version_id = %version.id,
            experiment_id = %version.experiment_id,
            version_number = version.version_number,
            "Version created"
        );
        Ok(version)
    }

    async fn fork_version(
        &self,
        parent_id: &str,
        mut new_version: ExperimentVersion,
    ) -> StoreResult<ExperimentVersion> {
        require_id(parent_id, "Parent version ID")?;
        if Uuid::parse_str(parent_id).is_err() {
            return Err(StoreError::InvalidId {
                id: parent_id.to_string(),
            });
        }

        let parent =
            self.get_version(parent_id)
                .await?
                .ok_or_else(|| StoreError::VersionNotFound {
                    version_id: parent_id.to_string(),
                })?;

        // Deep copy with fresh ids: mutating the fork later never touches
        // the parent's stored rows.
        new_version.parameters = parent
            .parameters
            .iter()
            .map(|p| Parameter::new(&p.name, &p.value, p.value_type, &p.unit))
            .collect::<StoreResult<Vec<_>>>()?;
        new_version.parent_version_id = Some(parent.id.clone());
        new_version.version_number = parent.version_number + 1;

        info!(parent_id = %parent.id, fork_id = %new_version.id, "Forking version");
        self.create_version(new_version).await
    }

    async fn get_version(&self, id: &str) -> StoreResult<Option<ExperimentVersion>> {
        require_id(id, "Version ID")?;

        let row: Option<VersionRow> = sqlx::query_as(
            r#"
            SELECT id, experiment_id, version_number, version_name,
                   description, status, created_at, parent_version_id, change_log
            FROM experiment_versions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            warn!(version_id = %id, "Version not found");
            return Ok(None);
        };

        let mut version: ExperimentVersion = row.into();

        let params: Vec<ParameterRow> = sqlx::query_as(
            r#"
            SELECT id, name, value, type AS value_type, unit
            FROM parameters
            WHERE version_id = ?
            ORDER BY name COLLATE NOCASE
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        version.parameters = params.into_iter().map(|r| r.into()).collect();

        Ok(Some(version))
    }

    async fn get_version_with_files(
        &self,
        id: &str,
    ) -> StoreResult<Option<ExperimentVersion>> {
        let Some(mut version) = self.get_version(id).await? else {
            return Ok(None);
        };

        let files: Vec<FileReferenceRow> = sqlx::query_as(
            r#"
            SELECT id, source_type, path_or_url, file_hash,
                   file_type, size_bytes, uploaded_at
            FROM file_references
            WHERE version_id = ?
            ORDER BY uploaded_at ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        version.file_references = files.into_iter().map(|r| r.into()).collect();

        let metadata: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM metadata WHERE version_id = ?")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;
        version.metadata = metadata.into_iter().collect::<BTreeMap<_, _>>();

        let results: Vec<ResultRow> = sqlx::query_as(
            r#"
            SELECT id, data, metrics, created_at
            FROM results
            WHERE version_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        version.results = results.into_iter().map(|r| r.into()).collect();

        Ok(Some(version))
    }

    async fn get_version_history(
        &self,
        experiment_id: &str,
    ) -> StoreResult<Vec<ExperimentVersion>> {
        require_id(experiment_id, "Experiment ID")?;

        // Walk every root of the experiment's lineage and follow parent
        // links transitively; forks that hop experiments stay reachable.
        let rows: Vec<VersionRow> = sqlx::query_as(
            r#"
            WITH RECURSIVE version_tree AS (
                SELECT * FROM experiment_versions
                WHERE experiment_id = ? AND parent_version_id IS NULL

                UNION ALL

                SELECT v.* FROM experiment_versions v
                JOIN version_tree t ON v.parent_version_id = t.id
            )
            SELECT id, experiment_id, version_number, version_name,
                   description, status, created_at, parent_version_id, change_log
            FROM version_tree
            ORDER BY version_number
            "#,
        )
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn update_version(
        &self,
        version: &ExperimentVersion,
    ) -> StoreResult<ExperimentVersion> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE experiment_versions
            SET version_name = ?, description = ?, status = ?, change_log = ?
            WHERE id = ?
            "#,
        )
        .bind(&version.version_name)
        .bind(&version.description)
        .bind(version.status.to_string())
        .bind(&version.change_log)
        .bind(&version.id)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::VersionNotFound {
                version_id: version.id.clone(),
            });
        }

        // Full parameter replacement: delete then reinsert.
        sqlx::query("DELETE FROM parameters WHERE version_id = ?")
            .bind(&version.id)
            .execute(&mut *tx)
            .await?;

        for param in &version.parameters {
            sqlx::query(
                r#"
                INSERT INTO parameters (id, version_id, name, value, type, unit)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&param.id)
            .bind(&version.id)
            .bind(&param.name)
            .bind(&param.value)
            .bind(param.value_type.to_string())
            .bind(&param.unit)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;

        info!(version_id = %version.id, status = %version.status, "Version updated");

        self.get_version(&version.id)
            .await?
            .ok_or_else(|| StoreError::VersionNotFound {
                version_id: version.id.clone(),
            })
    }

    async fn add_result(
        &self,
        version_id: &str,
        data: serde_json::Value,
        metrics: Option<&str>,
    ) -> StoreResult<()> {
        require_id(version_id, "Version ID")?;
        if data.is_null() {
            return Err(StoreError::InvalidInput {
                message: "Result data is required".to_string(),
            });
        }
        if !self.version_exists(version_id).await? {
            return Err(StoreError::VersionNotFound {
                version_id: version_id.to_string(),
            });
        }

        let payload = serde_json::to_string(&data).map_err(|e| StoreError::InvalidInput {
            message: format!("Unserializable result data: {}", e),
        })?;

        sqlx::query(
            r#"
            INSERT INTO results (id, version_id, data, metrics, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(version_id)
        .bind(&payload)
        .bind(metrics)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        info!(version_id = %version_id, "Result added");
        Ok(())
    }

    async fn add_metadata(&self, version_id: &str, key: &str, value: &str) -> StoreResult<()> {
        require_id(version_id, "Version ID")?;
        require_id(key, "Metadata key")?;
        if !self.version_exists(version_id).await? {
            return Err(StoreError::VersionNotFound {
                version_id: version_id.to_string(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO metadata (id, version_id, key, value, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (version_id, key) DO UPDATE
            SET value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(version_id)
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        info!(version_id = %version_id, key = %key, "Metadata upserted");
        Ok(())
    }

    async fn add_file_to_version(
        &self,
        version_id: &str,
        file_ref: &FileReference,
    ) -> StoreResult<()> {
        require_id(version_id, "Version ID")?;

        // Re-validate local path existence; the file may have moved since
        // the reference was constructed.
        if !file_ref.is_remote() && !std::path::Path::new(&file_ref.path_or_url).exists() {
            return Err(StoreError::FileMissing {
                path: std::path::PathBuf::from(&file_ref.path_or_url),
            });
        }
        if !self.version_exists(version_id).await? {
            return Err(StoreError::VersionNotFound {
                version_id: version_id.to_string(),
            });
        }

        let mut tx = self.pool.begin().await?;
        insert_file_reference(&mut tx, version_id, file_ref).await?;
        tx.commit().await.map_err(classify)?;

        info!(version_id = %version_id, path = %file_ref.path_or_url, "File reference added");
        Ok(())
    }

    async fn calculate_experiment_stats(
        &self,
        experiment_id: &str,
    ) -> StoreResult<Vec<ParameterStat>> {
        require_id(experiment_id, "Experiment ID")?;

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT p.name, p.value
            FROM parameters p
            JOIN experiment_versions ev ON p.version_id = ev.id
            WHERE ev.experiment_id = ?
            "#,
        )
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for (name, value) in rows {
            if let Ok(v) = value.trim().parse::<f64>() {
                grouped.entry(name).or_default().push(v);
            }
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM experiment_stats WHERE experiment_id = ?")
            .bind(experiment_id)
            .execute(&mut *tx)
            .await?;

        let mut stats = Vec::with_capacity(grouped.len());
        for (name, mut values) in grouped {
            values.sort_by(|a, b| a.total_cmp(b));
            let median = values[values.len() / 2];

            sqlx::query(
                r#"
                INSERT INTO experiment_stats (experiment_id, param_name, median_value)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(experiment_id)
            .bind(&name)
            .bind(median)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

            stats.push(ParameterStat {
                param_name: name,
                median_value: median,
            });
        }
        tx.commit().await.map_err(classify)?;

        info!(experiment_id = %experiment_id, parameters = stats.len(), "Experiment stats recalculated");
        Ok(stats)
    }
}

async fn insert_file_reference(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    version_id: &str,
    file_ref: &FileReference,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO file_references
            (id, version_id, source_type, path_or_url,
             file_hash, file_type, size_bytes, uploaded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&file_ref.id)
    .bind(version_id)
    .bind(file_ref.source_type.to_string())
    .bind(&file_ref.path_or_url)
    .bind(&file_ref.file_hash)
    .bind(file_ref.file_type.map(|t| t.to_string()))
    .bind(file_ref.size_bytes)
    .bind(file_ref.uploaded_at.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(classify)?;
    Ok(())
}

// Internal row types for SQLx mapping

#[derive(sqlx::FromRow)]
struct VersionRow {
    id: String,
    experiment_id: String,
    version_number: i64,
    version_name: String,
    description: String,
    status: String,
    created_at: String,
    parent_version_id: Option<String>,
    change_log: String,
}

impl From<VersionRow> for ExperimentVersion {
    fn from(row: VersionRow) -> Self {
        Self {
            id: row.id,
            experiment_id: row.experiment_id,
            version_number: row.version_number,
            version_name: row.version_name,
            description: row.description,
            status: row.status.parse().unwrap_or_default(),
            created_at: parse_timestamp(&row.created_at),
            parent_version_id: row.parent_version_id,
            change_log: row.change_log,
            parameters: Vec::new(),
            file_references: Vec::new(),
            metadata: BTreeMap::new(),
            results: Vec::new(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ParameterRow {
    id: String,
    name: String,
    value: String,
    value_type: String,
    unit: String,
}

impl From<ParameterRow> for Parameter {
    fn from(row: ParameterRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            value: row.value,
            value_type: row.value_type.parse().unwrap_or_default(),
            unit: row.unit,
        }
    }
}

#[derive(sqlx::FromRow)]
struct FileReferenceRow {
    id: String,
    source_type: String,
    path_or_url: String,
    file_hash: String,
    file_type: Option<String>,
    size_bytes: i64,
    uploaded_at: String,
}

impl From<FileReferenceRow> for FileReference {
    fn from(row: FileReferenceRow) -> Self {
        Self {
            id: row.id,
            source_type: row.source_type.parse().unwrap_or_default(),
            path_or_url: row.path_or_url,
            file_hash: row.file_hash,
            file_type: row.file_type.and_then(|t| t.parse().ok()),
            size_bytes: row.size_bytes,
            uploaded_at: parse_timestamp(&row.uploaded_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    id: String,
    data: String,
    metrics: Option<String>,
    created_at: String,
}

impl From<ResultRow> for ResultRecord {
    fn from(row: ResultRow) -> Self {
        Self {
            id: row.id,
            data: serde_json::from_str(&row.data).unwrap_or(serde_json::Value::Null),
            metrics: row.metrics,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
