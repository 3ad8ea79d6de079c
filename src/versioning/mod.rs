//! High-level version store facade.
//!
//! [`VersionStore`] ties the pieces together: every write goes through the
//! storage backend, updates additionally run the critical parameter
//! monitor, and [`VersionStore::start_pipeline`] wires the change-event
//! listener to the notification dispatcher.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::{ListenerConfig, RequestConfig};
use crate::error::StoreResult;
use crate::monitor::{Alert, CriticalParametersMonitor, CriticalRule};
use crate::notify::AlertSink;
use crate::pipeline::{ChangeListener, NotificationDispatcher, PipelineHandle};
use crate::store::{
    ExperimentVersion, FileReference, ParameterStat, SqliteStorage, Storage,
};

/// The versioned experiment-configuration store.
///
/// Cheap to clone; clones share the storage pool, the monitor, and the
/// sink.
#[derive(Clone)]
pub struct VersionStore {
    storage: Arc<SqliteStorage>,
    monitor: Arc<CriticalParametersMonitor>,
    sink: Option<Arc<dyn AlertSink>>,
}

impl VersionStore {
    /// Create a store over an initialized storage backend.
    pub fn new(storage: Arc<SqliteStorage>, sink: Option<Arc<dyn AlertSink>>) -> Self {
        let monitor = Arc::new(CriticalParametersMonitor::new(
            storage.clone() as Arc<dyn Storage>,
            sink.clone(),
        ));
        Self {
            storage,
            monitor,
            sink,
        }
    }

    /// Replace the monitor's rule table.
    pub fn with_rules(mut self, rules: Vec<CriticalRule>) -> Self {
        self.monitor = Arc::new(
            CriticalParametersMonitor::new(
                self.storage.clone() as Arc<dyn Storage>,
                self.sink.clone(),
            )
            .with_rules(rules),
        );
        self
    }

    /// The underlying storage backend.
    pub fn storage(&self) -> &Arc<SqliteStorage> {
        &self.storage
    }

    /// Create a version; the store assigns its number.
    pub async fn create_version(
        &self,
        version: ExperimentVersion,
    ) -> StoreResult<ExperimentVersion> {
        self.storage.create_version(version).await
    }

    /// Fork an existing version, inheriting its parameters.
    pub async fn fork_version(
        &self,
        parent_id: &str,
        new_version: ExperimentVersion,
    ) -> StoreResult<ExperimentVersion> {
        self.storage.fork_version(parent_id, new_version).await
    }

    /// Fetch a version with its parameters.
    pub async fn get_version(&self, id: &str) -> StoreResult<Option<ExperimentVersion>> {
        self.storage.get_version(id).await
    }

    /// Fetch a version with parameters, files, metadata, and results.
    pub async fn get_version_with_files(
        &self,
        id: &str,
    ) -> StoreResult<Option<ExperimentVersion>> {
        self.storage.get_version_with_files(id).await
    }

    /// Fetch an experiment's full lineage in version-number order.
    pub async fn get_version_history(
        &self,
        experiment_id: &str,
    ) -> StoreResult<Vec<ExperimentVersion>> {
        self.storage.get_version_history(experiment_id).await
    }

    /// Update a version and run the critical parameter check on the result.
    ///
    /// The check is a side effect of a successful update: its alerts are
    /// returned alongside the reloaded version, and a check failure is
    /// logged without failing the update.
    pub async fn update_version(
        &self,
        version: &ExperimentVersion,
    ) -> StoreResult<(ExperimentVersion, Vec<Alert>)> {
        let updated = self.storage.update_version(version).await?;

        let alerts = match self.monitor.check_version(&updated.id).await {
            Ok(alerts) => alerts,
            Err(e) => {
                error!(version_id = %updated.id, error = %e, "Critical parameter check failed");
                Vec::new()
            }
        };

        Ok((updated, alerts))
    }

    /// Run the critical parameter check without writing anything.
    pub async fn check_critical_parameters(&self, version_id: &str) -> StoreResult<Vec<Alert>> {
        self.monitor.check_version(version_id).await
    }

    /// Append a result payload to a version.
    pub async fn add_result(
        &self,
        version_id: &str,
        data: serde_json::Value,
        metrics: Option<&str>,
    ) -> StoreResult<()> {
        self.storage.add_result(version_id, data, metrics).await
    }

    /// Upsert a metadata key on a version.
    pub async fn add_metadata(
        &self,
        version_id: &str,
        key: &str,
        value: &str,
    ) -> StoreResult<()> {
        self.storage.add_metadata(version_id, key, value).await
    }

    /// Attach a file reference to an existing version.
    pub async fn add_file_to_version(
        &self,
        version_id: &str,
        file_ref: &FileReference,
    ) -> StoreResult<()> {
        self.storage.add_file_to_version(version_id, file_ref).await
    }

    /// Recompute per-parameter medians across an experiment.
    pub async fn calculate_experiment_stats(
        &self,
        experiment_id: &str,
    ) -> StoreResult<Vec<ParameterStat>> {
        self.storage.calculate_experiment_stats(experiment_id).await
    }

    /// Start the change-notification pipeline.
    ///
    /// Spawns the listener and dispatcher as background tasks and returns
    /// their handles. The listener is subscribed before this returns, so
    /// status changes committed afterwards are picked up.
    pub async fn start_pipeline(
        &self,
        listener_config: &ListenerConfig,
        request_config: &RequestConfig,
    ) -> StoreResult<PipelineHandle> {
        let (tx, rx) = mpsc::unbounded_channel();

        let listener = ChangeListener::new(&self.storage, listener_config, tx)
            .spawn()
            .await?;
        let dispatcher = NotificationDispatcher::new(
            rx,
            self.sink.clone(),
            std::time::Duration::from_millis(request_config.timeout_ms),
        )
        .spawn();

        info!(
            poll_interval_ms = listener_config.poll_interval_ms,
            "Change-notification pipeline started"
        );

        Ok(PipelineHandle {
            listener,
            dispatcher,
        })
    }
}
