//! Change-notification pipeline.
//!
//! A [`ChangeListener`] watches the store's change-event feed on a
//! dedicated connection and pushes raw payloads onto an unbounded queue; a
//! single [`NotificationDispatcher`] drains the queue in arrival order,
//! formats each event, and forwards it to the alert sink. The feed is a
//! best-effort hint: the store itself remains the source of truth for
//! version status.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::ListenerConfig;
use crate::error::StoreResult;
use crate::notify::AlertSink;
use crate::store::SqliteStorage;

/// A structured status-change event published by the storage trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Event discriminator; always `status_change` today.
    pub event_type: String,
    /// Owning experiment.
    pub experiment_id: String,
    /// The version whose status changed.
    pub version_id: String,
    /// Status before the transition.
    pub old_status: String,
    /// Status after the transition.
    pub new_status: String,
    /// When the storage layer recorded the transition.
    pub changed_at: String,
}

impl ChangeEvent {
    /// Human-readable status-update message for the alert sink.
    pub fn format_message(&self) -> String {
        format!(
            "🔔 Status Update\nExperiment: {}\nVersion: {}\nStatus changed to: {}",
            self.experiment_id, self.version_id, self.new_status
        )
    }
}

/// Handles for the two background workers.
///
/// The workers run for the lifetime of the hosting process; the handles
/// exist so embedders and tests can await or abort them.
pub struct PipelineHandle {
    /// The listener task.
    pub listener: JoinHandle<()>,
    /// The dispatcher task.
    pub dispatcher: JoinHandle<()>,
}

/// Background worker watching the store's change-event feed.
///
/// One producer: pushes payloads in feed order onto the queue and never
/// blocks on the consumer. On connection failure it re-subscribes from the
/// current feed high-water mark; events missed in between are accepted as
/// lost.
pub struct ChangeListener {
    pool: SqlitePool,
    poll_interval: Duration,
    queue: mpsc::UnboundedSender<String>,
}

impl ChangeListener {
    /// Create a listener over the store's pool.
    pub fn new(
        storage: &SqliteStorage,
        config: &ListenerConfig,
        queue: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            pool: storage.pool().clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            queue,
        }
    }

    /// Spawn the listener onto a dedicated task.
    ///
    /// Awaits the initial subscription before returning, so every event
    /// committed after this call is observed.
    pub async fn spawn(self) -> StoreResult<JoinHandle<()>> {
        let mut conn = self.pool.acquire().await?;
        let (cursor,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(id), 0) FROM change_events")
            .fetch_one(&mut *conn)
            .await?;
        info!(cursor, "Change listener subscribed");

        Ok(tokio::spawn(async move {
            let mut cursor = cursor;
            loop {
                match self.watch(&mut conn, &mut cursor).await {
                    Ok(()) => {
                        info!("Change listener stopping: queue closed");
                        return;
                    }
                    Err(e) => {
                        error!(error = %e, "Change listener connection lost; resubscribing");
                        drop(conn);
                        // Re-subscribe: take a fresh connection and the
                        // current high-water mark. Events in between are
                        // lost by design.
                        (conn, cursor) = loop {
                            tokio::time::sleep(self.poll_interval).await;
                            match self.resubscribe().await {
                                Ok(fresh) => break fresh,
                                Err(e) => {
                                    error!(error = %e, "Resubscribe failed; retrying");
                                }
                            }
                        };
                    }
                }
            }
        }))
    }

    async fn resubscribe(
        &self,
    ) -> StoreResult<(sqlx::pool::PoolConnection<sqlx::Sqlite>, i64)> {
        let mut conn = self.pool.acquire().await?;
        let (cursor,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(id), 0) FROM change_events")
            .fetch_one(&mut *conn)
            .await?;
        info!(cursor, "Change listener resubscribed");
        Ok((conn, cursor))
    }

    /// Poll loop over one connection. Returns `Ok(())` only when the queue
    /// has been closed by the consumer side.
    async fn watch(
        &self,
        conn: &mut sqlx::pool::PoolConnection<sqlx::Sqlite>,
        cursor: &mut i64,
    ) -> StoreResult<()> {
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let rows: Vec<(i64, String)> = sqlx::query_as(
                "SELECT id, payload FROM change_events WHERE id > ? ORDER BY id ASC",
            )
            .bind(*cursor)
            .fetch_all(&mut **conn)
            .await?;

            if rows.is_empty() {
                continue;
            }

            for (id, payload) in rows {
                debug!(event_id = id, "Change event enqueued");
                if self.queue.send(payload).is_err() {
                    return Ok(());
                }
                *cursor = id;
            }

            // Consumed rows are dropped from the feed; queued items are
            // already safe in process memory.
            sqlx::query("DELETE FROM change_events WHERE id <= ?")
                .bind(*cursor)
                .execute(&mut **conn)
                .await?;
        }
    }
}

/// Single consumer draining the change-event queue in arrival order.
pub struct NotificationDispatcher {
    queue: mpsc::UnboundedReceiver<String>,
    sink: Option<Arc<dyn AlertSink>>,
    send_timeout: Duration,
}

impl NotificationDispatcher {
    /// Create a dispatcher over the shared queue.
    pub fn new(
        queue: mpsc::UnboundedReceiver<String>,
        sink: Option<Arc<dyn AlertSink>>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            sink,
            send_timeout,
        }
    }

    /// Spawn the dispatcher onto a dedicated task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        while let Some(payload) = self.queue.recv().await {
            self.process(&payload).await;
        }
        info!("Notification dispatcher stopping: queue closed");
    }

    /// Handle one event. Failures are logged and isolated to this event;
    /// the item is never re-queued (at-most-once from here on).
    async fn process(&self, payload: &str) {
        let event: ChangeEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, payload = %payload, "Discarding unparseable change event");
                return;
            }
        };

        info!(
            version_id = %event.version_id,
            old_status = %event.old_status,
            new_status = %event.new_status,
            "Processing status change"
        );

        let Some(sink) = &self.sink else {
            debug!("No alert sink configured; dropping status update");
            return;
        };

        let message = event.format_message();
        match tokio::time::timeout(self.send_timeout, sink.send_notification(&message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, version_id = %event.version_id, "Failed to deliver status notification");
            }
            Err(_) => {
                error!(
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    version_id = %event.version_id,
                    "Status notification timed out; dropping event"
                );
            }
        }
    }
}
