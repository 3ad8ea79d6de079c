//! # Experiment Store
//!
//! A versioned store for experiment configurations with branching, typed
//! parameters, content-addressed file references, and an asynchronous
//! change-notification pipeline.
//!
//! ## Features
//!
//! - **Versioning**: Sequential version numbering per experiment with
//!   fork-based branching (parameters are inherited, files are not)
//! - **Typed Parameters**: Values validated against a declared type before
//!   any storage I/O, unique case-insensitively within a version
//! - **File References**: Local files hashed with SHA-256 and size-capped;
//!   remote URLs recorded as-is
//! - **Metadata & Results**: Upserted key-value metadata and append-only
//!   JSON result payloads per version
//! - **Change Notifications**: Completed-status transitions flow through a
//!   feed table to a listener/dispatcher pair and out to an alert sink
//! - **Critical Parameters**: A rule table checked on every update, with
//!   combined alerts forwarded to the sink
//!
//! ## Architecture
//!
//! ```text
//! Caller → VersionStore → SQLite (versions, parameters, files, feed)
//!                ↓                        ↓ trigger
//!        CriticalParametersMonitor   ChangeListener → Dispatcher
//!                ↓                                        ↓
//!            AlertSink (Telegram) ←───────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use experiment_store::config::Config;
//! use experiment_store::store::{ExperimentVersion, ParameterType, SqliteStorage};
//! use experiment_store::versioning::VersionStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = Arc::new(SqliteStorage::new(&config.database).await?);
//!     let store = VersionStore::new(storage, None);
//!
//!     let mut version = ExperimentVersion::new("exp-1", "baseline", "first run")?;
//!     version.add_parameter("Temperature", "25", ParameterType::Float, "°C")?;
//!     let created = store.create_version(version).await?;
//!     println!("created version {}", created.version_number);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;
/// Error types and result aliases.
pub mod error;
/// Critical parameter rules and the monitor that evaluates them.
pub mod monitor;
/// Alert sink trait and the Telegram implementation.
pub mod notify;
/// Change-event listener and notification dispatcher.
pub mod pipeline;
/// Domain types, the `Storage` trait, and the SQLite backend.
pub mod store;
/// The high-level `VersionStore` facade.
pub mod versioning;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use versioning::VersionStore;
