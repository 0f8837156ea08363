//! # sheetsync-core
//!
//! Core library for sheetsync - a Smartsheet-to-JSON sync tool.
//!
//! This library provides:
//! - Domain types for workspaces, sheet snapshots, and sync records
//! - A JSON snapshot store with bounded sync history
//! - The Smartsheet API client behind a [`DataSource`] trait
//! - Sync orchestration with per-sheet failure isolation
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use sheetsync_core::{Config, SmartsheetClient, SnapshotStore, SyncOrchestrator};
//!
//! let config = Config::load().expect("failed to load config");
//! config.validate().expect("incomplete config");
//!
//! let client = SmartsheetClient::new(&config).expect("failed to build client");
//! let store = SnapshotStore::open(config.data_dir()).expect("failed to open store");
//!
//! let orchestrator = SyncOrchestrator::new(Box::new(client), store);
//! let record = orchestrator.full_sync();
//! println!("{}: {} sheets", record.status.as_str(), record.total_sheets);
//! ```

// Re-export commonly used items at the crate root
pub use config::{Config, SecurityMode};
pub use error::{Error, Result};
pub use source::{fetch_all, DataSource, SheetFetch, SmartsheetClient};
pub use store::SnapshotStore;
pub use sync::SyncOrchestrator;
pub use types::*;

// Public modules
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod source;
pub mod store;
pub mod sync;
pub mod types;
