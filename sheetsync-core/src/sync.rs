//! Sync orchestration
//!
//! Drives a [`DataSource`] into a [`SnapshotStore`] and accounts for every
//! sheet in a [`SyncRecord`].
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌───────────────┐
//! │ DataSource  │ ──► │ SyncOrchestrator │ ──► │ SnapshotStore │
//! │ (Smartsheet)│     │   SyncRecord     │     │ (JSON files)  │
//! └─────────────┘     └──────────────────┘     └───────────────┘
//! ```
//!
//! A record starts `Running` and always ends `Completed` or `Failed` before
//! it is appended to history. Per-sheet failures never fail the sync; only
//! errors outside the per-sheet loop (workspace info, sheet listing,
//! workspace metadata save) do.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let orchestrator = SyncOrchestrator::new(Box::new(client), store);
//! let record = orchestrator.full_sync();
//! println!("{} of {} sheets synced", record.successful_sheets, record.total_sheets);
//! ```

use crate::error::Result;
use crate::source::{fetch_all, DataSource, SheetFetch};
use crate::store::SnapshotStore;
use crate::types::{
    CleanupReport, SheetId, StatusReport, SyncRecord, SyncStatus, SyncType, ValidationReport,
};
use std::time::Instant;

/// Coordinates fetches, persistence and history for one data directory.
pub struct SyncOrchestrator {
    source: Box<dyn DataSource>,
    store: SnapshotStore,
}

impl SyncOrchestrator {
    pub fn new(source: Box<dyn DataSource>, store: SnapshotStore) -> Self {
        Self { source, store }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Sync every sheet in the workspace.
    pub fn full_sync(&self) -> SyncRecord {
        self.full_sync_with_progress(|_, _, _| {})
    }

    /// Sync every sheet in the workspace with a progress callback.
    ///
    /// The callback receives `(current_index, total_sheets, sheet_name)`
    /// before each sheet is fetched.
    pub fn full_sync_with_progress<F>(&self, mut on_progress: F) -> SyncRecord
    where
        F: FnMut(usize, usize, &str),
    {
        let started = Instant::now();
        let mut record = SyncRecord::start(SyncType::Full);
        tracing::info!("Starting full workspace sync");

        match self.run_full_sync(&mut record, &mut on_progress) {
            Ok(()) => {
                record.finish(SyncStatus::Completed, started.elapsed());
                tracing::info!(
                    successful = record.successful_sheets,
                    failed = record.failed_sheets,
                    duration_seconds = record.duration_seconds,
                    "Full sync completed"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Full sync failed");
                record.errors.push(format!("Full sync failed: {}", e));
                record.finish(SyncStatus::Failed, started.elapsed());
            }
        }

        self.append_history(&mut record);
        record
    }

    fn run_full_sync<F>(&self, record: &mut SyncRecord, on_progress: &mut F) -> Result<()>
    where
        F: FnMut(usize, usize, &str),
    {
        let workspace = self.source.get_workspace_info()?;
        record.workspace_id = Some(workspace.id);
        self.store.save_workspace_metadata(&workspace)?;

        let mut fetches = fetch_all(self.source.as_ref())?;
        let total = fetches.total();
        let mut index = 0;

        while let Some(upcoming) = fetches.upcoming() {
            on_progress(index, total, &upcoming.name);
            index += 1;

            let Some(fetch) = fetches.next() else {
                break;
            };

            match fetch {
                SheetFetch::Fetched { info, snapshot } => {
                    match self.store.save_sheet_data(info.id, &snapshot) {
                        Ok(()) => {
                            tracing::info!(sheet_id = info.id, sheet_name = %info.name, "Synced sheet");
                            record.record_success(
                                info.id,
                                info.name,
                                snapshot.metadata.total_row_count,
                            );
                        }
                        Err(e) => {
                            let message = format!(
                                "Failed to save sheet {} (ID: {}): {}",
                                info.name, info.id, e
                            );
                            tracing::error!(sheet_id = info.id, error = %e, "Failed to save sheet");
                            record.record_failure(info.id, Some(info.name), message);
                        }
                    }
                }
                SheetFetch::Failed { info, reason } => {
                    let message = format!(
                        "Failed to fetch sheet {} (ID: {}): {}",
                        info.name, info.id, reason
                    );
                    record.record_failure(info.id, Some(info.name), message);
                }
            }
        }

        Ok(())
    }

    /// Sync only the given sheets.
    pub fn sync_specific_sheets(&self, sheet_ids: &[SheetId]) -> SyncRecord {
        self.sync_specific_sheets_with_progress(sheet_ids, |_, _, _| {})
    }

    /// Sync only the given sheets with a progress callback.
    ///
    /// Names are not known before the fetch, so the callback receives a
    /// `sheet <id>` label.
    pub fn sync_specific_sheets_with_progress<F>(
        &self,
        sheet_ids: &[SheetId],
        mut on_progress: F,
    ) -> SyncRecord
    where
        F: FnMut(usize, usize, &str),
    {
        let started = Instant::now();
        let mut record = SyncRecord::start(SyncType::Selective);
        record.requested_sheets = Some(sheet_ids.to_vec());
        tracing::info!(?sheet_ids, "Starting selective sync");

        let total = sheet_ids.len();
        for (index, &sheet_id) in sheet_ids.iter().enumerate() {
            on_progress(index, total, &format!("sheet {}", sheet_id));

            let synced = self.source.get_sheet(sheet_id).and_then(|snapshot| {
                self.store.save_sheet_data(sheet_id, &snapshot)?;
                Ok(snapshot)
            });

            match synced {
                Ok(snapshot) => {
                    tracing::info!(sheet_id, "Synced sheet");
                    record.record_success(
                        sheet_id,
                        snapshot.metadata.name,
                        snapshot.metadata.total_row_count,
                    );
                }
                Err(e) => {
                    tracing::error!(sheet_id, error = %e, "Failed to sync sheet");
                    record.record_failure(
                        sheet_id,
                        None,
                        format!("Failed to sync sheet {}: {}", sheet_id, e),
                    );
                }
            }
        }

        record.finish(SyncStatus::Completed, started.elapsed());
        tracing::info!(
            successful = record.successful_sheets,
            failed = record.failed_sheets,
            "Selective sync completed"
        );

        self.append_history(&mut record);
        record
    }

    /// A failed append is reported on the record but does not change its status.
    fn append_history(&self, record: &mut SyncRecord) {
        if let Err(e) = self.store.save_sync_history(record) {
            tracing::error!(error = %e, "Failed to append sync record to history");
            record
                .errors
                .push(format!("Failed to save sync history: {}", e));
        }
    }

    /// Local state only; never contacts the remote service.
    pub fn get_status(&self) -> StatusReport {
        let history = self.store.load_sync_history();

        StatusReport {
            workspace: self.store.load_workspace_metadata(),
            sheets_summary: self.store.get_sheet_summary(),
            last_sync: history.as_ref().and_then(|h| h.last().cloned()),
            total_syncs: history.map_or(0, |h| h.len()),
        }
    }

    pub fn validate_connection(&self) -> ValidationReport {
        tracing::info!("Validating connection");

        match self.source.get_workspace_info() {
            Ok(workspace) => ValidationReport::Success {
                workspace_name: workspace.name,
                workspace_id: workspace.id,
                sheet_count: workspace.sheet_count,
            },
            Err(e) => {
                let error = format!("Connection validation failed: {}", e);
                tracing::error!(error = %e, "Connection validation failed");
                ValidationReport::Failed { error }
            }
        }
    }

    pub fn cleanup_old_data(&self, keep_latest: usize) -> CleanupReport {
        tracing::info!(keep_latest, "Cleaning up old data");

        match self.store.cleanup_old_files(keep_latest) {
            Ok(removed_files) => CleanupReport::Success {
                message: format!("Cleanup completed, kept latest {} files", keep_latest),
                removed_files,
            },
            Err(e) => {
                tracing::error!(error = %e, "Cleanup failed");
                CleanupReport::Failed {
                    error: format!("Cleanup failed: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::{SheetInfo, SheetMetadata, SheetOutcome, SheetSnapshot, WorkspaceInfo};
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    struct FakeSource {
        sheets: Vec<(SheetId, &'static str, u64)>,
        failing: Vec<SheetId>,
    }

    impl FakeSource {
        fn new(sheets: Vec<(SheetId, &'static str, u64)>) -> Self {
            Self {
                sheets,
                failing: Vec::new(),
            }
        }
    }

    impl DataSource for FakeSource {
        fn get_workspace_info(&self) -> Result<WorkspaceInfo> {
            Ok(WorkspaceInfo {
                id: 77,
                name: "Finance".to_string(),
                permalink: None,
                sheet_count: self.sheets.len(),
                last_fetched: Utc::now(),
            })
        }

        fn list_sheets(&self) -> Result<Vec<SheetInfo>> {
            Ok(self
                .sheets
                .iter()
                .map(|(id, name, _)| SheetInfo {
                    id: *id,
                    name: name.to_string(),
                    permalink: None,
                    created_at: None,
                    modified_at: None,
                    access_level: None,
                })
                .collect())
        }

        fn get_sheet(&self, sheet_id: SheetId) -> Result<SheetSnapshot> {
            if self.failing.contains(&sheet_id) {
                return Err(Error::Api {
                    status: 500,
                    message: "internal error".to_string(),
                });
            }
            let (id, name, rows) = self
                .sheets
                .iter()
                .find(|(id, _, _)| *id == sheet_id)
                .copied()
                .ok_or(Error::SheetNotFound(sheet_id))?;
            Ok(SheetSnapshot {
                metadata: SheetMetadata {
                    id,
                    name: name.to_string(),
                    permalink: None,
                    version: Some(1),
                    total_row_count: rows,
                    created_at: None,
                    modified_at: None,
                    last_sync: Some(Utc::now()),
                },
                columns: vec![],
                rows: vec![],
            })
        }
    }

    fn orchestrator(source: FakeSource) -> (TempDir, SyncOrchestrator) {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        (dir, SyncOrchestrator::new(Box::new(source), store))
    }

    #[test]
    fn test_full_sync_records_workspace_and_row_counts() {
        let (_dir, orch) = orchestrator(FakeSource::new(vec![(1, "A", 3), (2, "B", 0)]));

        let record = orch.full_sync();

        assert_eq!(record.status, SyncStatus::Completed);
        assert_eq!(record.workspace_id, Some(77));
        assert_eq!(record.total_sheets, 2);
        assert_eq!(
            record.sheet_results[0],
            SheetOutcome::Success {
                sheet_id: 1,
                sheet_name: "A".to_string(),
                row_count: 3
            }
        );
        assert_eq!(orch.store().load_workspace_metadata().unwrap().name, "Finance");
    }

    #[test]
    fn test_progress_called_before_each_sheet() {
        let (_dir, orch) = orchestrator(FakeSource::new(vec![(1, "A", 0), (2, "B", 0)]));
        let mut seen = Vec::new();

        orch.full_sync_with_progress(|index, total, name| {
            seen.push((index, total, name.to_string()));
        });

        assert_eq!(
            seen,
            vec![(0, 2, "A".to_string()), (1, 2, "B".to_string())]
        );
    }

    #[test]
    fn test_save_failure_is_isolated_per_sheet() {
        let (_dir, orch) = orchestrator(FakeSource::new(vec![(1, "A", 0), (2, "B", 0)]));
        fs::remove_dir_all(orch.store().sheets_dir()).unwrap();

        let record = orch.full_sync();

        assert_eq!(record.status, SyncStatus::Completed);
        assert_eq!(record.failed_sheets, 2);
        assert!(record.errors[0].starts_with("Failed to save sheet A (ID: 1):"));
        assert_eq!(record.sheet_results[1].sheet_name(), Some("B"));
    }

    #[test]
    fn test_selective_sync_uses_snapshot_names() {
        let mut source = FakeSource::new(vec![(5, "Roadmap", 8), (6, "Risks", 2)]);
        source.failing.push(6);
        let (_dir, orch) = orchestrator(source);

        let record = orch.sync_specific_sheets(&[5, 6, 9]);

        assert_eq!(record.sync_type, SyncType::Selective);
        assert_eq!(record.requested_sheets, Some(vec![5, 6, 9]));
        assert_eq!(record.total_sheets, 3);
        assert_eq!(record.successful_sheets, 1);
        assert_eq!(record.sheet_results[0].sheet_name(), Some("Roadmap"));
        assert_eq!(record.sheet_results[1].sheet_name(), None);
        assert!(record.errors[0].starts_with("Failed to sync sheet 6:"));
        assert!(record.errors[1].contains("sheet not found: 9"));
        match &record.sheet_results[1] {
            SheetOutcome::Failed { error, .. } => assert_eq!(error, &record.errors[0]),
            other => panic!("expected failed outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_history_failure_leaves_status_unchanged() {
        let (_dir, orch) = orchestrator(FakeSource::new(vec![(1, "A", 0)]));
        fs::create_dir(orch.store().sync_history_path()).unwrap();

        let record = orch.full_sync();

        assert_eq!(record.status, SyncStatus::Completed);
        assert!(record
            .errors
            .last()
            .unwrap()
            .starts_with("Failed to save sync history"));
    }

    #[test]
    fn test_cleanup_report() {
        let (_dir, orch) = orchestrator(FakeSource::new(vec![(1, "A", 0), (2, "B", 0)]));
        orch.full_sync();

        match orch.cleanup_old_data(1) {
            CleanupReport::Success {
                message,
                removed_files,
            } => {
                assert_eq!(message, "Cleanup completed, kept latest 1 files");
                assert_eq!(removed_files, 1);
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_cleanup_failure_is_reported() {
        let (_dir, orch) = orchestrator(FakeSource::new(vec![(1, "A", 0)]));
        orch.full_sync();
        fs::create_dir(orch.store().sheets_dir().join("sheet_9.json")).unwrap();

        match orch.cleanup_old_data(0) {
            CleanupReport::Failed { error } => {
                assert!(error.starts_with("Cleanup failed:"), "unexpected error: {error}");
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!orch.cleanup_old_data(0).is_success());
    }

    #[test]
    fn test_validate_reports_workspace() {
        let (_dir, orch) = orchestrator(FakeSource::new(vec![(1, "A", 0)]));
        assert_eq!(
            orch.validate_connection(),
            ValidationReport::Success {
                workspace_name: "Finance".to_string(),
                workspace_id: 77,
                sheet_count: 1
            }
        );
    }
}
