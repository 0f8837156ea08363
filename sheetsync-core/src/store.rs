//! JSON snapshot store
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_dir>/
//! ├── workspace_meta.json      workspace metadata (overwritten per fetch)
//! ├── sync_history.json        last 50 sync records, newest last
//! └── sheets/
//!     └── sheet_<id>.json      one snapshot per sheet (overwritten per sync)
//! ```
//!
//! Loads are forgiving: a missing or unreadable file means "no data yet" and
//! comes back as `None`. Saves and retention deletes propagate their errors.
//!
//! The store assumes a single writer per data directory. History updates are
//! load-modify-store without locking.

use crate::error::Result;
use crate::types::{
    round2, SheetId, SheetMetadata, SheetSnapshot, SheetSummary, SheetSummaryEntry, SyncHistory,
    SyncRecord, WorkspaceInfo, HISTORY_CAPACITY,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const WORKSPACE_META_FILE: &str = "workspace_meta.json";
const SYNC_HISTORY_FILE: &str = "sync_history.json";
const SHEETS_DIR: &str = "sheets";
const SHEET_FILE_PREFIX: &str = "sheet_";

/// Only the header of a snapshot file; columns and rows are skipped.
#[derive(Deserialize)]
struct SnapshotHeader {
    metadata: SheetMetadata,
}

/// File-backed store for workspace metadata, sheet snapshots and sync history.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    data_dir: PathBuf,
    sheets_dir: PathBuf,
    history_capacity: usize,
}

impl SnapshotStore {
    /// Open a store rooted at `data_dir`, creating directories as needed.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        let sheets_dir = data_dir.join(SHEETS_DIR);
        fs::create_dir_all(&sheets_dir)?;

        tracing::debug!(path = %data_dir.display(), "Opened snapshot store");

        Ok(Self {
            data_dir,
            sheets_dir,
            history_capacity: HISTORY_CAPACITY,
        })
    }

    /// Override how many history records are kept.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn sheets_dir(&self) -> &Path {
        &self.sheets_dir
    }

    pub fn workspace_meta_path(&self) -> PathBuf {
        self.data_dir.join(WORKSPACE_META_FILE)
    }

    pub fn sync_history_path(&self) -> PathBuf {
        self.data_dir.join(SYNC_HISTORY_FILE)
    }

    /// Snapshot path for a sheet. Always the same file for the same ID.
    pub fn sheet_file_path(&self, sheet_id: SheetId) -> PathBuf {
        self.sheets_dir
            .join(format!("{}{}.json", SHEET_FILE_PREFIX, sheet_id))
    }

    // ============================================
    // Workspace metadata
    // ============================================

    pub fn save_workspace_metadata(&self, info: &WorkspaceInfo) -> Result<()> {
        let path = self.workspace_meta_path();
        write_json(&path, info).map_err(|e| {
            tracing::error!(error = %e, "Error saving workspace metadata");
            e
        })?;
        tracing::info!(path = %path.display(), "Saved workspace metadata");
        Ok(())
    }

    pub fn load_workspace_metadata(&self) -> Option<WorkspaceInfo> {
        load_or_none(&self.workspace_meta_path(), "workspace metadata")
    }

    // ============================================
    // Sheet snapshots
    // ============================================

    pub fn save_sheet_data(&self, sheet_id: SheetId, snapshot: &SheetSnapshot) -> Result<()> {
        let path = self.sheet_file_path(sheet_id);
        write_json(&path, snapshot).map_err(|e| {
            tracing::error!(sheet_id, error = %e, "Error saving sheet");
            e
        })?;
        tracing::info!(sheet_id, path = %path.display(), "Saved sheet data");
        Ok(())
    }

    pub fn load_sheet_data(&self, sheet_id: SheetId) -> Option<SheetSnapshot> {
        load_or_none(
            &self.sheet_file_path(sheet_id),
            &format!("sheet {}", sheet_id),
        )
    }

    /// All persisted snapshot files, sorted by path.
    ///
    /// Returns an empty list if the directory cannot be read.
    pub fn get_all_sheet_files(&self) -> Vec<PathBuf> {
        let pattern = format!(
            "{}/{}*.json",
            glob::Pattern::escape(&self.sheets_dir.to_string_lossy()),
            SHEET_FILE_PREFIX
        );

        let entries = match glob::glob(&pattern) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "Error listing sheet files");
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable entry in sheets directory");
                    None
                }
            })
            .collect();
        files.sort();

        tracing::debug!(count = files.len(), "Found sheet files");
        files
    }

    // ============================================
    // Sync history
    // ============================================

    /// Stamp `record` and append it to history, keeping the newest entries.
    pub fn save_sync_history(&self, record: &mut SyncRecord) -> Result<()> {
        let path = self.sync_history_path();
        let mut history = match self.load_sync_history() {
            Some(history) => history,
            None => {
                if path.exists() {
                    tracing::warn!(
                        path = %path.display(),
                        "Sync history is unreadable, replacing it with a new history"
                    );
                }
                SyncHistory::default()
            }
        };

        record.timestamp = Some(Utc::now());
        history.push_bounded(record.clone(), self.history_capacity);

        write_json(&path, &history).map_err(|e| {
            tracing::error!(error = %e, "Error saving sync history");
            e
        })?;
        tracing::info!(entries = history.len(), "Saved sync history record");
        Ok(())
    }

    pub fn load_sync_history(&self) -> Option<SyncHistory> {
        load_or_none(&self.sync_history_path(), "sync history")
    }

    // ============================================
    // Derived views and retention
    // ============================================

    /// Summarize stored snapshots.
    ///
    /// A file that cannot be stat'ed or parsed is logged and skipped; the
    /// rest of the summary is still produced.
    pub fn get_sheet_summary(&self) -> SheetSummary {
        let files = self.get_all_sheet_files();
        let mut summary = SheetSummary {
            total_sheets: files.len(),
            ..Default::default()
        };
        let mut total_bytes: u64 = 0;

        for path in &files {
            let size = match fs::metadata(path) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Error processing file");
                    continue;
                }
            };
            total_bytes += size;

            let header: SnapshotHeader = match read_json(path) {
                Ok(header) => header,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Error processing file");
                    continue;
                }
            };
            let metadata = header.metadata;

            if let Some(last_sync) = metadata.last_sync {
                if summary.last_updated.map_or(true, |current| last_sync > current) {
                    summary.last_updated = Some(last_sync);
                }
            }

            summary.sheets.push(SheetSummaryEntry {
                id: sheet_id_from_path(path).unwrap_or(metadata.id),
                name: metadata.name,
                last_sync: metadata.last_sync,
                row_count: metadata.total_row_count,
                size_kb: round2(size as f64 / 1024.0),
            });
        }

        summary.total_size_mb = round2(total_bytes as f64 / (1024.0 * 1024.0));
        summary
    }

    /// Delete all but the `keep_latest` most recently modified snapshots.
    ///
    /// Returns the number of files removed. The first stat or delete failure
    /// aborts the cleanup.
    pub fn cleanup_old_files(&self, keep_latest: usize) -> Result<usize> {
        let files = self.get_all_sheet_files();
        if files.len() <= keep_latest {
            return Ok(0);
        }

        let mut dated = files
            .into_iter()
            .map(|path| -> Result<(SystemTime, PathBuf)> {
                let modified = fs::metadata(&path)?.modified()?;
                Ok((modified, path))
            })
            .collect::<Result<Vec<_>>>()?;

        // Newest first
        dated.sort_by(|a, b| b.0.cmp(&a.0));

        let to_remove = &dated[keep_latest..];
        for (_, path) in to_remove {
            fs::remove_file(path).map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "Error during cleanup");
                e
            })?;
            tracing::info!(path = %path.display(), "Removed old file");
        }

        tracing::info!(removed = to_remove.len(), "Cleaned up old files");
        Ok(to_remove.len())
    }
}

/// Sheet ID encoded in a `sheet_<id>.json` filename.
fn sheet_id_from_path(path: &Path) -> Option<SheetId> {
    path.file_stem()?
        .to_str()?
        .strip_prefix(SHEET_FILE_PREFIX)?
        .parse()
        .ok()
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Read a JSON file, treating absence and corruption as "no data".
fn load_or_none<T: DeserializeOwned>(path: &Path, what: &str) -> Option<T> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No {} file found", what);
        return None;
    }

    match read_json(path) {
        Ok(value) => {
            tracing::debug!(path = %path.display(), "Loaded {}", what);
            Some(value)
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Error loading {}", what);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cell, Column, Row, SyncStatus, SyncType};
    use chrono::{DateTime, Duration, TimeZone};
    use std::collections::BTreeMap;
    use std::time::UNIX_EPOCH;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, SnapshotStore) {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path().join("data")).unwrap();
        (dir, store)
    }

    fn snapshot(id: SheetId, name: &str, rows: u64, last_sync: Option<DateTime<Utc>>) -> SheetSnapshot {
        let mut cells = BTreeMap::new();
        cells.insert(
            11,
            Cell {
                value: serde_json::json!("Rent"),
                display_value: Some("Rent".to_string()),
                formula: None,
            },
        );
        SheetSnapshot {
            metadata: SheetMetadata {
                id,
                name: name.to_string(),
                permalink: None,
                version: Some(3),
                total_row_count: rows,
                created_at: None,
                modified_at: None,
                last_sync,
            },
            columns: vec![Column {
                id: 11,
                title: "Item".to_string(),
                column_type: Some("TEXT_NUMBER".to_string()),
                primary: true,
                index: 0,
                width: Some(150),
                locked: false,
            }],
            rows: vec![Row {
                id: 1001,
                row_number: 1,
                parent_id: None,
                version: Some(1),
                created_at: None,
                modified_at: None,
                cells,
            }],
        }
    }

    fn set_mtime(path: &Path, secs: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(UNIX_EPOCH + std::time::Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn test_open_creates_layout() {
        let (_dir, store) = temp_store();
        assert!(store.sheets_dir().is_dir());
        assert!(store.sheet_file_path(42).ends_with("sheets/sheet_42.json"));
    }

    #[test]
    fn test_sheet_round_trip() {
        let (_dir, store) = temp_store();
        let original = snapshot(101, "Budget", 1, Some(Utc::now()));

        store.save_sheet_data(101, &original).unwrap();
        let loaded = store.load_sheet_data(101).unwrap();

        assert_eq!(loaded, original);
    }

    #[test]
    fn test_resave_overwrites_same_file() {
        let (_dir, store) = temp_store();
        store.save_sheet_data(7, &snapshot(7, "Old", 1, None)).unwrap();
        store.save_sheet_data(7, &snapshot(7, "New", 9, None)).unwrap();

        assert_eq!(store.get_all_sheet_files().len(), 1);
        let loaded = store.load_sheet_data(7).unwrap();
        assert_eq!(loaded.metadata.name, "New");
        assert_eq!(loaded.metadata.total_row_count, 9);
    }

    #[test]
    fn test_missing_and_corrupt_files_load_as_none() {
        let (_dir, store) = temp_store();
        assert!(store.load_workspace_metadata().is_none());
        assert!(store.load_sheet_data(1).is_none());
        assert!(store.load_sync_history().is_none());

        fs::write(store.workspace_meta_path(), "{not json").unwrap();
        fs::write(store.sheet_file_path(1), "[]").unwrap();
        fs::write(store.sync_history_path(), "").unwrap();
        assert!(store.load_workspace_metadata().is_none());
        assert!(store.load_sheet_data(1).is_none());
        assert!(store.load_sync_history().is_none());
    }

    #[test]
    fn test_workspace_metadata_overwrite() {
        let (_dir, store) = temp_store();
        let mut info = WorkspaceInfo {
            id: 9,
            name: "Ops".to_string(),
            permalink: None,
            sheet_count: 2,
            last_fetched: Utc::now(),
        };
        store.save_workspace_metadata(&info).unwrap();
        info.sheet_count = 5;
        store.save_workspace_metadata(&info).unwrap();

        assert_eq!(store.load_workspace_metadata().unwrap().sheet_count, 5);
    }

    #[test]
    fn test_save_fails_when_directory_is_gone() {
        let (_dir, store) = temp_store();
        fs::remove_dir_all(store.sheets_dir()).unwrap();
        assert!(store.save_sheet_data(1, &snapshot(1, "A", 0, None)).is_err());
    }

    #[test]
    fn test_get_all_sheet_files_filters_by_pattern() {
        let (_dir, store) = temp_store();
        store.save_sheet_data(2, &snapshot(2, "B", 0, None)).unwrap();
        store.save_sheet_data(1, &snapshot(1, "A", 0, None)).unwrap();
        fs::write(store.sheets_dir().join("notes.txt"), "x").unwrap();
        fs::write(store.sheets_dir().join("other_3.json"), "{}").unwrap();

        let files = store.get_all_sheet_files();
        assert_eq!(files, vec![store.sheet_file_path(1), store.sheet_file_path(2)]);
    }

    #[test]
    fn test_history_is_stamped_and_capped() {
        let (_dir, store) = temp_store();
        let store = store.with_history_capacity(3);

        for i in 0..5 {
            let mut record = SyncRecord::start(SyncType::Selective);
            record.requested_sheets = Some(vec![i]);
            record.finish(SyncStatus::Completed, std::time::Duration::ZERO);
            store.save_sync_history(&mut record).unwrap();
            assert!(record.timestamp.is_some());
        }

        let history = store.load_sync_history().unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history.sync_operations[0].requested_sheets, Some(vec![2]));
        assert_eq!(history.last().unwrap().requested_sheets, Some(vec![4]));
    }

    #[test]
    fn test_unreadable_history_is_replaced() {
        let (_dir, store) = temp_store();
        fs::write(store.sync_history_path(), "{not json").unwrap();

        let mut record = SyncRecord::start(SyncType::Full);
        record.finish(SyncStatus::Completed, std::time::Duration::ZERO);
        store.save_sync_history(&mut record).unwrap();

        let history = store.load_sync_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.last().unwrap().timestamp, record.timestamp);
    }

    #[test]
    fn test_default_history_capacity_is_fifty() {
        let (_dir, store) = temp_store();
        for _ in 0..51 {
            let mut record = SyncRecord::start(SyncType::Full);
            record.finish(SyncStatus::Completed, std::time::Duration::ZERO);
            store.save_sync_history(&mut record).unwrap();
        }
        assert_eq!(store.load_sync_history().unwrap().len(), 50);
    }

    #[test]
    fn test_summary_tracks_latest_sync_and_skips_bad_files() {
        let (_dir, store) = temp_store();
        let older = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let newer = older + Duration::hours(5);

        store.save_sheet_data(101, &snapshot(101, "Budget", 12, Some(older))).unwrap();
        store.save_sheet_data(102, &snapshot(102, "Tasks", 4, Some(newer))).unwrap();
        store.save_sheet_data(103, &snapshot(103, "Draft", 0, None)).unwrap();
        fs::write(store.sheet_file_path(104), "{\"metadata\": 5}").unwrap();

        let summary = store.get_sheet_summary();

        assert_eq!(summary.total_sheets, 4);
        assert_eq!(summary.sheets.len(), 3);
        assert_eq!(summary.last_updated, Some(newer));

        let budget = summary.sheets.iter().find(|s| s.id == 101).unwrap();
        assert_eq!(budget.name, "Budget");
        assert_eq!(budget.row_count, 12);
        assert!(budget.size_kb > 0.0);
    }

    #[test]
    fn test_summary_of_empty_store() {
        let (_dir, store) = temp_store();
        let summary = store.get_sheet_summary();
        assert_eq!(summary.total_sheets, 0);
        assert!(summary.sheets.is_empty());
        assert!(summary.last_updated.is_none());
        assert_eq!(summary.total_size_mb, 0.0);
    }

    #[test]
    fn test_cleanup_keeps_most_recent() {
        let (_dir, store) = temp_store();
        for id in 1..=8 {
            store.save_sheet_data(id, &snapshot(id, "S", 0, None)).unwrap();
            set_mtime(&store.sheet_file_path(id), 1_700_000_000 + id as u64 * 60);
        }

        let removed = store.cleanup_old_files(5).unwrap();

        assert_eq!(removed, 3);
        let remaining: Vec<SheetId> = store
            .get_all_sheet_files()
            .iter()
            .filter_map(|p| sheet_id_from_path(p))
            .collect();
        assert_eq!(remaining, vec![4, 5, 6, 7, 8]);
        assert!(store.load_sheet_data(1).is_none());
    }

    #[test]
    fn test_cleanup_noop_within_limit() {
        let (_dir, store) = temp_store();
        store.save_sheet_data(1, &snapshot(1, "A", 0, None)).unwrap();
        store.save_sheet_data(2, &snapshot(2, "B", 0, None)).unwrap();

        assert_eq!(store.cleanup_old_files(2).unwrap(), 0);
        assert_eq!(store.cleanup_old_files(10).unwrap(), 0);
        assert_eq!(store.get_all_sheet_files().len(), 2);
    }

    #[test]
    fn test_cleanup_stops_at_undeletable_entry() {
        let (_dir, store) = temp_store();
        store.save_sheet_data(1, &snapshot(1, "A", 0, None)).unwrap();
        set_mtime(&store.sheet_file_path(1), 1_700_000_000);
        // Newest entry, and remove_file cannot delete a directory
        fs::create_dir(store.sheets_dir().join("sheet_9.json")).unwrap();

        assert!(store.cleanup_old_files(0).is_err());
        assert!(store.load_sheet_data(1).is_some());
    }

    #[test]
    fn test_sheet_id_from_path() {
        assert_eq!(sheet_id_from_path(Path::new("/x/sheet_123.json")), Some(123));
        assert_eq!(sheet_id_from_path(Path::new("sheet_abc.json")), None);
        assert_eq!(sheet_id_from_path(Path::new("other_1.json")), None);
    }
}
