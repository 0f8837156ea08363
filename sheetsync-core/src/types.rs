//! Core domain types for sheetsync
//!
//! These types mirror what is persisted on disk: workspace metadata, one
//! snapshot per sheet, and the bounded sync history.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Workspace** | Top-level remote container holding multiple sheets |
//! | **Sheet** | A table with typed columns and rows of cells, each cell keyed by column |
//! | **Snapshot** | A full point-in-time capture of one sheet's structure and data |
//! | **Sync Record** | One audit entry describing the outcome of a single sync invocation |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Smartsheet object identifier (sheets, columns, rows, workspaces).
pub type SheetId = i64;

/// Maximum number of records retained in the sync history.
pub const HISTORY_CAPACITY: usize = 50;

// ============================================
// Remote metadata
// ============================================

/// Workspace metadata captured at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub id: i64,
    pub name: String,
    pub permalink: Option<String>,
    pub sheet_count: usize,
    pub last_fetched: DateTime<Utc>,
}

/// One entry of a workspace's sheet listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetInfo {
    pub id: SheetId,
    pub name: String,
    pub permalink: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub access_level: Option<String>,
}

// ============================================
// Sheet snapshots
// ============================================

/// Full capture of one sheet. Replaced, never merged, on each sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetSnapshot {
    pub metadata: SheetMetadata,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

/// Header of a snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetMetadata {
    pub id: SheetId,
    pub name: String,
    #[serde(default)]
    pub permalink: Option<String>,
    pub version: Option<i64>,
    /// Row count as reported by the server, not a recount of `rows`
    #[serde(default)]
    pub total_row_count: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    /// When this snapshot was taken
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub column_type: Option<String>,
    #[serde(default)]
    pub primary: bool,
    pub index: u32,
    pub width: Option<u32>,
    #[serde(default)]
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: i64,
    pub row_number: u32,
    /// Parent row for hierarchical sheets
    pub parent_id: Option<i64>,
    pub version: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    /// Cells keyed by column id
    #[serde(default)]
    pub cells: BTreeMap<i64, Cell>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub value: serde_json::Value,
    pub display_value: Option<String>,
    pub formula: Option<String>,
}

// ============================================
// Sync bookkeeping
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Full,
    Selective,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Full => "full",
            SyncType::Selective => "selective",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }
}

/// Result of processing one sheet within a sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SheetOutcome {
    Success {
        sheet_id: SheetId,
        sheet_name: String,
        row_count: u64,
    },
    Failed {
        sheet_id: SheetId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sheet_name: Option<String>,
        error: String,
    },
}

impl SheetOutcome {
    pub fn sheet_id(&self) -> SheetId {
        match self {
            SheetOutcome::Success { sheet_id, .. } | SheetOutcome::Failed { sheet_id, .. } => {
                *sheet_id
            }
        }
    }

    pub fn sheet_name(&self) -> Option<&str> {
        match self {
            SheetOutcome::Success { sheet_name, .. } => Some(sheet_name),
            SheetOutcome::Failed { sheet_name, .. } => sheet_name.as_deref(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SheetOutcome::Success { .. })
    }
}

/// Audit entry for a single sync invocation.
///
/// Created `Running`, accumulates outcomes, then is finalized to
/// `Completed` or `Failed` before it is appended to history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub sync_type: SyncType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_sheets: Option<Vec<SheetId>>,
    pub total_sheets: usize,
    pub successful_sheets: usize,
    pub failed_sheets: usize,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub sheet_results: Vec<SheetOutcome>,
    /// Assigned when the record is appended to history
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SyncRecord {
    /// Start a new record in the `Running` state.
    pub fn start(sync_type: SyncType) -> Self {
        Self {
            sync_type,
            start_time: Utc::now(),
            end_time: None,
            duration_seconds: 0.0,
            status: SyncStatus::Running,
            workspace_id: None,
            requested_sheets: None,
            total_sheets: 0,
            successful_sheets: 0,
            failed_sheets: 0,
            errors: Vec::new(),
            sheet_results: Vec::new(),
            timestamp: None,
        }
    }

    /// Record a sheet that was fetched and persisted.
    pub fn record_success(&mut self, sheet_id: SheetId, sheet_name: String, row_count: u64) {
        self.successful_sheets += 1;
        self.total_sheets = self.successful_sheets + self.failed_sheets;
        self.sheet_results.push(SheetOutcome::Success {
            sheet_id,
            sheet_name,
            row_count,
        });
    }

    /// Record a sheet that could not be fetched or persisted.
    ///
    /// `error` names the sheet and goes both to `errors` and the outcome.
    pub fn record_failure(
        &mut self,
        sheet_id: SheetId,
        sheet_name: Option<String>,
        error: String,
    ) {
        self.failed_sheets += 1;
        self.total_sheets = self.successful_sheets + self.failed_sheets;
        self.errors.push(error.clone());
        self.sheet_results.push(SheetOutcome::Failed {
            sheet_id,
            sheet_name,
            error,
        });
    }

    /// Move to a terminal state and stamp end time and duration.
    pub fn finish(&mut self, status: SyncStatus, elapsed: std::time::Duration) {
        self.status = status;
        self.total_sheets = self.successful_sheets + self.failed_sheets;
        self.duration_seconds = round2(elapsed.as_secs_f64());
        self.end_time = Some(Utc::now());
    }
}

/// Bounded, append-only log of sync records (newest last).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncHistory {
    #[serde(default)]
    pub sync_operations: Vec<SyncRecord>,
}

impl SyncHistory {
    /// Append a record, evicting the oldest entries beyond `capacity`.
    pub fn push_bounded(&mut self, record: SyncRecord, capacity: usize) {
        self.sync_operations.push(record);
        if self.sync_operations.len() > capacity {
            let excess = self.sync_operations.len() - capacity;
            self.sync_operations.drain(..excess);
        }
    }

    pub fn last(&self) -> Option<&SyncRecord> {
        self.sync_operations.last()
    }

    pub fn len(&self) -> usize {
        self.sync_operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sync_operations.is_empty()
    }
}

// ============================================
// Reports
// ============================================

/// Aggregate over all stored snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetSummary {
    pub total_sheets: usize,
    pub sheets: Vec<SheetSummaryEntry>,
    pub last_updated: Option<DateTime<Utc>>,
    pub total_size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetSummaryEntry {
    pub id: SheetId,
    pub name: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub row_count: u64,
    pub size_kb: f64,
}

/// Snapshot of local state for the `status` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub workspace: Option<WorkspaceInfo>,
    pub sheets_summary: SheetSummary,
    pub last_sync: Option<SyncRecord>,
    pub total_syncs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationReport {
    Success {
        workspace_name: String,
        workspace_id: i64,
        sheet_count: usize,
    },
    Failed {
        error: String,
    },
}

impl ValidationReport {
    pub fn is_success(&self) -> bool {
        matches!(self, ValidationReport::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanupReport {
    Success { message: String, removed_files: usize },
    Failed { error: String },
}

impl CleanupReport {
    pub fn is_success(&self) -> bool {
        matches!(self, CleanupReport::Success { .. })
    }
}

/// Round to two decimal places for sizes and durations.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sheet_outcome_serializes_with_status_tag() {
        let ok = SheetOutcome::Success {
            sheet_id: 101,
            sheet_name: "Budget".to_string(),
            row_count: 12,
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"status": "success", "sheet_id": 101, "sheet_name": "Budget", "row_count": 12})
        );

        let failed = SheetOutcome::Failed {
            sheet_id: 102,
            sheet_name: None,
            error: "timeout".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"status": "failed", "sheet_id": 102, "error": "timeout"})
        );
    }

    #[test]
    fn test_record_counters_stay_consistent() {
        let mut record = SyncRecord::start(SyncType::Full);
        assert_eq!(record.status, SyncStatus::Running);

        record.record_success(1, "A".to_string(), 3);
        record.record_failure(2, None, "Failed to sync sheet 2: boom".to_string());
        record.record_success(3, "C".to_string(), 0);
        record.finish(SyncStatus::Completed, std::time::Duration::from_millis(1234));

        assert_eq!(record.successful_sheets, 2);
        assert_eq!(record.failed_sheets, 1);
        assert_eq!(record.total_sheets, 3);
        assert_eq!(record.errors.len(), 1);
        assert_eq!(record.duration_seconds, 1.23);
        assert!(record.end_time.is_some());
        assert!(!record.sheet_results[1].is_success());
        assert_eq!(
            record.sheet_results[1],
            SheetOutcome::Failed {
                sheet_id: 2,
                sheet_name: None,
                error: "Failed to sync sheet 2: boom".to_string(),
            }
        );
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = SyncHistory::default();
        for i in 0..(HISTORY_CAPACITY + 1) {
            let mut record = SyncRecord::start(SyncType::Selective);
            record.requested_sheets = Some(vec![i as i64]);
            history.push_bounded(record, HISTORY_CAPACITY);
        }

        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(
            history.sync_operations[0].requested_sheets,
            Some(vec![1])
        );
        assert_eq!(
            history.last().unwrap().requested_sheets,
            Some(vec![HISTORY_CAPACITY as i64])
        );
    }

    #[test]
    fn test_cells_keyed_by_column_id() {
        let raw = json!({
            "id": 9,
            "row_number": 1,
            "parent_id": null,
            "version": 4,
            "created_at": null,
            "modified_at": null,
            "cells": {
                "5001": {"value": 42.5, "display_value": "42.5", "formula": null},
                "5002": {"value": "done", "display_value": "done", "formula": "=\"done\""}
            }
        });
        let row: Row = serde_json::from_value(raw).unwrap();
        assert_eq!(row.cells.len(), 2);
        assert_eq!(row.cells[&5001].value, json!(42.5));
        assert_eq!(row.cells[&5002].formula.as_deref(), Some("=\"done\""));
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.0), 0.0);
        assert_eq!(round2(1.005_1), 1.01);
        assert_eq!(round2(2.0 / 3.0), 0.67);
    }
}
