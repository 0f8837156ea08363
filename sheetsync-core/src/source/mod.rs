//! Remote data source abstraction
//!
//! The orchestrator only talks to a [`DataSource`]. The production
//! implementation is [`SmartsheetClient`]; tests plug in in-memory fakes.
//!
//! ## Lazy fetching
//!
//! [`fetch_all`] lists the workspace's sheets up front and then fetches one
//! sheet per call to `next()`. Each item is a [`SheetFetch`]: either the
//! snapshot or the reason it could not be fetched. A failed sheet never ends
//! the sequence.
//!
//! ```rust,ignore
//! for fetch in fetch_all(&client)? {
//!     match fetch {
//!         SheetFetch::Fetched { info, snapshot } => store.save_sheet_data(info.id, &snapshot)?,
//!         SheetFetch::Failed { info, reason } => eprintln!("{}: {}", info.name, reason),
//!     }
//! }
//! ```

mod client;

pub use client::SmartsheetClient;

use crate::error::Result;
use crate::types::{SheetId, SheetInfo, SheetSnapshot, WorkspaceInfo};

/// Capability for reading a remote workspace.
pub trait DataSource {
    /// Workspace metadata, stamped with the fetch time.
    fn get_workspace_info(&self) -> Result<WorkspaceInfo>;

    /// All sheets in the workspace.
    fn list_sheets(&self) -> Result<Vec<SheetInfo>>;

    /// Full structure and data for one sheet.
    fn get_sheet(&self, sheet_id: SheetId) -> Result<SheetSnapshot>;
}

/// Outcome of fetching one sheet from the listing.
#[derive(Debug)]
pub enum SheetFetch {
    Fetched {
        info: SheetInfo,
        snapshot: SheetSnapshot,
    },
    Failed {
        info: SheetInfo,
        reason: String,
    },
}

impl SheetFetch {
    pub fn info(&self) -> &SheetInfo {
        match self {
            SheetFetch::Fetched { info, .. } | SheetFetch::Failed { info, .. } => info,
        }
    }
}

/// Counts kept while iterating a [`SheetFetches`] sequence.
///
/// Failure messages live on the yielded [`SheetFetch::Failed`] items.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchSummary {
    pub total_sheets: usize,
    pub successful_fetches: usize,
    pub failed_fetches: usize,
}

/// List every sheet, then fetch them lazily one at a time.
///
/// A failure to list sheets is returned immediately; per-sheet failures are
/// yielded as [`SheetFetch::Failed`].
pub fn fetch_all(source: &dyn DataSource) -> Result<SheetFetches<'_>> {
    tracing::info!("Starting full workspace data fetch");

    let sheets = source.list_sheets()?;
    if sheets.is_empty() {
        tracing::warn!("No sheets found in workspace");
    }

    Ok(SheetFetches {
        source,
        summary: FetchSummary {
            total_sheets: sheets.len(),
            ..Default::default()
        },
        pending: sheets.into_iter(),
        finished: false,
    })
}

/// Iterator returned by [`fetch_all`].
pub struct SheetFetches<'a> {
    source: &'a dyn DataSource,
    pending: std::vec::IntoIter<SheetInfo>,
    summary: FetchSummary,
    finished: bool,
}

impl SheetFetches<'_> {
    /// Number of sheets in the listing.
    pub fn total(&self) -> usize {
        self.summary.total_sheets
    }

    /// Tallies for the items yielded so far.
    pub fn summary(&self) -> &FetchSummary {
        &self.summary
    }

    /// Sheet the next call to `next()` will fetch.
    pub fn upcoming(&self) -> Option<&SheetInfo> {
        self.pending.as_slice().first()
    }
}

impl Iterator for SheetFetches<'_> {
    type Item = SheetFetch;

    fn next(&mut self) -> Option<SheetFetch> {
        let Some(info) = self.pending.next() else {
            if !self.finished {
                self.finished = true;
                tracing::info!(
                    successful = self.summary.successful_fetches,
                    failed = self.summary.failed_fetches,
                    "Workspace fetch complete"
                );
            }
            return None;
        };

        match self.source.get_sheet(info.id) {
            Ok(snapshot) => {
                self.summary.successful_fetches += 1;
                Some(SheetFetch::Fetched { info, snapshot })
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(
                    sheet_id = info.id,
                    sheet_name = %info.name,
                    error = %reason,
                    "Failed to fetch sheet"
                );
                self.summary.failed_fetches += 1;
                Some(SheetFetch::Failed { info, reason })
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pending.size_hint()
    }
}
