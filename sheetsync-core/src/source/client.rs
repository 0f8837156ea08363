//! HTTP client for the Smartsheet REST API
//!
//! Only the read endpoints needed for snapshots are used:
//! - `GET /workspaces/{id}`: workspace metadata and its sheet listing
//! - `GET /sheets/{id}`: full sheet with columns, rows and cells
//!
//! Requests go through an async `reqwest` client driven by a private
//! current-thread runtime, so callers see a plain blocking API.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::{Config, SecurityConfig, SecurityMode};
use crate::error::{Error, Result};
use crate::types::{
    Cell, Column, Row, SheetId, SheetInfo, SheetMetadata, SheetSnapshot, WorkspaceInfo,
};

use super::DataSource;

/// Blocking Smartsheet client bound to one workspace.
pub struct SmartsheetClient {
    http_client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
    base_url: String,
    workspace_id: i64,
    max_retries: usize,
    security_mode: SecurityMode,
}

impl SmartsheetClient {
    /// Create a client from validated configuration.
    ///
    /// Fails if the token or workspace ID is missing, or if the TLS/proxy
    /// settings cannot be applied.
    pub fn new(config: &Config) -> Result<Self> {
        let api = &config.smartsheet;

        let token = api
            .api_token
            .as_deref()
            .ok_or_else(|| Error::Config("SMARTSHEET_API_TOKEN is required".to_string()))?;
        let workspace_id = api
            .workspace_id
            .ok_or_else(|| Error::Config("WORKSPACE_ID is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::Config(format!("invalid api token: {}", e)))?,
        );

        let builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .user_agent(concat!("sheetsync/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers);

        let http_client = apply_security(builder, &config.security)?
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Config(format!("failed to create runtime: {}", e)))?;

        tracing::info!(
            security_mode = %config.security.mode,
            workspace_id,
            "Smartsheet client initialized"
        );

        Ok(Self {
            http_client,
            runtime,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            workspace_id,
            max_retries: api.max_retries,
            security_mode: config.security.mode,
        })
    }

    pub fn security_mode(&self) -> SecurityMode {
        self.security_mode
    }

    pub fn workspace_id(&self) -> i64 {
        self.workspace_id
    }

    fn fetch_workspace(&self) -> Result<ApiWorkspace> {
        let path = format!("/workspaces/{}", self.workspace_id);
        self.runtime.block_on(self.get_with_retry(&path))
    }

    /// GET with retry on transient failures (transport, 429, 5xx).
    async fn get_with_retry<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(500);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tracing::debug!(
                    "Retrying GET {} (attempt {}/{}), waiting {:?}",
                    path,
                    attempt + 1,
                    self.max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }

            match self.get_json(path).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    tracing::warn!(path, error = %e, "Transient error calling Smartsheet");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Transport("max retries exceeded".to_string())))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Transport(format!("failed to parse response: {}", e)))
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            })
        }
    }
}

impl DataSource for SmartsheetClient {
    fn get_workspace_info(&self) -> Result<WorkspaceInfo> {
        let workspace = self.fetch_workspace().map_err(|e| {
            tracing::error!(error = %e, "Error fetching workspace info");
            e
        })?;
        tracing::info!(name = %workspace.name, "Retrieved workspace");
        Ok(workspace.into_info(Utc::now()))
    }

    fn list_sheets(&self) -> Result<Vec<SheetInfo>> {
        let workspace = self.fetch_workspace().map_err(|e| {
            tracing::error!(error = %e, "Error fetching sheets list");
            e
        })?;
        let sheets: Vec<SheetInfo> = workspace.sheets.into_iter().map(SheetInfo::from).collect();
        tracing::info!(count = sheets.len(), "Found sheets in workspace");
        Ok(sheets)
    }

    fn get_sheet(&self, sheet_id: SheetId) -> Result<SheetSnapshot> {
        tracing::info!(sheet_id, "Fetching sheet data");

        let path = format!("/sheets/{}", sheet_id);
        let sheet: ApiSheet = self
            .runtime
            .block_on(self.get_with_retry(&path))
            .map_err(|e| match e {
                Error::Api { status: 404, .. } => Error::SheetNotFound(sheet_id),
                other => other,
            })?;

        let snapshot = sheet.into_snapshot(Utc::now());
        tracing::info!(
            sheet_id,
            name = %snapshot.metadata.name,
            rows = snapshot.rows.len(),
            "Fetched sheet"
        );
        Ok(snapshot)
    }
}

/// Apply TLS and proxy policy for the configured security mode.
fn apply_security(
    mut builder: reqwest::ClientBuilder,
    security: &SecurityConfig,
) -> Result<reqwest::ClientBuilder> {
    match security.mode {
        SecurityMode::Enterprise => {
            if !security.verify_tls {
                tracing::warn!("verify_tls = false is ignored in enterprise mode");
            }
            if let Some(proxy_url) = &security.proxy_url {
                let proxy = reqwest::Proxy::all(proxy_url)
                    .map_err(|e| Error::Config(format!("invalid proxy url {}: {}", proxy_url, e)))?;
                builder = builder.proxy(proxy);
            }
        }
        SecurityMode::Testing => {
            builder = builder.no_proxy();
            if !security.verify_tls {
                tracing::warn!("TLS certificate verification disabled (testing mode)");
                builder = builder.danger_accept_invalid_certs(true);
            }
        }
    }

    if let Some(path) = &security.ca_bundle {
        let pem = std::fs::read(path).map_err(|e| {
            Error::Config(format!("failed to read CA bundle {}: {}", path.display(), e))
        })?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| Error::Config(format!("invalid CA bundle {}: {}", path.display(), e)))?;
        builder = builder.add_root_certificate(cert);
    }

    Ok(builder)
}

/// Extract `message` from a Smartsheet error body, falling back to the raw text.
fn api_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ApiErrorBody {
        message: String,
    }

    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

// ============================================
// Wire format
// ============================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiWorkspace {
    id: i64,
    name: String,
    permalink: Option<String>,
    #[serde(default)]
    sheets: Vec<ApiSheetRef>,
}

impl ApiWorkspace {
    fn into_info(self, fetched_at: DateTime<Utc>) -> WorkspaceInfo {
        WorkspaceInfo {
            id: self.id,
            name: self.name,
            permalink: self.permalink,
            sheet_count: self.sheets.len(),
            last_fetched: fetched_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSheetRef {
    id: i64,
    name: String,
    permalink: Option<String>,
    created_at: Option<DateTime<Utc>>,
    modified_at: Option<DateTime<Utc>>,
    access_level: Option<String>,
}

impl From<ApiSheetRef> for SheetInfo {
    fn from(sheet: ApiSheetRef) -> Self {
        SheetInfo {
            id: sheet.id,
            name: sheet.name,
            permalink: sheet.permalink,
            created_at: sheet.created_at,
            modified_at: sheet.modified_at,
            access_level: sheet.access_level,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSheet {
    id: i64,
    name: String,
    permalink: Option<String>,
    version: Option<i64>,
    #[serde(default)]
    total_row_count: u64,
    created_at: Option<DateTime<Utc>>,
    modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    columns: Vec<ApiColumn>,
    #[serde(default)]
    rows: Vec<ApiRow>,
}

impl ApiSheet {
    fn into_snapshot(self, synced_at: DateTime<Utc>) -> SheetSnapshot {
        SheetSnapshot {
            metadata: SheetMetadata {
                id: self.id,
                name: self.name,
                permalink: self.permalink,
                version: self.version,
                total_row_count: self.total_row_count,
                created_at: self.created_at,
                modified_at: self.modified_at,
                last_sync: Some(synced_at),
            },
            columns: self.columns.into_iter().map(Column::from).collect(),
            rows: self.rows.into_iter().map(Row::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiColumn {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(rename = "type")]
    column_type: Option<String>,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    index: u32,
    width: Option<u32>,
    #[serde(default)]
    locked: bool,
}

impl From<ApiColumn> for Column {
    fn from(column: ApiColumn) -> Self {
        Column {
            id: column.id,
            title: column.title,
            column_type: column.column_type,
            primary: column.primary,
            index: column.index,
            width: column.width,
            locked: column.locked,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiRow {
    id: i64,
    #[serde(default)]
    row_number: u32,
    parent_id: Option<i64>,
    version: Option<i64>,
    created_at: Option<DateTime<Utc>>,
    modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    cells: Vec<ApiCell>,
}

impl From<ApiRow> for Row {
    fn from(row: ApiRow) -> Self {
        Row {
            id: row.id,
            row_number: row.row_number,
            parent_id: row.parent_id,
            version: row.version,
            created_at: row.created_at,
            modified_at: row.modified_at,
            cells: row
                .cells
                .into_iter()
                .map(|cell| {
                    (
                        cell.column_id,
                        Cell {
                            value: cell.value,
                            display_value: cell.display_value,
                            formula: cell.formula,
                        },
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCell {
    column_id: i64,
    #[serde(default)]
    value: serde_json::Value,
    display_value: Option<String>,
    formula: Option<String>,
}
