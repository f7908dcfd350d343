//! Detection events: BAT folders, history tables, and the file backend.
//!
//! ARCHITECTURE
//! ============
//! Captured detections live in an external file backend, one folder per
//! event named `SERVER<n>_CLIENT<m>_<batId>`. This module wraps that
//! backend's HTTP API and derives the per-client history table from its
//! folder listing.
//!
//! DESIGN
//! ======
//! HTTP calls only fetch text. Decoding and table shaping are pure functions
//! so they can be tested against canned payloads.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use super::sensor::{self, SensorDisplay, SensorReadings};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Frequency shown for detections until the backend reports one.
pub const DEFAULT_FREQUENCY: &str = "120khz";

static FOLDER_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"SERVER(\d+)_CLIENT(\d+)_(\d+)"));

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FileBackendError {
    #[error("http client build failed: {0}")]
    HttpClientBuild(String),
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
    #[error("file backend request failed: {0}")]
    Request(String),
    #[error("file backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("file backend payload invalid: {0}")]
    Decode(String),
    #[error("file backend reported failure: {0}")]
    Unsuccessful(String),
}

impl crate::frame::ErrorCode for FileBackendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unsuccessful(_) => "E_DETECTION_NOT_FOUND",
            _ => "E_FILE_BACKEND",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Status { .. })
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
struct RawFolder {
    id: String,
    name: String,
    #[serde(rename = "modifiedDate")]
    modified_date: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FoldersResponse {
    success: bool,
    message: Option<String>,
    folders: Vec<RawFolder>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(rename = "downloadUrl")]
    pub download_url: String,
    #[serde(rename = "modifiedDate")]
    pub modified_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatFiles {
    pub spectrogram: Option<BatFile>,
    pub camera: Option<BatFile>,
    pub sensor: Option<BatFile>,
    pub audio: Option<BatFile>,
    pub other: Vec<BatFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilesResponse {
    success: bool,
    message: Option<String>,
    folder_name: Option<String>,
    files: Option<BatFiles>,
}

// =============================================================================
// FOLDERS
// =============================================================================

/// A detection folder whose name matched the station pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatFolder {
    pub id: String,
    pub name: String,
    pub modified_date: String,
    pub server_num: u32,
    pub client_num: u32,
    pub bat_id: String,
}

fn parse_folder(raw: RawFolder) -> Option<BatFolder> {
    let Ok(pattern) = FOLDER_PATTERN.as_ref() else {
        return None;
    };
    let captures = pattern.captures(&raw.name)?;
    let (Ok(server_num), Ok(client_num)) = (captures[1].parse::<u32>(), captures[2].parse::<u32>()) else {
        return None;
    };
    let bat_id = captures[3].to_string();
    Some(BatFolder { id: raw.id, name: raw.name, modified_date: raw.modified_date, server_num, client_num, bat_id })
}

/// Decode a folder listing, skipping names that do not match.
pub fn parse_folders(text: &str) -> Result<Vec<BatFolder>, FileBackendError> {
    let response: FoldersResponse =
        serde_json::from_str(text).map_err(|e| FileBackendError::Decode(e.to_string()))?;
    if !response.success {
        return Err(FileBackendError::Unsuccessful(response.message.unwrap_or_else(|| "folder listing".into())));
    }
    Ok(response.folders.into_iter().filter_map(parse_folder).collect())
}

pub fn parse_files(text: &str) -> Result<(Option<String>, BatFiles), FileBackendError> {
    let response: FilesResponse = serde_json::from_str(text).map_err(|e| FileBackendError::Decode(e.to_string()))?;
    match (response.success, response.files) {
        (true, Some(files)) => Ok((response.folder_name, files)),
        _ => Err(FileBackendError::Unsuccessful(response.message.unwrap_or_else(|| "no files".into()))),
    }
}

/// `"BAT825"` / `"bat825"` → `"825"`. Other ids pass through.
#[must_use]
pub fn clean_bat_id(bat_id: &str) -> &str {
    match bat_id.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bat") => &bat_id[3..],
        _ => bat_id,
    }
}

// =============================================================================
// HISTORY
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRow {
    pub bat_id: String,
    pub location: String,
    /// `DD/MM/YYYY`.
    pub date: String,
    pub frequency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    BatId,
    Location,
    Date,
    Frequency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryQuery {
    pub search: Option<String>,
    pub sort: Option<SortKey>,
    pub order: SortOrder,
    /// 1-based. Clamped into range.
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryPage {
    pub rows: Vec<HistoryRow>,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    /// Rows left after the search filter.
    pub matching: usize,
    pub total: usize,
}

/// `DD/MM/YYYY` from an RFC 3339 timestamp. Unparseable input is kept.
#[must_use]
pub fn display_date(modified: &str) -> String {
    match OffsetDateTime::parse(modified, &Rfc3339) {
        Ok(at) => format!("{:02}/{:02}/{}", at.day(), u8::from(at.month()), at.year()),
        Err(_) => modified.to_string(),
    }
}

/// History rows for one client, in listing order.
#[must_use]
pub fn history_rows(folders: &[BatFolder], server_num: u32, client_num: u32, location: &str) -> Vec<HistoryRow> {
    folders
        .iter()
        .filter(|folder| folder.server_num == server_num && folder.client_num == client_num)
        .map(|folder| HistoryRow {
            bat_id: folder.bat_id.clone(),
            location: location.to_string(),
            date: display_date(&folder.modified_date),
            frequency: DEFAULT_FREQUENCY.to_string(),
        })
        .collect()
}

fn frequency_value(raw: &str) -> f64 {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    digits.parse().unwrap_or(0.0)
}

/// `DD/MM/YYYY` → `YYYYMMDD` so dates order chronologically.
fn date_key(date: &str) -> String {
    let parts: Vec<&str> = date.split('/').collect();
    match parts.as_slice() {
        [day, month, year] => format!("{year}{month}{day}"),
        _ => date.to_lowercase(),
    }
}

fn compare(a: &HistoryRow, b: &HistoryRow, key: SortKey) -> Ordering {
    match key {
        SortKey::Frequency => frequency_value(&a.frequency).total_cmp(&frequency_value(&b.frequency)),
        SortKey::Date => date_key(&a.date).cmp(&date_key(&b.date)),
        SortKey::BatId => a.bat_id.to_lowercase().cmp(&b.bat_id.to_lowercase()),
        SortKey::Location => a.location.to_lowercase().cmp(&b.location.to_lowercase()),
    }
}

fn matches(row: &HistoryRow, needle: &str) -> bool {
    [&row.bat_id, &row.location, &row.date, &row.frequency]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
}

/// Filter, sort, and paginate history rows.
#[must_use]
pub fn query_history(rows: Vec<HistoryRow>, query: &HistoryQuery) -> HistoryPage {
    let total = rows.len();
    let needle = query.search.as_deref().map(str::trim).unwrap_or_default().to_lowercase();
    let mut rows: Vec<HistoryRow> =
        if needle.is_empty() { rows } else { rows.into_iter().filter(|row| matches(row, &needle)).collect() };

    if let Some(key) = query.sort {
        rows.sort_by(|a, b| {
            let ordering = compare(a, b, key);
            if query.order == SortOrder::Desc { ordering.reverse() } else { ordering }
        });
    }

    let page_size = query.page_size.max(1);
    let matching = rows.len();
    let total_pages = matching.div_ceil(page_size);
    let page = query.page.clamp(1, total_pages.max(1));
    let rows = rows.into_iter().skip((page - 1) * page_size).take(page_size).collect();

    HistoryPage { rows, page, page_size, total_pages, matching, total }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Files and parsed sensor readings for one detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionDetail {
    pub bat_id: String,
    pub folder_name: Option<String>,
    pub files: BatFiles,
    pub sensor: SensorReadings,
    pub sensor_display: SensorDisplay,
    /// Download link per artifact kind present in `files`.
    pub links: BTreeMap<String, String>,
}

#[derive(Clone)]
pub struct FileBackend {
    http: reqwest::Client,
    base_url: String,
}

impl FileBackend {
    pub fn new(base_url: &str) -> Result<Self, FileBackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| FileBackendError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_text(&self, url: reqwest::Url) -> Result<String, FileBackendError> {
        let response = self.http.get(url).send().await.map_err(|e| FileBackendError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| FileBackendError::Request(e.to_string()))?;
        if status != 200 {
            return Err(FileBackendError::Status { status, body });
        }
        Ok(body)
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<reqwest::Url, FileBackendError> {
        let raw = format!("{}{path}", self.base_url);
        let parsed = if query.is_empty() {
            reqwest::Url::parse(&raw)
        } else {
            reqwest::Url::parse_with_params(&raw, query)
        };
        parsed.map_err(|e| FileBackendError::InvalidUrl(e.to_string()))
    }

    /// Link to one artifact, with the file name as a query parameter.
    pub fn file_url(&self, file_id: &str, name: &str) -> Result<String, FileBackendError> {
        Ok(self.url(&format!("/file/{file_id}"), &[("name", name)])?.to_string())
    }

    pub async fn folders(&self) -> Result<Vec<BatFolder>, FileBackendError> {
        let text = self.get_text(self.url("/debug/folders", &[])?).await?;
        let folders = parse_folders(&text)?;
        info!(count = folders.len(), "detections: folders listed");
        Ok(folders)
    }

    pub async fn files(
        &self,
        bat_id: &str,
        server_num: u32,
        client_num: u32,
    ) -> Result<(Option<String>, BatFiles), FileBackendError> {
        let server = server_num.to_string();
        let client = client_num.to_string();
        let path = format!("/bat/{}/files", clean_bat_id(bat_id));
        let text = self.get_text(self.url(&path, &[("server", &server), ("client", &client)])?).await?;
        parse_files(&text)
    }

    pub async fn healthy(&self) -> bool {
        let url = match self.url("/health", &[]) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "detections: health url invalid");
                return false;
            }
        };
        match self.get_text(url).await {
            Ok(text) => match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(body) => body.get("success").and_then(serde_json::Value::as_bool).unwrap_or(false),
                Err(_) => false,
            },
            Err(err) => {
                warn!(error = %err, "detections: backend health check failed");
                false
            }
        }
    }

    /// Files plus sensor readings. A sensor file that cannot be read
    /// degrades to zero readings.
    pub async fn detail(
        &self,
        bat_id: &str,
        server_num: u32,
        client_num: u32,
    ) -> Result<DetectionDetail, FileBackendError> {
        let (folder_name, files) = self.files(bat_id, server_num, client_num).await?;
        let sensor = match &files.sensor {
            Some(file) => self.sensor_readings(file).await,
            None => SensorReadings::default(),
        };
        let links = self.links(&files);
        Ok(DetectionDetail {
            bat_id: clean_bat_id(bat_id).to_string(),
            folder_name,
            files,
            sensor,
            sensor_display: sensor.display(),
            links,
        })
    }

    fn links(&self, files: &BatFiles) -> BTreeMap<String, String> {
        let named = [
            ("spectrogram", &files.spectrogram),
            ("camera", &files.camera),
            ("sensor", &files.sensor),
            ("audio", &files.audio),
        ];
        let mut links = BTreeMap::new();
        for (kind, file) in named {
            let Some(file) = file else { continue };
            match self.file_url(&file.id, &file.name) {
                Ok(url) => {
                    links.insert(kind.to_string(), url);
                }
                Err(err) => warn!(file = %file.name, error = %err, "detections: no link for artifact"),
            }
        }
        links
    }

    async fn sensor_readings(&self, file: &BatFile) -> SensorReadings {
        let text = match self.url(&format!("/file/{}", file.id), &[("name", &file.name)]) {
            Ok(url) => self.get_text(url).await,
            Err(err) => Err(err),
        };
        match text {
            Ok(text) => sensor::parse(&text),
            Err(err) => {
                warn!(file = %file.name, error = %err, "detections: sensor file unreadable");
                SensorReadings::default()
            }
        }
    }
}

#[cfg(test)]
#[path = "detections_test.rs"]
mod tests;
