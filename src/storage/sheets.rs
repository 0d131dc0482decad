//! Google Sheets storage gateway over the values REST API.
//!
//! One tab per mode. A tab missing from the spreadsheet is created with
//! `addSheet` and given a header row before its first use. Appends use
//! `values:append` with `INSERT_ROWS`, reads fetch the whole `A:I` range and
//! skip the header. The bearer token is provided by the environment;
//! refreshing it is out of scope here.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::mode::Mode;
use crate::storage::{EntryFilter, HourEntry, RowRef, SHEET_COLUMNS, StorageGateway};

const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";
const LAST_COLUMN: &str = "I";

/// Spreadsheet location and credentials.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub access_token: SecretString,
    pub production_tab: String,
    pub test_tab: String,
    /// API base URL override (tests, proxies).
    pub base_url: Option<String>,
}

impl SheetsConfig {
    pub fn tab_for(&self, mode: Mode) -> &str {
        match mode {
            Mode::Production => &self.production_tab,
            Mode::Test => &self.test_tab,
        }
    }
}

pub struct SheetsGateway {
    client: reqwest::Client,
    config: SheetsConfig,
    base_url: String,
    /// Tabs verified to exist with a header row this run.
    tabs_ready: Mutex<HashSet<String>>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_range: Option<String>,
}

impl SheetsGateway {
    pub fn new(config: SheetsConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            client: reqwest::Client::new(),
            config,
            base_url,
            tabs_ready: Mutex::new(HashSet::new()),
        }
    }

    fn base(&self) -> Result<Url, StorageError> {
        Url::parse(&self.base_url)
            .map_err(|e| StorageError::Rejected(format!("invalid sheets base URL: {e}")))
    }

    /// `{base}/v4/spreadsheets/{id}{suffix}`.
    fn spreadsheet_url(&self, suffix: &str) -> Result<Url, StorageError> {
        let mut url = self.base()?;
        url.path_segments_mut()
            .map_err(|_| StorageError::Rejected("sheets base URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets"])
            .push(&format!("{}{suffix}", self.config.spreadsheet_id));
        Ok(url)
    }

    /// `{base}/v4/spreadsheets/{id}/values/{range}{suffix}` with the range
    /// percent-encoded as a single path segment.
    fn values_url(&self, range: &str, suffix: &str) -> Result<Url, StorageError> {
        let mut url = self.base()?;
        url.path_segments_mut()
            .map_err(|_| StorageError::Rejected("sheets base URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.config.spreadsheet_id.as_str(), "values"])
            .push(&format!("{range}{suffix}"));
        Ok(url)
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, StorageError> {
        let url = self.values_url(range, "")?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(self.config.access_token.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_status(resp).await?;
        let body: ValueRange = resp.json().await.map_err(transport_error)?;
        Ok(body.values)
    }

    /// Titles of every tab in the spreadsheet.
    async fn tab_titles(&self) -> Result<Vec<String>, StorageError> {
        let mut url = self.spreadsheet_url("")?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");
        let resp = self
            .client
            .get(url)
            .bearer_auth(self.config.access_token.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_status(resp).await?;
        let body: SpreadsheetMeta = resp.json().await.map_err(transport_error)?;
        Ok(body
            .sheets
            .into_iter()
            .map(|sheet| sheet.properties.title)
            .collect())
    }

    async fn add_tab(&self, tab: &str) -> Result<(), StorageError> {
        let url = self.spreadsheet_url(":batchUpdate")?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&add_sheet_request(tab))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn write_header(&self, tab: &str) -> Result<(), StorageError> {
        let mut url = self.values_url(&header_range(tab), "")?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let resp = self
            .client
            .put(url)
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&serde_json::json!({ "values": [SHEET_COLUMNS] }))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(resp).await?;
        Ok(())
    }

    /// Make sure `tab` exists and starts with the header row, once per tab
    /// per run.
    async fn ensure_tab(&self, tab: &str) -> Result<(), StorageError> {
        let mut ready = self.tabs_ready.lock().await;
        if ready.contains(tab) {
            return Ok(());
        }

        if self.tab_titles().await?.iter().any(|title| title == tab) {
            let existing = self.get_values(&header_range(tab)).await?;
            if existing.first().is_none_or(|row| row.is_empty()) {
                self.write_header(tab).await?;
                info!(tab, "Wrote header row to empty sheet");
            }
        } else {
            self.add_tab(tab).await?;
            self.write_header(tab).await?;
            info!(tab, "Created sheet with header row");
        }

        ready.insert(tab.to_string());
        Ok(())
    }
}

fn header_range(tab: &str) -> String {
    format!("{tab}!A1:{LAST_COLUMN}1")
}

/// `batchUpdate` body that adds a tab named `tab`.
fn add_sheet_request(tab: &str) -> serde_json::Value {
    serde_json::json!({
        "requests": [{
            "addSheet": {
                "properties": { "title": tab }
            }
        }]
    })
}

#[async_trait]
impl StorageGateway for SheetsGateway {
    fn name(&self) -> &str {
        "google_sheets"
    }

    async fn append(&self, entry: &HourEntry, mode: Mode) -> Result<RowRef, StorageError> {
        let tab = self.config.tab_for(mode);
        self.ensure_tab(tab).await?;

        let mut url = self.values_url(&format!("{tab}!A:{LAST_COLUMN}"), ":append")?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let resp = self
            .client
            .post(url)
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&serde_json::json!({ "values": [entry.to_row()] }))
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_status(resp).await?;
        let body: AppendResponse = resp.json().await.map_err(transport_error)?;

        let range = body
            .updates
            .and_then(|u| u.updated_range)
            .unwrap_or_else(|| format!("{tab}!?"));
        debug!(tab, range = %range, request_id = %entry.request_id, "Appended hour entry");

        Ok(RowRef {
            target: tab.to_string(),
            range,
        })
    }

    async fn query(
        &self,
        filter: &EntryFilter,
        mode: Mode,
    ) -> Result<Vec<HourEntry>, StorageError> {
        let tab = self.config.tab_for(mode);
        self.ensure_tab(tab).await?;
        let rows = self
            .get_values(&format!("{tab}!A:{LAST_COLUMN}"))
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| HourEntry::from_row(row))
            .filter(|entry| filter.matches(entry))
            .collect())
    }
}

fn transport_error(e: reqwest::Error) -> StorageError {
    StorageError::TransportFailure(e.to_string())
}

/// 429 and 5xx are transient; any other non-success status is a rejection.
fn classify_status(status: StatusCode, body: &str) -> StorageError {
    let detail = format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StorageError::TransportFailure(detail)
    } else {
        StorageError::Rejected(detail)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fake_http::{self, Seen};

    fn gateway(base_url: Option<&str>) -> SheetsGateway {
        SheetsGateway::new(SheetsConfig {
            spreadsheet_id: "sheet-123".into(),
            access_token: SecretString::from("token"),
            production_tab: "WorkHours".into(),
            test_tab: "WorkHours_Test".into(),
            base_url: base_url.map(str::to_string),
        })
    }

    #[test]
    fn tabs_follow_mode() {
        let gw = gateway(None);
        assert_eq!(gw.config.tab_for(Mode::Test), "WorkHours_Test");
        assert_eq!(gw.config.tab_for(Mode::Production), "WorkHours");
    }

    #[test]
    fn append_url_shape() {
        let gw = gateway(None);
        let url = gw.values_url("WorkHours!A:I", ":append").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-123/values/WorkHours!A:I:append"
        );
    }

    #[test]
    fn tab_names_with_spaces_are_encoded() {
        let gw = gateway(Some("http://localhost:9999/"));
        let url = gw.values_url("Work Hours!A1:I1", "").unwrap();
        assert!(url.as_str().starts_with("http://localhost:9999/v4/"));
        assert!(url.as_str().ends_with("/values/Work%20Hours!A1:I1"));
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        let rejected = classify_status(StatusCode::FORBIDDEN, "no access");
        assert!(!rejected.is_transient());
        assert!(rejected.to_string().contains("no access"));
    }

    #[test]
    fn append_response_range() {
        let body: AppendResponse = serde_json::from_str(
            r#"{"spreadsheetId": "x", "updates": {"updatedRange": "WorkHours!A7:I7", "updatedRows": 1}}"#,
        )
        .unwrap();
        assert_eq!(
            body.updates.and_then(|u| u.updated_range).as_deref(),
            Some("WorkHours!A7:I7")
        );
    }

    #[test]
    fn empty_value_range_parses() {
        let body: ValueRange = serde_json::from_str(r#"{"range": "WorkHours!A1:I1"}"#).unwrap();
        assert!(body.values.is_empty());
    }

    #[test]
    fn batch_update_url_and_add_sheet_body() {
        let gw = gateway(None);
        assert_eq!(
            gw.spreadsheet_url(":batchUpdate").unwrap().as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-123:batchUpdate"
        );
        assert_eq!(
            add_sheet_request("WorkHours_Test"),
            serde_json::json!({
                "requests": [{ "addSheet": { "properties": { "title": "WorkHours_Test" } } }]
            })
        );
    }

    #[test]
    fn spreadsheet_meta_titles() {
        let body: SpreadsheetMeta = serde_json::from_str(
            r#"{"sheets": [{"properties": {"title": "WorkHours", "sheetId": 0}}]}"#,
        )
        .unwrap();
        assert_eq!(body.sheets[0].properties.title, "WorkHours");
    }

    // ── Fake Sheets endpoint ────────────────────────────────────────

    /// Canned Sheets responses for a spreadsheet holding `tabs`, each empty.
    async fn fake_sheets(tabs: &[&str]) -> (String, Seen) {
        let titles: Vec<serde_json::Value> = tabs
            .iter()
            .map(|t| serde_json::json!({ "properties": { "title": t } }))
            .collect();
        fake_http::serve(move |req| {
            if req.target.contains(":append") {
                serde_json::json!({ "updates": { "updatedRange": "WorkHours_Test!A2:I2" } })
            } else if req.method == "GET" && req.target.contains("fields=") {
                serde_json::json!({ "sheets": titles })
            } else {
                serde_json::json!({})
            }
        })
        .await
    }

    fn sample() -> HourEntry {
        crate::storage::sample_entry(
            "42",
            chrono::NaiveDate::from_ymd_opt(2025, 3, 26).unwrap(),
            rust_decimal_macros::dec!(3),
        )
    }

    #[tokio::test]
    async fn missing_tab_is_created_before_first_append() {
        let (base, seen) = fake_sheets(&["WorkHours"]).await;
        let gw = gateway(Some(&base));

        let row = gw.append(&sample(), Mode::Test).await.unwrap();
        assert_eq!(row.target, "WorkHours_Test");
        assert_eq!(row.range, "WorkHours_Test!A2:I2");

        let requests = seen.lock().unwrap().clone();
        let calls: Vec<(&str, &str)> = requests
            .iter()
            .map(|r| (r.method.as_str(), r.target.as_str()))
            .collect();
        assert_eq!(calls.len(), 4, "{calls:?}");
        assert_eq!(calls[0].0, "GET");
        assert!(calls[0].1.starts_with("/v4/spreadsheets/sheet-123?fields="));
        assert_eq!(calls[1], ("POST", "/v4/spreadsheets/sheet-123:batchUpdate"));
        assert_eq!(requests[1].body, add_sheet_request("WorkHours_Test"));
        assert_eq!(calls[2].0, "PUT");
        assert!(calls[2].1.contains("/values/WorkHours_Test!A1:I1"));
        assert_eq!(requests[2].body["values"][0][0], SHEET_COLUMNS[0]);
        assert_eq!(calls[3].0, "POST");
        assert!(calls[3].1.contains("WorkHours_Test!A:I:append"));

        // The tab is only checked once per run.
        gw.append(&sample(), Mode::Test).await.unwrap();
        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 5);
        assert!(requests[4].target.contains(":append"));
    }

    #[tokio::test]
    async fn existing_empty_tab_only_gets_a_header() {
        let (base, seen) = fake_sheets(&["WorkHours", "WorkHours_Test"]).await;
        let gw = gateway(Some(&base));

        gw.append(&sample(), Mode::Production).await.unwrap();

        let requests = seen.lock().unwrap();
        assert!(!requests.iter().any(|r| r.target.contains(":batchUpdate")));
        let methods: Vec<&str> = requests.iter().map(|r| r.method.as_str()).collect();
        // metadata, header read, header write, append
        assert_eq!(methods, vec!["GET", "GET", "PUT", "POST"]);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_failure() {
        let gw = gateway(Some("http://127.0.0.1:1"));
        let err = gw
            .query(&EntryFilter::default(), Mode::Test)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
