use crate::config::connection::ConnectionSettings;
use crate::connect::{ClientFactory, Credentials};
use crate::domain::ports::TabularProvider;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

pub const DEFAULT_SHEETS_ENDPOINT: &str = "https://sheets.googleapis.com";
const SERVICE: &str = "google-sheets";

/// Builds an authorised Sheets API client from a bearer token secret (`access_token`).
#[derive(Debug, Clone, Default)]
pub struct GoogleSheetsConnector;

#[async_trait]
impl ClientFactory for GoogleSheetsConnector {
    type Client = SheetsClient;

    fn service_name(&self) -> &str {
        SERVICE
    }

    async fn build(
        &self,
        settings: &ConnectionSettings,
        credentials: Credentials,
    ) -> Result<SheetsClient> {
        let endpoint = settings.primary_endpoint().unwrap_or(DEFAULT_SHEETS_ENDPOINT);
        let base_url = Url::parse(endpoint).map_err(|e| EtlError::ConnectivityError {
            service: SERVICE.to_string(),
            message: format!("Invalid endpoint '{}': {}", endpoint, e),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(EtlError::ConnectivityError {
                service: SERVICE.to_string(),
                message: format!("Endpoint '{}' cannot be used as a base URL", endpoint),
            });
        }

        let token = match credentials {
            Credentials::Static(secrets) => secrets
                .get("access_token")
                .map(str::to_string)
                .ok_or_else(|| EtlError::AuthenticationError {
                    service: SERVICE.to_string(),
                    message: "Secret 'access_token' was not resolved".to_string(),
                })?,
            Credentials::Profile(profile) => {
                return Err(EtlError::AuthenticationError {
                    service: SERVICE.to_string(),
                    message: format!("Profile '{}' is not supported, use secrets", profile),
                })
            }
            Credentials::Ambient => {
                return Err(EtlError::AuthenticationError {
                    service: SERVICE.to_string(),
                    message: "No access token configured".to_string(),
                })
            }
        };

        let mut auth_value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            EtlError::AuthenticationError {
                service: SERVICE.to_string(),
                message: "Access token contains invalid header characters".to_string(),
            }
        })?;
        auth_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth_value);

        let http = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| EtlError::ConnectivityError {
                service: SERVICE.to_string(),
                message: e.to_string(),
            })?;

        tracing::debug!("Sheets API base URL: {}", base_url);
        Ok(SheetsClient { http, base_url })
    }
}

#[derive(Debug, Clone)]
pub struct SheetsClient {
    http: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl SheetsClient {
    fn values_url(&self, workbook: &str, sheet: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| EtlError::ConnectivityError {
                service: SERVICE.to_string(),
                message: "Endpoint cannot be used as a base URL".to_string(),
            })?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", workbook, "values", sheet]);
        url.query_pairs_mut()
            .append_pair("majorDimension", "ROWS")
            .append_pair("valueRenderOption", "FORMATTED_VALUE");
        Ok(url)
    }

    /// 讀取整張工作表的儲存格 (以顯示格式的字串回傳)
    pub async fn get_values(&self, workbook: &str, sheet: &str) -> Result<Vec<Vec<String>>> {
        let url = self.values_url(workbook, sheet)?;
        tracing::debug!("Fetching sheet values: {}", url);

        let response = self.http.get(url).send().await?;
        let status = response.status();
        tracing::debug!("Sheets API response status: {}", status);

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(EtlError::AuthenticationError {
                service: SERVICE.to_string(),
                message: format!("Sheets API rejected the token ({})", status),
            });
        }
        if !status.is_success() {
            return Err(EtlError::ConnectivityError {
                service: SERVICE.to_string(),
                message: format!("Sheets API returned {} for {}/{}", status, workbook, sheet),
            });
        }

        let body: ValueRange = response.json().await?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Spreadsheet id from either a bare id or a workbook URL such as
/// `https://docs.google.com/spreadsheets/d/{id}/edit`.
pub fn workbook_id(workbook: &str) -> &str {
    let workbook = workbook.trim();
    match workbook.split_once("/spreadsheets/d/") {
        Some((_, rest)) => rest.split(['/', '?', '#']).next().unwrap_or(rest),
        None => workbook,
    }
}

/// One worksheet of a workbook, readable as a tabular grid.
#[derive(Debug, Clone)]
pub struct SheetsWorksheet {
    client: Arc<SheetsClient>,
    workbook: String,
    sheet: String,
}

impl SheetsWorksheet {
    pub fn new(client: Arc<SheetsClient>, workbook: impl Into<String>, sheet: impl Into<String>) -> Self {
        let workbook: String = workbook.into();
        Self {
            client,
            workbook: workbook_id(&workbook).to_string(),
            sheet: sheet.into(),
        }
    }
}

#[async_trait]
impl TabularProvider for SheetsWorksheet {
    fn describe(&self) -> String {
        format!("google sheet {}/{}", self.workbook, self.sheet)
    }

    async fn read_grid(&self) -> Result<Vec<Vec<String>>> {
        self.client.get_values(&self.workbook, &self.sheet).await
    }
}
