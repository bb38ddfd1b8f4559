//! Google Sheets v4 REST client behind [`SheetService`].
//!
//! Only the handful of calls the entry form needs are implemented. The
//! bearer token is obtained from a [`TokenSource`] on every call, so an
//! external process may keep rotating it.

use async_trait::async_trait;
use log::warn;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::TokenSource;
use crate::error::{AppError, Result};
use crate::sheets::{SheetService, ValueInput, Worksheet, a1_range, quote_title};

/// Spreadsheet document opened by id
pub struct GoogleSheets {
    client: Client,
    api_base: String,
    spreadsheet_id: String,
    token: TokenSource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    #[serde(default)]
    sheet_id: i64,
    title: String,
    #[serde(default)]
    grid_properties: GridProperties,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GridProperties {
    #[serde(default)]
    row_count: u32,
    #[serde(default)]
    column_count: u32,
}

impl From<SheetProperties> for Worksheet {
    fn from(props: SheetProperties) -> Self {
        Worksheet {
            id: props.sheet_id,
            title: props.title,
            rows: props.grid_properties.row_count,
            cols: props.grid_properties.column_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BatchUpdateResponse {
    #[serde(default)]
    replies: Vec<BatchReply>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchReply {
    add_sheet: Option<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl GoogleSheets {
    pub fn new(api_base: &str, spreadsheet_id: &str, token: TokenSource) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("secure-entry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Remote(e.to_string()))?;
        Ok(GoogleSheets {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            token,
        })
    }

    fn document_url(&self) -> String {
        format!("{}/spreadsheets/{}", self.api_base, self.spreadsheet_id)
    }

    fn values_url(&self, range: &str, action: &str) -> String {
        format!(
            "{}/values/{}{}",
            self.document_url(),
            urlencoding::encode(range),
            action
        )
    }

    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self.token.token()?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Remote(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Remote(e.to_string()))?;

        if !status.is_success() {
            let message = api_error_message(status, &body);
            warn!("sheets api returned {}: {}", status, message);
            return Err(AppError::Remote(message));
        }

        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(body)
            .map_err(|e| AppError::Remote(format!("unexpected response: {e}")))
    }
}

fn api_error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(ApiErrorBody { error }) if !error.message.is_empty() => {
            if error.status.is_empty() {
                error.message
            } else {
                format!("{} ({})", error.message, error.status)
            }
        }
        _ => format!("HTTP {status}"),
    }
}

fn cell_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SheetService for GoogleSheets {
    async fn worksheets(&self) -> Result<Vec<Worksheet>> {
        let request = self
            .request(Method::GET, &self.document_url())?
            .query(&[(
                "fields",
                "sheets.properties(sheetId,title,gridProperties(rowCount,columnCount))",
            )]);
        let meta: SpreadsheetMeta = self.send(request).await?;
        Ok(meta
            .sheets
            .into_iter()
            .map(|entry| entry.properties.into())
            .collect())
    }

    async fn add_worksheet(&self, title: &str, rows: u32, cols: u32) -> Result<Worksheet> {
        let url = format!("{}:batchUpdate", self.document_url());
        let body = json!({
            "requests": [{
                "addSheet": {
                    "properties": {
                        "title": title,
                        "gridProperties": { "rowCount": rows, "columnCount": cols }
                    }
                }
            }]
        });
        let response: BatchUpdateResponse =
            self.send(self.request(Method::POST, &url)?.json(&body)).await?;

        response
            .replies
            .into_iter()
            .find_map(|reply| reply.add_sheet)
            .map(|entry| entry.properties.into())
            .ok_or_else(|| AppError::Remote("addSheet returned no sheet".to_string()))
    }

    async fn append_row(
        &self,
        ws: &Worksheet,
        values: &[String],
        input: ValueInput,
    ) -> Result<()> {
        let range = format!("{}!A1", quote_title(&ws.title));
        let url = self.values_url(&range, ":append");
        let request = self
            .request(Method::POST, &url)?
            .query(&[
                ("valueInputOption", input.as_str()),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": [values] }));
        let _: serde_json::Value = self.send(request).await?;
        Ok(())
    }

    async fn clear(&self, ws: &Worksheet) -> Result<()> {
        let url = self.values_url(&quote_title(&ws.title), ":clear");
        let request = self.request(Method::POST, &url)?.json(&json!({}));
        let _: serde_json::Value = self.send(request).await?;
        Ok(())
    }

    async fn update(
        &self,
        ws: &Worksheet,
        start: &str,
        values: &[Vec<String>],
        input: ValueInput,
    ) -> Result<()> {
        let width = values.iter().map(Vec::len).max().unwrap_or(0);
        let range = a1_range(&ws.title, start, values.len(), width)?;
        let url = self.values_url(&range, "");
        let request = self
            .request(Method::PUT, &url)?
            .query(&[("valueInputOption", input.as_str())])
            .json(&json!({
                "range": range,
                "majorDimension": "ROWS",
                "values": values,
            }));
        let _: serde_json::Value = self.send(request).await?;
        Ok(())
    }

    async fn get_all_values(&self, ws: &Worksheet) -> Result<Vec<Vec<String>>> {
        let url = self.values_url(&quote_title(&ws.title), "");
        let range: ValueRange = self.send(self.request(Method::GET, &url)?).await?;
        Ok(range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }
}
