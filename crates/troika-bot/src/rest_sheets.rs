//! Blocking Sheets REST client.
//!
//! Implements the gateway's [`SheetsApi`] over the spreadsheet vendor's
//! REST surface with a blocking `reqwest` client. Every method runs on
//! the gateway's worker pool, never on the async scheduler.
//!
//! Token acquisition is behind [`TokenSource`]; the shipped
//! [`MetadataTokenSource`] asks the platform metadata server, which is
//! how the deployed environment exposes the service account validated at
//! startup. The JWT key-exchange flow stays outside this process.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::debug;

use troika_sheets::{ApiError, CellUpdate, Color, Row, SheetsApi};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// Supplies short-lived bearer tokens for sheet RPCs.
pub(crate) trait TokenSource: Send + Sync {
    /// A currently valid token.
    fn token(&self) -> Result<String, ApiError>;
}

/// Token source backed by the platform metadata server.
pub(crate) struct MetadataTokenSource {
    client: reqwest::blocking::Client,
    cached: Mutex<Option<(String, Instant)>>,
}

impl MetadataTokenSource {
    /// A source with its own blocking client.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            cached: Mutex::new(None),
        }
    }
}

impl Default for MetadataTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSource for MetadataTokenSource {
    fn token(&self) -> Result<String, ApiError> {
        if let Ok(guard) = self.cached.lock() {
            if let Some((token, expires_at)) = guard.as_ref() {
                if Instant::now() < *expires_at {
                    return Ok(token.clone());
                }
            }
        }

        let response = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(10))
            .send()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::Auth(format!(
                "metadata token endpoint returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .map_err(|e| ApiError::Invalid(e.to_string()))?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Auth("metadata response without access_token".to_string()))?
            .to_string();
        let expires_in = body
            .get("expires_in")
            .and_then(Value::as_u64)
            .unwrap_or(300);

        let expires_at = Instant::now()
            .checked_add(Duration::from_secs(expires_in).saturating_sub(TOKEN_EXPIRY_SLACK))
            .unwrap_or_else(Instant::now);
        if let Ok(mut guard) = self.cached.lock() {
            *guard = Some((token.clone(), expires_at));
        }
        Ok(token)
    }
}

/// Blocking REST implementation of [`SheetsApi`] for one document.
pub(crate) struct RestSheets {
    client: reqwest::blocking::Client,
    document_id: String,
    tokens: std::sync::Arc<dyn TokenSource>,
    base_url: String,
}

impl RestSheets {
    /// Client for one spreadsheet document.
    #[must_use]
    pub(crate) fn new(document_id: &str, tokens: std::sync::Arc<dyn TokenSource>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            document_id: document_id.to_string(),
            tokens,
            base_url: "https://sheets.googleapis.com/v4/spreadsheets".to_string(),
        }
    }

    /// Override the endpoint (tests, proxies).
    #[must_use]
    pub(crate) fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn call(
        &self,
        method: reqwest::Method,
        path_and_query: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let token = self.tokens.token()?;
        let url = format!("{}/{}{}", self.base_url, self.document_id, path_and_query);
        debug!(%url, "sheet rpc");

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(token)
            .timeout(Duration::from_secs(30));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status();
        let payload: Value = response.json().unwrap_or(Value::Null);

        match status.as_u16() {
            200..=299 => Ok(payload),
            401 | 403 => Err(ApiError::Auth(format!("HTTP {status}"))),
            404 => Err(ApiError::NotFound(format!("HTTP {status}"))),
            429 => Err(ApiError::RateLimited),
            500..=599 => Err(ApiError::Server(format!("HTTP {status}"))),
            _ => Err(ApiError::Invalid(format!("HTTP {status}: {payload}"))),
        }
    }

    fn numeric_sheet_id(&self, sheet: &str) -> Result<i64, ApiError> {
        let meta = self.call(
            reqwest::Method::GET,
            "?fields=sheets.properties",
            None,
        )?;
        meta.get("sheets")
            .and_then(Value::as_array)
            .and_then(|sheets| {
                sheets.iter().find_map(|s| {
                    let props = s.get("properties")?;
                    (props.get("title")?.as_str()? == sheet)
                        .then(|| props.get("sheetId")?.as_i64())
                        .flatten()
                })
            })
            .ok_or_else(|| ApiError::NotFound(format!("worksheet {sheet}")))
    }
}

/// `1 → A`, `27 → AA`.
fn column_letter(col: u32) -> String {
    let mut col = col;
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col.saturating_sub(1)) % 26;
        letters.push(char::from_u32(('A' as u32).saturating_add(rem)).unwrap_or('A'));
        col = col.saturating_sub(1) / 26;
    }
    letters.iter().rev().collect()
}

fn cell_range(sheet: &str, row: u32, col: u32) -> String {
    let letter = column_letter(col);
    format!("{sheet}!{letter}{row}")
}

fn values_of(payload: &Value) -> Vec<Vec<String>> {
    payload
        .get("values")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| {
                            cells
                                .iter()
                                .map(|c| c.as_str().unwrap_or_default().to_string())
                                .collect()
                        })
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

#[allow(clippy::cast_possible_truncation)]
impl SheetsApi for RestSheets {
    fn list_rows(&self, sheet: &str) -> Result<Vec<Row>, ApiError> {
        let payload = self.call(
            reqwest::Method::GET,
            &format!("/values/{sheet}"),
            None,
        )?;
        Ok(values_of(&payload)
            .into_iter()
            .enumerate()
            .map(|(i, cells)| Row {
                index: (i as u32).saturating_add(1),
                cells,
            })
            .collect())
    }

    fn read_cell(&self, sheet: &str, row: u32, col: u32) -> Result<String, ApiError> {
        let payload = self.call(
            reqwest::Method::GET,
            &format!("/values/{}", cell_range(sheet, row, col)),
            None,
        )?;
        Ok(values_of(&payload)
            .first()
            .and_then(|r| r.first())
            .cloned()
            .unwrap_or_default())
    }

    fn write_cell(&self, sheet: &str, row: u32, col: u32, value: &str) -> Result<(), ApiError> {
        self.call(
            reqwest::Method::PUT,
            &format!(
                "/values/{}?valueInputOption=RAW",
                cell_range(sheet, row, col)
            ),
            Some(json!({"values": [[value]]})),
        )?;
        Ok(())
    }

    fn batch_update(&self, sheet: &str, updates: &[CellUpdate]) -> Result<(), ApiError> {
        let data: Vec<Value> = updates
            .iter()
            .map(|u| {
                json!({
                    "range": cell_range(sheet, u.row, u.col),
                    "values": [[u.value]],
                })
            })
            .collect();
        self.call(
            reqwest::Method::POST,
            "/values:batchUpdate",
            Some(json!({"valueInputOption": "RAW", "data": data})),
        )?;
        Ok(())
    }

    fn append_row(&self, sheet: &str, values: &[String]) -> Result<u32, ApiError> {
        let payload = self.call(
            reqwest::Method::POST,
            &format!("/values/{sheet}:append?valueInputOption=RAW&insertDataOption=INSERT_ROWS"),
            Some(json!({"values": [values]})),
        )?;

        // "updatedRange" comes back as `Sheet!A42:H42`.
        let row = payload
            .get("updates")
            .and_then(|u| u.get("updatedRange"))
            .and_then(Value::as_str)
            .and_then(parse_range_row)
            .ok_or_else(|| ApiError::Invalid("append response without range".to_string()))?;
        Ok(row)
    }

    fn format_cell(
        &self,
        sheet: &str,
        row: u32,
        col: u32,
        color: Option<Color>,
    ) -> Result<(), ApiError> {
        let sheet_id = self.numeric_sheet_id(sheet)?;
        let background = color.map_or_else(
            || json!({"red": 1.0, "green": 1.0, "blue": 1.0}),
            |c| {
                json!({
                    "red": f64::from(c.red) / 255.0,
                    "green": f64::from(c.green) / 255.0,
                    "blue": f64::from(c.blue) / 255.0,
                })
            },
        );
        let request = json!({
            "requests": [{
                "repeatCell": {
                    "range": {
                        "sheetId": sheet_id,
                        "startRowIndex": row.saturating_sub(1),
                        "endRowIndex": row,
                        "startColumnIndex": col.saturating_sub(1),
                        "endColumnIndex": col,
                    },
                    "cell": {"userEnteredFormat": {"backgroundColor": background}},
                    "fields": "userEnteredFormat.backgroundColor",
                }
            }]
        });
        self.call(reqwest::Method::POST, ":batchUpdate", Some(request))?;
        Ok(())
    }
}

fn parse_range_row(range: &str) -> Option<u32> {
    let after_bang = range.rsplit('!').next()?;
    let first_cell = after_bang.split(':').next()?;
    let digits: String = first_cell.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(8), "H");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(52), "AZ");
    }

    #[test]
    fn cell_ranges() {
        assert_eq!(cell_range("Appeals", 2, 7), "Appeals!G2");
        assert_eq!(cell_range("Partners", 10, 1), "Partners!A10");
    }

    #[test]
    fn parses_append_range() {
        assert_eq!(parse_range_row("Appeals!A42:H42"), Some(42));
        assert_eq!(parse_range_row("Sheet name!B7"), Some(7));
        assert_eq!(parse_range_row("garbage"), None);
    }

    #[test]
    fn values_extraction_tolerates_ragged_rows() {
        let payload = json!({
            "values": [["a", "b"], ["c"]]
        });
        let values = values_of(&payload);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], vec!["a", "b"]);
        assert_eq!(values[1], vec!["c"]);

        assert!(values_of(&json!({})).is_empty());
    }
}
