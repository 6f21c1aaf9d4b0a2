// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use lovkit_core::{
    Choice, DataSource, FetchRequest, FetchResponse, LovPage, LovRecord, RecordSource,
};
use reqwest::StatusCode;
use reqwest::blocking::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone)]
pub struct Client {
    base_url: Url,
    source: String,
    timeout: Duration,
    http: HttpClient,
}

impl Client {
    pub fn new(base_url: &str, source: &str, timeout: Duration) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            bail!("remote.base_url must not be empty");
        }
        let base_url = Url::parse(trimmed)
            .with_context(|| format!("remote.base_url {trimmed:?} is not a valid URL"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            bail!(
                "remote.base_url {trimmed:?} must use http or https -- fix the scheme and retry"
            );
        }
        if base_url.cannot_be_a_base() {
            bail!("remote.base_url {trimmed:?} cannot carry a path -- use http://host[:port][/prefix]");
        }
        if source.trim().is_empty() {
            bail!("remote.source must not be empty");
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            base_url,
            source: source.trim().to_owned(),
            timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn endpoint(&self, records: bool) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| anyhow!("remote.base_url cannot carry a path"))?;
            segments.pop_if_empty().push("lov").push(&self.source);
            if records {
                segments.push("records");
            }
        }
        Ok(url)
    }

    pub fn fetch_choices(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let wire: WireChoices = self.post(self.endpoint(false)?, request)?;
        Ok(FetchResponse {
            values: wire.values.into_iter().map(WireChoice::into_choice).collect(),
            default_value: wire.default,
            more_available: wire.more,
        })
    }

    pub fn fetch_records(&self, request: &FetchRequest) -> Result<LovPage> {
        let wire: WireRecords = self.post(self.endpoint(true)?, request)?;
        Ok(LovPage {
            records: wire.records.into_iter().map(WireRecord::into_record).collect(),
            more_available: wire.more,
        })
    }

    pub fn ping(&self) -> Result<()> {
        let probe = FetchRequest {
            first_row: 1,
            max_rows: Some(1),
            ..FetchRequest::default()
        };
        self.fetch_choices(&probe).map(|_| ())
    }

    fn post<T: DeserializeOwned>(&self, url: Url, request: &FetchRequest) -> Result<T> {
        debug!(url = %url, first_row = request.first_row, "posting LOV request");
        let response = self
            .http
            .post(url.clone())
            .json(&WireRequest::from(request))
            .send()
            .map_err(|error| connection_error(self.base_url.as_str(), error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(clean_error_response(status, &body));
        }
        response
            .json()
            .with_context(|| format!("decode LOV response from {url}"))
    }
}

impl DataSource for Client {
    fn fetch(&mut self, request: &FetchRequest) -> Result<FetchResponse> {
        self.fetch_choices(request)
    }
}

impl RecordSource for Client {
    fn fetch_page(&mut self, request: &FetchRequest) -> Result<LovPage> {
        self.fetch_records(request)
    }
}

fn connection_error(base_url: &str, error: reqwest::Error) -> anyhow::Error {
    anyhow!(
        "cannot reach {} -- check remote.base_url and that the server is running ({})",
        base_url,
        error
    )
}

fn clean_error_response(status: StatusCode, body: &str) -> anyhow::Error {
    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(body)
        && let Some(error) = parsed.error
        && !error.message.is_empty()
    {
        return anyhow!("server error ({}): {}", status.as_u16(), error.message);
    }

    if let Ok(parsed) = serde_json::from_str::<FlatErrorEnvelope>(body)
        && let Some(error) = parsed.error
        && !error.is_empty()
    {
        return anyhow!("server error ({}): {}", status.as_u16(), error);
    }

    if body.len() < 100 && !body.contains('{') {
        return anyhow!("server error ({}): {}", status.as_u16(), body);
    }

    anyhow!("server returned {}", status.as_u16())
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    search: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sort: Option<WireSort<'a>>,
    first_row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_rows: Option<usize>,
    dependencies: BTreeMap<&'a str, &'a str>,
}

#[derive(Debug, Serialize)]
struct WireSort<'a> {
    column: &'a str,
    direction: &'static str,
}

impl<'a> From<&'a FetchRequest> for WireRequest<'a> {
    fn from(request: &'a FetchRequest) -> Self {
        Self {
            search: request.search_text.as_deref(),
            sort: request.sort.as_ref().map(|sort| WireSort {
                column: &sort.column,
                direction: sort.direction.as_str(),
            }),
            first_row: request.first_row.max(1),
            max_rows: request.max_rows,
            dependencies: request
                .dependencies
                .iter()
                .map(|dependency| (dependency.control.as_str(), dependency.value.as_str()))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChoices {
    #[serde(default)]
    values: Vec<WireChoice>,
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    more: bool,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    value: String,
    #[serde(default)]
    display: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    group: Option<String>,
}

impl WireChoice {
    fn into_choice(self) -> Choice {
        let display = self.display.unwrap_or_else(|| self.value.clone());
        let mut choice = Choice::new(self.value, display);
        choice.icon = self.icon;
        choice.group = self.group;
        choice
    }
}

#[derive(Debug, Deserialize)]
struct WireRecords {
    #[serde(default)]
    records: Vec<WireRecord>,
    #[serde(default)]
    more: bool,
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    value: String,
    #[serde(default)]
    display: Option<String>,
    #[serde(default)]
    cells: BTreeMap<String, serde_json::Value>,
}

impl WireRecord {
    fn into_record(self) -> LovRecord {
        let display = self.display.unwrap_or_else(|| self.value.clone());
        let mut record = LovRecord::new(self.value, display);
        for (column, value) in self.cells {
            let text = match value {
                serde_json::Value::Null => String::new(),
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            record.cells.insert(column, text);
        }
        record
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct FlatErrorEnvelope {
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{Client, StatusCode, WireRecord, WireRequest, clean_error_response};
    use anyhow::Result;
    use lovkit_core::{ControlId, Dependency, FetchRequest, SortDirection, SortSpec};
    use std::time::Duration;

    #[test]
    fn new_rejects_unusable_base_urls() {
        let timeout = Duration::from_secs(1);
        assert!(Client::new("", "emp", timeout).is_err());
        assert!(Client::new("not a url", "emp", timeout).is_err());
        assert!(Client::new("ftp://example.com", "emp", timeout).is_err());
        assert!(Client::new("http://example.com", " ", timeout).is_err());
    }

    #[test]
    fn endpoints_append_escaped_segments() -> Result<()> {
        let client = Client::new("http://example.com/api/", "emp list", Duration::from_secs(1))?;
        assert_eq!(
            client.endpoint(false)?.as_str(),
            "http://example.com/api/lov/emp%20list"
        );
        assert_eq!(
            client.endpoint(true)?.as_str(),
            "http://example.com/api/lov/emp%20list/records"
        );
        Ok(())
    }

    #[test]
    fn wire_request_flattens_sort_and_dependencies() -> Result<()> {
        let request = FetchRequest {
            search_text: Some("cl".to_owned()),
            sort: Some(SortSpec {
                column: "ENAME".to_owned(),
                direction: SortDirection::Desc,
            }),
            first_row: 0,
            max_rows: Some(25),
            dependencies: vec![Dependency {
                control: ControlId::from("P1_DEPT"),
                value: "10".to_owned(),
            }],
        };
        let json = serde_json::to_value(WireRequest::from(&request))?;
        assert_eq!(
            json,
            serde_json::json!({
                "search": "cl",
                "sort": { "column": "ENAME", "direction": "desc" },
                "first_row": 1,
                "max_rows": 25,
                "dependencies": { "P1_DEPT": "10" }
            })
        );
        Ok(())
    }

    #[test]
    fn record_cells_render_scalars_as_text() -> Result<()> {
        let wire: WireRecord = serde_json::from_str(
            r#"{"value":"7839","cells":{"SAL":5000,"COMM":null,"ENAME":"KING"}}"#,
        )?;
        let record = wire.into_record();
        assert_eq!(record.display_value, "7839");
        assert_eq!(record.cell("SAL"), Some("5000"));
        assert_eq!(record.cell("COMM"), Some(""));
        assert_eq!(record.cell("ENAME"), Some("KING"));
        Ok(())
    }

    #[test]
    fn error_bodies_are_cleaned() {
        let nested = clean_error_response(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"unknown source"}}"#,
        );
        assert_eq!(nested.to_string(), "server error (400): unknown source");
        let flat = clean_error_response(StatusCode::NOT_FOUND, r#"{"error":"no such LOV"}"#);
        assert_eq!(flat.to_string(), "server error (404): no such LOV");
        let html = clean_error_response(StatusCode::BAD_GATEWAY, &"{<html>".repeat(40));
        assert_eq!(html.to_string(), "server returned 502");
    }
}
