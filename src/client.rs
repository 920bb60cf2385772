use crate::tls::{Fingerprint, pinned_client_config};
use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid API URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("server returned {status}: {message}")]
    Status { status: StatusCode, message: String },
}

/// Access key identifier. The management API has sent both JSON strings and
/// numbers over time, so ids are normalised to strings on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for KeyId {
    fn from(value: &str) -> Self {
        Self(value.trim().to_string())
    }
}

impl From<String> for KeyId {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => KeyId(text),
            Raw::Number(number) => KeyId(number.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessKey {
    pub id: KeyId,
    pub name: String,
    pub used_bytes: u64,
    pub data_limit_bytes: Option<u64>,
    pub access_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyList {
    access_keys: Vec<WireKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireKey {
    id: KeyId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    access_url: Option<String>,
    #[serde(default)]
    data_limit: Option<DataLimit>,
}

#[derive(Debug, Deserialize)]
struct DataLimit {
    bytes: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferMetrics {
    #[serde(default)]
    bytes_transferred_by_user_id: HashMap<String, u64>,
}

impl WireKey {
    fn into_access_key(self, used_bytes: u64) -> AccessKey {
        AccessKey {
            id: self.id,
            name: self.name.unwrap_or_default(),
            used_bytes,
            data_limit_bytes: self.data_limit.map(|l| l.bytes),
            access_url: self.access_url.unwrap_or_default(),
        }
    }
}

/// Handle to an Outline server's management API.
#[derive(Debug, Clone)]
pub struct OutlineClient {
    base_url: Url,
    http: Client,
}

impl OutlineClient {
    /// Validates both values and prepares the HTTP client. No request is made
    /// until the first API call.
    pub fn new(api_url: &str, cert_sha256: &str) -> Result<Self> {
        let base_url = parse_api_url(api_url)?;
        let fingerprint = Fingerprint::parse(cert_sha256).context("parsing certificate SHA256")?;
        let tls = pinned_client_config(fingerprint).context("configuring TLS")?;
        let http = Client::builder()
            .use_preconfigured_tls(tls)
            .user_agent(HeaderValue::from_static("outline-keys/0.1"))
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("building HTTP client")?;

        Ok(Self { base_url, http })
    }

    /// All keys with their transfer totals.
    pub fn list_keys(&self) -> Result<Vec<AccessKey>> {
        let keys = self.fetch_key_list()?;
        let metrics: TransferMetrics = decode(
            self.send(Method::GET, &["metrics", "transfer"], |r| r)?,
            "transfer metrics",
        )?;

        Ok(keys
            .into_iter()
            .map(|key| {
                let used = metrics
                    .bytes_transferred_by_user_id
                    .get(key.id.as_str())
                    .copied()
                    .unwrap_or(0);
                key.into_access_key(used)
            })
            .collect())
    }

    /// Read-only existence check that skips the metrics call.
    pub fn contains_key(&self, id: &KeyId) -> Result<bool> {
        Ok(self.fetch_key_list()?.iter().any(|key| key.id == *id))
    }

    pub fn create_key(&self) -> Result<AccessKey> {
        let key: WireKey = decode(
            self.send(Method::POST, &["access-keys"], |r| r)?,
            "created access key",
        )?;
        Ok(key.into_access_key(0))
    }

    pub fn rename_key(&self, id: &KeyId, name: &str) -> Result<()> {
        self.send(Method::PUT, &["access-keys", id.as_str(), "name"], |r| {
            r.form(&[("name", name)])
        })?;
        Ok(())
    }

    pub fn delete_key(&self, id: &KeyId) -> Result<()> {
        self.send(Method::DELETE, &["access-keys", id.as_str()], |r| r)?;
        Ok(())
    }

    pub fn set_data_limit(&self, id: &KeyId, bytes: u64) -> Result<()> {
        let body = json!({ "limit": { "bytes": bytes } });
        self.send(
            Method::PUT,
            &["access-keys", id.as_str(), "data-limit"],
            |r| r.json(&body),
        )?;
        Ok(())
    }

    pub fn remove_data_limit(&self, id: &KeyId) -> Result<()> {
        self.send(
            Method::DELETE,
            &["access-keys", id.as_str(), "data-limit"],
            |r| r,
        )?;
        Ok(())
    }

    fn fetch_key_list(&self) -> Result<Vec<WireKey>> {
        let list: KeyList = decode(
            self.send(Method::GET, &["access-keys"], |r| r)?,
            "access key list",
        )?;
        Ok(list.access_keys)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // parse_api_url guarantees a base URL, so path_segments_mut cannot fail.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn send<F>(&self, method: Method, segments: &[&str], build: F) -> Result<Response>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        // The API URL embeds a secret prefix, so only the relative path is logged.
        let operation = format!("{} {}", method, segments.join("/"));
        log::debug!("sending {operation}");

        let request = self
            .http
            .request(method, self.endpoint(segments))
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        let response = build(request)
            .send()
            .map_err(|e| e.without_url())
            .with_context(|| format!("sending {operation}"))?;

        log::debug!("{operation} -> {}", response.status());
        check_status(response).with_context(|| operation.clone())
    }
}

fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    let text = response
        .text()
        .map_err(|e| e.without_url())
        .with_context(|| format!("reading {what}"))?;
    serde_json::from_str(&text).with_context(|| format!("decoding {what}"))
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .or_else(|| Some(body.trim().to_string()).filter(|b| !b.is_empty()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    Err(ApiError::Status { status, message }.into())
}

fn parse_api_url(raw: &str) -> Result<Url, ClientError> {
    let invalid = |reason: &str| ClientError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(invalid("scheme must be https"));
    }
    if url.host_str().is_none() || url.cannot_be_a_base() {
        return Err(invalid("missing host"));
    }
    Ok(url)
}
