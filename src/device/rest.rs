//! REST implementation of [`DeviceControl`] for Ultimate64-class firmware.
//!
//! Endpoint shapes follow the device's HTTP API: machine actions live under
//! `/v1/machine:<action>`, configuration under `/v1/configs`. Memory reads
//! return raw bytes; memory writes send raw bytes with the target address in
//! the query string.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;

use crate::device::client::DeviceControl;
use crate::device::error::DeviceError;

/// HTTP client for one device.
#[derive(Debug, Clone)]
pub struct RestDevice {
    client: Client,
    base_url: String,
    password: Option<String>,
}

impl RestDevice {
    /// Create a client for a device at `host` (hostname or IP, optional `:port`).
    pub fn new(host: &str, password: Option<String>) -> Self {
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host.trim_end_matches('/'))
        };
        Self {
            client: Client::new(),
            base_url,
            password,
        }
    }

    /// Like [`RestDevice::new`], with a per-request timeout. Falls back to
    /// the default client if the builder fails.
    pub fn with_timeout(host: &str, password: Option<String>, timeout: std::time::Duration) -> Self {
        let mut device = Self::new(host, password);
        match Client::builder().timeout(timeout).build() {
            Ok(client) => device.client = client,
            Err(e) => tracing::warn!(error = %e, "HTTP client build failed, using defaults"),
        }
        device
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(password) = &self.password {
            builder = builder.header("X-Password", password);
        }
        builder
    }

    /// Map non-success statuses to `DeviceError::Status` with the body text
    /// as the message (the firmware reports errors as plain text or JSON).
    async fn check(response: Response) -> Result<Response, DeviceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(DeviceError::Status {
            status: status.as_u16(),
            message: if message.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                message
            },
        })
    }

    async fn put_action(&self, path: &str) -> Result<(), DeviceError> {
        let response = self.request(Method::PUT, path).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn get_json(&self, path: &str) -> Result<Value, DeviceError> {
        let response = self.request(Method::GET, path).send().await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl DeviceControl for RestDevice {
    async fn pause(&self) -> Result<(), DeviceError> {
        self.put_action("/v1/machine:pause").await
    }

    async fn resume(&self) -> Result<(), DeviceError> {
        self.put_action("/v1/machine:resume").await
    }

    async fn read_memory(&self, address: u16, length: usize) -> Result<Vec<u8>, DeviceError> {
        let path = format!(
            "/v1/machine:readmem?address={:04X}&length={}",
            address, length
        );
        let response = self.request(Method::GET, &path).send().await?;
        let response = Self::check(response).await?;
        let bytes = response.bytes().await?.to_vec();
        if bytes.len() != length {
            return Err(DeviceError::InvalidResponse(format!(
                "readmem returned {} bytes, expected {}",
                bytes.len(),
                length
            )));
        }
        Ok(bytes)
    }

    async fn write_memory(&self, address: u16, bytes: &[u8]) -> Result<(), DeviceError> {
        let path = format!("/v1/machine:writemem?address={:04X}", address);
        let response = self
            .request(Method::PUT, &path)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn configs_list(&self) -> Result<Vec<String>, DeviceError> {
        let doc = self.get_json("/v1/configs").await?;
        // The firmware wraps the list: {"categories": ["U64 Specific Settings", ...]}
        let categories = doc
            .get("categories")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                DeviceError::InvalidResponse("configs list missing 'categories' array".into())
            })?;
        Ok(categories
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    async fn config_get(&self, category: &str) -> Result<Value, DeviceError> {
        self.get_json(&format!("/v1/configs/{}", urlencode(category)))
            .await
    }

    async fn config_batch_update(&self, payload: &Value) -> Result<(), DeviceError> {
        let response = self
            .request(Method::PUT, "/v1/configs")
            .json(payload)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn config_save_to_flash(&self) -> Result<(), DeviceError> {
        self.put_action("/v1/configs:save_to_flash").await
    }

    async fn files_info(&self, pattern: &str) -> Result<Vec<String>, DeviceError> {
        let doc = self
            .get_json(&format!("/v1/files:info?pattern={}", urlencode(pattern)))
            .await?;
        let files = doc.get("files").and_then(Value::as_array).ok_or_else(|| {
            DeviceError::InvalidResponse("files info missing 'files' array".into())
        })?;
        Ok(files
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    async fn version(&self) -> Result<Value, DeviceError> {
        self.get_json("/v1/version").await
    }

    async fn info(&self) -> Result<Value, DeviceError> {
        self.get_json("/v1/info").await
    }

    async fn reset(&self) -> Result<(), DeviceError> {
        self.put_action("/v1/machine:reset").await
    }
}

/// Minimal percent-encoding for path/query segments (category names contain
/// spaces, e.g. "U64 Specific Settings").
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'*' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
