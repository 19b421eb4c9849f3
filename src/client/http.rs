//! REST client for the shop server collections.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::Deserialize;

use crate::config::ClientSection;
use crate::domain::Record;
use crate::errors::ClientError;

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Thin typed wrapper over `reqwest::Client`. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Every request made through this client is bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("shopfloor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(section: &ClientSection) -> Result<Self, ClientError> {
        Self::new(&section.base_url, section.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn record_url<T: Record>(&self, id: &str) -> String {
        format!("{}{}/{}", self.base_url, T::RESOURCE.path(), id)
    }

    /// GET the full collection.
    pub async fn list<T: Record>(&self) -> Result<Vec<T>, ClientError> {
        let resp = self.http.get(self.url(T::RESOURCE.path())).send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.json::<Vec<T>>().await?)
    }

    /// POST a new record. The server keeps a non-empty client id.
    pub async fn create<T: Record>(&self, record: &T) -> Result<T, ClientError> {
        let resp = self
            .http
            .post(self.url(T::RESOURCE.path()))
            .json(record)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.json::<T>().await?)
    }

    /// PUT the whole record, nested sub-collections included.
    pub async fn update<T: Record>(&self, record: &T) -> Result<T, ClientError> {
        let resp = self
            .http
            .put(self.record_url::<T>(record.id()))
            .json(record)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.json::<T>().await?)
    }

    pub async fn delete<T: Record>(&self, id: &str) -> Result<(), ClientError> {
        let resp = self.http.delete(self.record_url::<T>(id)).send().await?;
        check_status(resp).await?;
        Ok(())
    }

    /// `GET /health`.
    pub async fn health(&self) -> Result<(), ClientError> {
        let resp = self.http.get(self.url("/health")).send().await?;
        check_status(resp).await?;
        Ok(())
    }
}

/// Turn a non-2xx response into `ClientError::Status`, reading the server's
/// `{ "error": ... }` body when present.
async fn check_status(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(status_error(status, &text))
}

fn status_error(status: StatusCode, body: &str) -> ClientError {
    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        Err(_) => body.trim().to_string(),
    };
    ClientError::Status {
        status: status.as_u16(),
        message,
    }
}
