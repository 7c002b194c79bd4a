use std::fmt;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        }
    }
}

/// Authorized access to the game REST endpoints. `path` is relative to the
/// game context, e.g. `mission/findMy`.
#[async_trait]
pub trait GameApi: Send + Sync + 'static {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ApiError>;

    /// Replaces the credential sent with later requests.
    fn set_token(&self, _token: &str) {}
}

pub async fn get_json<T>(api: &dyn GameApi, path: &str) -> Result<T, ApiError>
where
    T: DeserializeOwned,
{
    let raw = api.request(Method::Get, path, None).await?;
    Ok(serde_json::from_value(raw)?)
}

pub async fn post_json<T>(api: &dyn GameApi, path: &str, body: Value) -> Result<T, ApiError>
where
    T: DeserializeOwned,
{
    let raw = api.request(Method::Post, path, Some(body)).await?;
    Ok(serde_json::from_value(raw)?)
}

pub struct HttpGameApi {
    http: Client,
    base_url: String,
    context: String,
    token: RwLock<String>,
}

impl HttpGameApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            context: "game".into(),
            token: RwLock::new(token.into()),
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            self.context,
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl GameApi for HttpGameApi {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        let url = self.url_for(path);
        let token = self.token.read().clone();
        let mut request = self
            .http
            .request(method.into(), &url)
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        debug!(target: "owge.api", %method, %url, "request");
        let res = request.send().await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(target: "owge.api", %method, %url, %status, "unexpected status");
            return Err(ApiError::UnexpectedStatus { status, body });
        }
        let bytes = res.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn set_token(&self, token: &str) {
        *self.token.write() = token.to_string();
    }
}
