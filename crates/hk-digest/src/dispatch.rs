use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::challenge::resolve_url;
use crate::credentials::DigestCredentials;

fn find_header<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub base_url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// Transient digest configuration; removed before the request is reissued.
    pub digest: Option<DigestCredentials>,
    /// Retry guard: set once the digest interceptor has reissued the request.
    pub retried: bool,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            base_url: None,
            headers: BTreeMap::new(),
            body: None,
            digest: None,
            retried: false,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_digest(mut self, credentials: DigestCredentials) -> Self {
        self.digest = Some(credentials);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn has_authorization(&self) -> bool {
        self.header("authorization").is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl OutboundResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("request failed with status {}", .response.status)]
    Status { response: OutboundResponse },
    #[error("transport error: {message}")]
    Transport {
        message: String,
        response: Option<OutboundResponse>,
    },
}

impl DispatchError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            response: None,
        }
    }

    /// The response attached to the failure, if the server answered at all.
    pub fn response(&self) -> Option<&OutboundResponse> {
        match self {
            Self::Status { response } => Some(response),
            Self::Transport { response, .. } => response.as_ref(),
        }
    }
}

#[async_trait]
pub trait HttpDispatch: Send + Sync {
    async fn dispatch(&self, request: OutboundRequest) -> Result<OutboundResponse, DispatchError>;
}

/// `reqwest` adapter. Non-2xx/3xx statuses come back as
/// [`DispatchError::Status`] so callers see them the way an HTTP client with
/// status validation reports them.
#[derive(Debug, Clone, Default)]
pub struct ReqwestDispatch {
    client: reqwest::Client,
}

impl ReqwestDispatch {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpDispatch for ReqwestDispatch {
    async fn dispatch(&self, request: OutboundRequest) -> Result<OutboundResponse, DispatchError> {
        let url = resolve_url(&request.url, request.base_url.as_deref())
            .map_err(|error| DispatchError::transport(error.to_string()))?;
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|error| DispatchError::transport(error.to_string()))?;
        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|error| DispatchError::transport(error.to_string()))?;

        let status = response.status();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .or_insert_with(|| value.to_string());
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|error| DispatchError::transport(error.to_string()))?
            .to_vec();
        let outbound = OutboundResponse {
            status: status.as_u16(),
            headers,
            body,
        };
        if status.is_client_error() || status.is_server_error() {
            return Err(DispatchError::Status { response: outbound });
        }
        Ok(outbound)
    }
}
