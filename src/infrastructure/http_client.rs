use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    Get,
    Post,
}

/// How a request proves who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestAuth {
    None,
    /// Session access token, sent the way the server reads it: as the `access_token` cookie.
    AccessCookie(String),
    RefreshCookie(String),
    /// `Authorization: token <value>`, used by the work session endpoints.
    WorkToken(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: ApiMethod,
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub auth: RequestAuth,
}

impl ApiRequest {
    fn new(method: ApiMethod, segments: &[&str]) -> Self {
        Self {
            method,
            segments: segments.iter().map(|segment| segment.to_string()).collect(),
            query: Vec::new(),
            body: None,
            auth: RequestAuth::None,
        }
    }

    pub fn get(segments: &[&str]) -> Self {
        Self::new(ApiMethod::Get, segments)
    }

    pub fn post(segments: &[&str]) -> Self {
        Self::new(ApiMethod::Post, segments)
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_auth(mut self, auth: RequestAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub max_age: Option<i64>,
}

impl SetCookie {
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let max_age = parts
            .filter_map(|attribute| attribute.split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("max-age"))
            .and_then(|(_, value)| value.trim().parse::<i64>().ok());
        Some(Self {
            name: name.to_string(),
            value: value.trim().trim_matches('"').to_string(),
            max_age,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    pub cookies: Vec<SetCookie>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 500 is included because the server reports some expired sessions that way.
    pub fn is_auth_failure(&self) -> bool {
        self.status == 401 || self.status == 500
    }

    pub fn cookie(&self, name: &str) -> Option<&SetCookie> {
        self.cookies
            .iter()
            .rev()
            .find(|cookie| cookie.name == name && !cookie.value.is_empty())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, InfraError> {
        serde_json::from_str(&self.body).map_err(|error| InfraError::Api {
            status: self.status,
            message: format!("invalid response payload: {error}; body={}", self.body),
        })
    }

    pub fn ensure_success(self) -> Result<Self, InfraError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    pub fn into_error(self) -> InfraError {
        let message = extract_detail(&self.body).unwrap_or_else(|| {
            if self.body.trim().is_empty() {
                format!("http {}", self.status)
            } else {
                self.body.clone()
            }
        });
        match self.status {
            400 | 409 | 422 => InfraError::Validation(message),
            401 => InfraError::AuthExpired(message),
            status => InfraError::Api { status, message },
        }
    }
}

/// Pulls the human readable part out of `{"detail": ...}` error bodies.
fn extract_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok()?;
    match parsed.get("detail")? {
        serde_json::Value::String(detail) => Some(detail.clone()),
        serde_json::Value::Array(items) => {
            let messages = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(serde_json::Value::as_str))
                .collect::<Vec<_>>();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        other => Some(other.to_string()),
    }
}

#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestApiTransport {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl ReqwestApiTransport {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::Transport(format!("failed to build http client: {error}")))?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    fn endpoint(&self, segments: &[String]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| InfraError::InvalidConfig("api base URL cannot be a base".to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ApiTransport for ReqwestApiTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, InfraError> {
        let url = self.endpoint(&request.segments)?;
        let method = match request.method {
            ApiMethod::Get => Method::GET,
            ApiMethod::Post => Method::POST,
        };

        let mut builder = self.client.request(method, url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match &request.auth {
            RequestAuth::None => builder,
            RequestAuth::AccessCookie(token) => builder.header(COOKIE, format!("access_token={token}")),
            RequestAuth::RefreshCookie(token) => {
                builder.header(COOKIE, format!("refresh_token={token}"))
            }
            RequestAuth::WorkToken(token) => builder.header(AUTHORIZATION, format!("token {token}")),
        };
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(path = %request.path(), method = ?request.method, "sending api request");
        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                InfraError::Transport(format!(
                    "{} timed out after {}s",
                    request.path(),
                    self.timeout.as_secs()
                ))
            } else {
                InfraError::Transport(format!("network error on {}: {error}", request.path()))
            }
        })?;

        let status = response.status().as_u16();
        let cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(SetCookie::parse)
            .collect::<Vec<_>>();
        let body = response.text().await.map_err(|error| {
            InfraError::Transport(format!("failed reading response of {}: {error}", request.path()))
        })?;

        tracing::debug!(path = %request.path(), status, "api response received");
        Ok(ApiResponse {
            status,
            body,
            cookies,
        })
    }
}
