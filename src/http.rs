use reqwest::blocking::Client;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::binding::{Body, RequestParts};
use crate::error::ExecError;
use crate::spec::HttpMethod;

/// Runs bound requests. The CLI and tool invocation both go through this.
pub trait RequestExecutor {
    fn execute(&self, parts: &RequestParts) -> Result<ExecResponse, ExecError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub content_type: String,
}

impl ExecResponse {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

pub struct HttpClient {
    base_url: String,
    token: Option<String>,
    headers: Vec<(String, String)>,
    client: Client,
}

impl HttpClient {
    pub fn new(
        base_url: String,
        token: Option<String>,
        headers: Vec<(String, String)>,
        timeout_secs: Option<u64>,
    ) -> Result<Self, ExecError> {
        let mut builder = Client::builder().user_agent(concat!("openbridge/", env!("CARGO_PKG_VERSION")));
        if let Some(secs) = timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(ExecError::Client)?;
        Ok(Self {
            base_url,
            token,
            headers,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn header_map(&self, parts: &RequestParts) -> Result<HeaderMap, ExecError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            let mut value = token.clone();
            if !value.to_ascii_lowercase().starts_with("bearer ") {
                value = format!("Bearer {value}");
            }
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&value).map_err(|_| ExecError::InvalidHeader {
                    name: AUTHORIZATION.to_string(),
                })?,
            );
        }
        // operation headers come last so they win over configured ones
        for (name, value) in self.headers.iter().chain(&parts.headers) {
            let invalid = || ExecError::InvalidHeader { name: name.clone() };
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            headers.insert(header_name, header_value);
        }
        if let (Some(ct), Some(_)) = (&parts.content_type, &parts.body) {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_str(ct).map_err(|_| ExecError::InvalidHeader {
                    name: CONTENT_TYPE.to_string(),
                })?,
            );
        }
        Ok(headers)
    }
}

impl RequestExecutor for HttpClient {
    fn execute(&self, parts: &RequestParts) -> Result<ExecResponse, ExecError> {
        let url = build_url(&self.base_url, &parts.path, &parts.query)?;
        debug!(method = %parts.method, %url, "sending request");
        let mut req = self
            .client
            .request(to_reqwest(parts.method), url)
            .headers(self.header_map(parts)?);

        if let Some(body) = &parts.body {
            req = match body {
                Body::Json(value) => req.json(value),
                Body::Text(value) => req.body(value.clone()),
            };
        }

        let resp = req.send().map_err(ExecError::RequestFailed)?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect::<Vec<_>>();

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let text = resp.text().map_err(ExecError::ResponseRead)?;
        let body = if content_type.contains("json") {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };
        debug!(status, "received response");

        Ok(ExecResponse {
            status,
            headers,
            body,
            content_type,
        })
    }
}

fn to_reqwest(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

fn build_url(base_url: &str, path: &str, query: &[(String, String)]) -> Result<Url, ExecError> {
    let mut base = base_url.trim_end_matches('/').to_string();
    if !path.starts_with('/') {
        base.push('/');
    }
    base.push_str(path);
    let mut url = Url::parse(&base).map_err(|source| ExecError::InvalidUrl {
        url: base.clone(),
        source,
    })?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in query {
            pairs.append_pair(k, v);
        }
    }
    Ok(url)
}
