//! Outbound GET requests for scripts holding REQUESTS.
//!
//! Every URL is checked against the configured allow-list pattern before the
//! transport is touched. The pattern only has to match somewhere in the URL,
//! so operators anchor it themselves (`^https://example\.org/`).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::actions::ActionError;
use crate::config::ResolvedConfig;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("URL '{0}' is not allowed")]
    NotAllowed(String),

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("unknown response type '{0}'")]
    UnknownType(String),
}

impl From<FetchError> for ActionError {
    fn from(err: FetchError) -> Self {
        ActionError::RequestRejected(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Issues a single GET. Implementations apply their own timeout.
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, FetchError>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(concat!("buchschloss/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent }
    }
}

impl HttpTransport for UreqTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        match self.agent.get(url).call() {
            Ok(response) => {
                let status = response.status();
                let content_type = response.header("content-type").map(str::to_string);
                let body = response.into_string().map_err(|e| FetchError::Decode {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(HttpResponse { status, content_type, body })
            }
            Err(ureq::Error::Status(status, _)) => {
                Err(FetchError::Status { url: url.to_string(), status })
            }
            Err(ureq::Error::Transport(transport)) => {
                let reason = format!("{:?} {}", transport.kind(), transport);
                let lower = reason.to_ascii_lowercase();
                if lower.contains("timeout") || lower.contains("timed out") {
                    Err(FetchError::Timeout(url.to_string()))
                } else {
                    Err(FetchError::Transport { url: url.to_string(), reason })
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Auto,
    Json,
    Html,
    Xml,
    Text,
}

impl ResponseType {
    /// Pick a type from a `Content-Type` header; unknown types are text.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let subtype = content_type
            .and_then(|ct| ct.split(';').next())
            .and_then(|mime| mime.split('/').nth(1))
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();
        match subtype.as_str() {
            "json" => ResponseType::Json,
            "html" | "xhtml+xml" => ResponseType::Html,
            "xml" => ResponseType::Xml,
            s if s.ends_with("+json") => ResponseType::Json,
            s if s.ends_with("+xml") => ResponseType::Xml,
            _ => ResponseType::Text,
        }
    }
}

impl FromStr for ResponseType {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ResponseType::Auto),
            "json" => Ok(ResponseType::Json),
            "html" => Ok(ResponseType::Html),
            "xml" => Ok(ResponseType::Xml),
            "text" => Ok(ResponseType::Text),
            _ => Err(FetchError::UnknownType(s.to_string())),
        }
    }
}

/// A decoded response. Markup stays as text and is parsed by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedData {
    Json(Value),
    Markup(String),
    Text(String),
}

pub struct Fetcher {
    pattern: Option<Regex>,
    transport: Arc<dyn HttpTransport>,
}

impl Fetcher {
    pub fn new(pattern: Option<Regex>, transport: Arc<dyn HttpTransport>) -> Self {
        Self { pattern, transport }
    }

    pub fn from_config(cfg: &ResolvedConfig) -> Self {
        Self::new(cfg.url_pattern.clone(), Arc::new(UreqTransport::new(cfg.request_timeout)))
    }

    /// No configured pattern allows nothing.
    pub fn is_allowed(&self, url: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(url))
    }

    pub fn get(&self, url: &str, ty: ResponseType) -> Result<FetchedData, FetchError> {
        if !self.is_allowed(url) {
            info!(url, "request rejected by allow-list");
            return Err(FetchError::NotAllowed(url.to_string()));
        }

        let response = self.transport.get(url)?;
        debug!(url, status = response.status, "fetched");
        if !(200..300).contains(&response.status) {
            return Err(FetchError::Status { url: url.to_string(), status: response.status });
        }

        let ty = match ty {
            ResponseType::Auto => ResponseType::from_content_type(response.content_type.as_deref()),
            other => other,
        };
        match ty {
            ResponseType::Json => serde_json::from_str(&response.body)
                .map(FetchedData::Json)
                .map_err(|e| FetchError::Decode { url: url.to_string(), reason: e.to_string() }),
            ResponseType::Html | ResponseType::Xml => Ok(FetchedData::Markup(response.body)),
            ResponseType::Text | ResponseType::Auto => Ok(FetchedData::Text(response.body)),
        }
    }
}
