//! Inbound request envelopes as delivered by the API front door.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::ChatError;

/// REST-proxy style envelope (`httpMethod`, `path`, claims under `authorizer.claims`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestProxyEnvelope {
    pub http_method: String,
    pub path: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub request_context: Option<RestRequestContext>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestRequestContext {
    #[serde(default)]
    pub authorizer: Option<RestAuthorizer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestAuthorizer {
    #[serde(default)]
    pub claims: Option<Map<String, Value>>,
}

/// HTTP-API style envelope (`requestContext.http.method`, `rawPath`, JWT authorizer claims).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpApiEnvelope {
    pub raw_path: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    pub request_context: HttpRequestContext,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpRequestContext {
    pub http: HttpDescription,
    #[serde(default)]
    pub authorizer: Option<JwtAuthorizer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpDescription {
    pub method: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwtAuthorizer {
    #[serde(default)]
    pub jwt: Option<JwtClaims>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwtClaims {
    #[serde(default)]
    pub claims: Option<Map<String, Value>>,
}

/// Either envelope shape. The HTTP-API shape is tried first since it is the stricter of the two.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RequestEnvelope {
    HttpApi(HttpApiEnvelope),
    RestProxy(RestProxyEnvelope),
}

/// The envelope reduced to what routing needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundRequest {
    /// Upper-cased HTTP method.
    pub method: String,
    pub path: String,
    /// Decoded body, if any.
    pub body: Option<String>,
    /// Header names lower-cased.
    pub headers: HashMap<String, String>,
    /// Claims already verified by the front door, if it forwarded any.
    pub claims: Option<Map<String, Value>>,
}

impl InboundRequest {
    pub fn new(method: impl AsRef<str>, path: impl Into<String>) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_claims(mut self, claims: Map<String, Value>) -> Self {
        self.claims = Some(claims);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_preflight(&self) -> bool {
        self.method == "OPTIONS"
    }
}

impl RequestEnvelope {
    pub fn method(&self) -> &str {
        match self {
            RequestEnvelope::HttpApi(e) => &e.request_context.http.method,
            RequestEnvelope::RestProxy(e) => &e.http_method,
        }
    }

    /// Normalizes either shape, decoding base64 bodies.
    pub fn into_request(self) -> Result<InboundRequest, ChatError> {
        let (method, path, body, is_base64, headers, claims) = match self {
            RequestEnvelope::HttpApi(e) => (
                e.request_context.http.method,
                e.raw_path,
                e.body,
                e.is_base64_encoded,
                e.headers,
                e.request_context
                    .authorizer
                    .and_then(|a| a.jwt)
                    .and_then(|j| j.claims),
            ),
            RequestEnvelope::RestProxy(e) => (
                e.http_method,
                e.path,
                e.body,
                e.is_base64_encoded,
                e.headers,
                e.request_context
                    .and_then(|c| c.authorizer)
                    .and_then(|a| a.claims),
            ),
        };

        let body = match body {
            Some(raw) if is_base64 => Some(decode_body(&raw)?),
            other => other,
        };

        Ok(InboundRequest {
            method: method.to_ascii_uppercase(),
            path,
            body,
            headers: headers
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            claims,
        })
    }
}

fn decode_body(raw: &str) -> Result<String, ChatError> {
    let bytes = STANDARD
        .decode(raw)
        .map_err(|e| ChatError::InvalidArguments(format!("Invalid base64 body: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| ChatError::InvalidArguments(format!("Body is not valid UTF-8: {e}")))
}
