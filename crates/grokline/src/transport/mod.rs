// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transport session: an opaque request/response channel plus a cookie jar.
//!
//! The wire implementation is behind the [`Transport`] trait so bootstrap and
//! conversation code never see `reqwest` directly, and tests can script
//! responses.

pub mod cookies;
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use cookies::CookieJar;
pub use http::HttpTransport;

/// HTTP method subset used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Request body variants.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Text(String),
    Json(serde_json::Value),
    Multipart(Vec<MultipartPart>),
}

/// A fully rendered request. Headers are sent in vector order.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub timeout: Option<std::time::Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout: None,
        }
    }

    pub fn post(url: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body,
            timeout: None,
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of a request header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A buffered response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// All response headers, repeated names kept (`set-cookie`).
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Body decoded as UTF-8, invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Every value of a header, case-insensitive.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response whose body is still arriving.
pub struct StreamingResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Body chunks in arrival order. Dropping it closes the connection.
    pub body: BoxStream<'static, Result<Vec<u8>, TransportError>>,
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Failure below HTTP status level (connect, TLS, timeout, body read).
#[derive(thiserror::Error, Debug, Clone)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError(e.to_string())
    }
}

/// The request/response channel the client drives.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and buffer the whole response.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Send a request and return as soon as the status line arrives.
    async fn open_stream(&self, request: HttpRequest) -> Result<StreamingResponse, TransportError>;

    /// A fresh channel with the same proxy and no pooled connections.
    fn renew(&self) -> Arc<dyn Transport>;
}

/// A transport paired with the cookies of one logical browser session.
pub struct Session {
    transport: Arc<dyn Transport>,
    pub cookies: CookieJar,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cookies: CookieJar::default(),
        }
    }

    /// A new session on a renewed transport with an empty jar.
    pub fn renewed(&self) -> Self {
        Self::new(self.transport.renew())
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send with the jar's cookies and absorb any cookies that come back.
    pub async fn execute(
        &mut self,
        mut request: HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        self.attach_cookies(&mut request);
        let response = self.transport.execute(request).await?;
        self.cookies.absorb(response.header_values("set-cookie"));
        Ok(response)
    }

    /// Streaming variant of [`Session::execute`].
    pub async fn open_stream(
        &mut self,
        mut request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        self.attach_cookies(&mut request);
        let response = self.transport.open_stream(request).await?;
        self.cookies.absorb(
            response
                .headers
                .iter()
                .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
                .map(|(_, v)| v.as_str()),
        );
        Ok(response)
    }

    /// Fill the `cookie` slot, keeping its template position when present.
    fn attach_cookies(&self, request: &mut HttpRequest) {
        if self.cookies.is_empty() {
            return;
        }
        let rendered = self.cookies.header_value();
        match request
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case("cookie"))
        {
            Some((_, value)) => *value = rendered,
            None => request.headers.push(("cookie".to_string(), rendered)),
        }
    }
}
