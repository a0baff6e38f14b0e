// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! `reqwest` implementation of [`Transport`].
//!
//! Not a browser, just HTTP. Headers go out in the order the caller rendered
//! them; decompression is handled by reqwest. No automatic retry: a failed
//! call surfaces to the bootstrap or conversation layer as-is.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::{
    HttpRequest, HttpResponse, Method, RequestBody, StreamingResponse, Transport, TransportError,
};

/// HTTP transport with optional proxy.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    proxy: Option<String>,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport. Fails only when the proxy URL is invalid.
    pub fn new(proxy: Option<&str>, timeout: Duration) -> Result<Self, TransportError> {
        let client = build_client(proxy, timeout)?;
        Ok(Self {
            client,
            proxy: proxy.map(str::to_string),
            timeout,
        })
    }

    fn prepare(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, &request.url);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Text(text) => builder.body(text),
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart(parts) => {
                let mut form = reqwest::multipart::Form::new();
                for part in parts {
                    let mut p = reqwest::multipart::Part::bytes(part.data);
                    if let Some(filename) = part.filename {
                        p = p.file_name(filename);
                    }
                    if let Some(content_type) = part.content_type {
                        p = p.mime_str(&content_type)?;
                    }
                    form = form.part(part.name, p);
                }
                builder.multipart(form)
            }
        };

        Ok(builder)
    }
}

fn build_client(proxy: Option<&str>, timeout: Duration) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(5));

    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }

    Ok(builder.build()?)
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.clone();
        let r = self.prepare(request)?.send().await?;
        let status = r.status().as_u16();
        let headers = collect_headers(r.headers());
        let body = r.bytes().await?.to_vec();

        tracing::debug!("{url} -> {status} ({} bytes)", body.len());

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<StreamingResponse, TransportError> {
        let r = self.prepare(request)?.send().await?;
        let status = r.status().as_u16();
        let headers = collect_headers(r.headers());
        let body = r
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(TransportError::from))
            .boxed();

        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }

    fn renew(&self) -> Arc<dyn Transport> {
        match HttpTransport::new(self.proxy.as_deref(), self.timeout) {
            Ok(fresh) => Arc::new(fresh),
            Err(e) => {
                tracing::warn!("could not build a fresh transport, reusing pool: {e}");
                Arc::new(self.clone())
            }
        }
    }
}
