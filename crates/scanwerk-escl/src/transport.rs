// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP transport for eSCL requests.
//
// eSCL is plain HTTP(S) with XML bodies.  The protocol layers above only need
// four verbs, so they talk to the `EsclTransport` trait; `HttpTransport` is
// the `reqwest` implementation used against real devices.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use scanwerk_core::ClientConfig;
use scanwerk_core::error::{Result, ScanError};

/// Failure below the HTTP status line: nothing usable came back.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// The parts of an HTTP response the eSCL layers look at.
#[derive(Debug, Clone, Default)]
pub struct HttpReply {
    pub status: u16,
    pub location: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The HTTP verbs eSCL uses.
#[async_trait]
pub trait EsclTransport: Send + Sync {
    async fn get(&self, url: &Url) -> std::result::Result<HttpReply, TransportError>;

    /// POST an XML document (`text/xml`).
    async fn post_xml(
        &self,
        url: &Url,
        body: String,
    ) -> std::result::Result<HttpReply, TransportError>;

    async fn delete(&self, url: &Url) -> std::result::Result<HttpReply, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a client honouring the configured timeout and certificate policy.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| ScanError::protocol_with("failed to build HTTP client", e))?;
        Ok(Self {
            client,
            timeout: config.request_timeout(),
        })
    }

    async fn read(
        &self,
        response: reqwest::Response,
    ) -> std::result::Result<HttpReply, TransportError> {
        let status = response.status().as_u16();
        let headers = response.headers();
        let location = header_string(headers, LOCATION);
        let content_type = header_string(headers, CONTENT_TYPE);
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        debug!(status, bytes = body.len(), "eSCL response received");
        Ok(HttpReply {
            status,
            location,
            content_type,
            body,
        })
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Http(err)
        }
    }
}

#[async_trait]
impl EsclTransport for HttpTransport {
    #[instrument(skip(self), fields(url = %url))]
    async fn get(&self, url: &Url) -> std::result::Result<HttpReply, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        self.read(response).await
    }

    #[instrument(skip(self, body), fields(url = %url, bytes = body.len()))]
    async fn post_xml(
        &self,
        url: &Url,
        body: String,
    ) -> std::result::Result<HttpReply, TransportError> {
        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        self.read(response).await
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn delete(&self, url: &Url) -> std::result::Result<HttpReply, TransportError> {
        let response = self
            .client
            .delete(url.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        self.read(response).await
    }
}

fn header_string(
    headers: &reqwest::header::HeaderMap,
    name: reqwest::header::HeaderName,
) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}
