// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Forwards requests the proxy does not emulate to the real metadata service.

use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CONNECTION, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Uri};
use axum::response::Response;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::constants::{PROXY_BY_HEADER, SERVER_NAME, UPSTREAM_CONNECT_TIMEOUT};
use crate::errors::ProxyError;

const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PassthroughTimings {
    /// Resolve and TCP connect.
    pub connect: Duration,
    /// From connected until the upstream response headers arrive.
    pub request: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone)]
pub struct PassthroughProxy {
    endpoint: String,
    connect_timeout: Duration,
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

impl PassthroughProxy {
    /// `endpoint` is a `host:port` pair.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: UPSTREAM_CONNECT_TIMEOUT,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends `request` unchanged apart from hop-by-hop headers and `Host`,
    /// returning the upstream response with its status, headers and body.
    pub async fn forward(
        &self,
        request: Request<Body>,
    ) -> Result<(Response, PassthroughTimings), ProxyError> {
        let started = Instant::now();
        let (mut parts, body) = request.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .to_string();
        parts.uri = path_and_query
            .parse::<Uri>()
            .map_err(|e| ProxyError::Upstream(format!("invalid request path: {}", e)))?;
        strip_hop_by_hop(&mut parts.headers);
        let host = HeaderValue::from_str(&self.endpoint)
            .map_err(|e| ProxyError::Upstream(format!("invalid endpoint {}: {}", self.endpoint, e)))?;
        parts.headers.insert(HOST, host);

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.endpoint))
            .await
            .map_err(|_| {
                ProxyError::Upstream(format!(
                    "timed out connecting to {} after {:?}",
                    self.endpoint, self.connect_timeout
                ))
            })?
            .map_err(|e| ProxyError::Upstream(format!("could not connect to {}: {}", self.endpoint, e)))?;
        let connected = Instant::now();

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ProxyError::Upstream(format!("handshake with {} failed: {}", self.endpoint, e)))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!("[metadataproxy] upstream connection closed: {}", e);
            }
        });

        let upstream = sender
            .send_request(Request::from_parts(parts, body))
            .await
            .map_err(|e| ProxyError::Upstream(format!("request to {} failed: {}", self.endpoint, e)))?;
        let headers_received = Instant::now();

        let mut response = upstream.map(Body::new);
        strip_hop_by_hop(response.headers_mut());
        response
            .headers_mut()
            .insert(PROXY_BY_HEADER, HeaderValue::from_static(SERVER_NAME));

        let timings = PassthroughTimings {
            connect: connected - started,
            request: headers_received - connected,
            total: headers_received - started,
        };
        Ok((response, timings))
    }
}
