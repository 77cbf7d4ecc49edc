// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Per-request telemetry context.
//!
//! A [`RequestContext`] is created when a handler starts and threaded through
//! every pipeline stage. Stages append labels as they learn more (API version,
//! container, role, cache hits). When the handler finishes, the accumulated
//! labels go out with the request counter and the final log line.

use std::net::SocketAddr;

use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use metrics::Label;
use tracing::Span;
use tracing::field::Empty;
use uuid::Uuid;

use crate::constants::{POWERED_BY_HEADER, REQUEST_ID_HEADER, SERVER_NAME};
use crate::errors::ProxyError;
use crate::telemetry;

pub struct RequestContext {
    id: Uuid,
    span: Span,
    labels: Vec<Label>,
}

impl RequestContext {
    pub fn new(handler_name: &'static str, request_path: &str, remote_addr: Option<SocketAddr>) -> Self {
        let id = Uuid::new_v4();
        let span = tracing::info_span!(
            "request",
            request_id = %id,
            handler_name = Empty,
            request_path = Empty,
            remote_addr = Empty,
            aws_api_version = Empty,
            container_id = Empty,
            role_name = Empty,
            response_code = Empty,
            error_description = Empty,
        );

        let mut context = Self {
            id,
            span,
            labels: Vec::new(),
        };
        context.set_label("handler_name", handler_name);
        // raw paths are unbounded, keep them out of metric labels
        context.set_log_label("request_path", request_path);
        if let Some(addr) = remote_addr {
            context.set_log_label("remote_addr", &addr.ip().to_string());
        }
        context
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|label| label.key() == key)
            .map(Label::value)
    }

    /// Records `key` on the request span only. Fields the span does not
    /// declare are dropped by `tracing`.
    pub fn set_log_label(&mut self, key: &str, value: &str) {
        self.span.record(key, value);
    }

    /// Records `key` on the span and as a metric label, replacing any
    /// earlier value for the same key.
    pub fn set_label(&mut self, key: &str, value: &str) {
        self.set_log_label(key, value);
        self.labels.retain(|label| label.key() != key);
        self.labels
            .push(Label::new(key.to_string(), value.to_string()));
    }

    pub fn set_labels<I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in pairs {
            self.set_label(&key, &value);
        }
    }

    /// Mirrors the allow-listed request headers as `header_<name>` labels.
    pub fn copy_request_headers(&mut self, headers: &HeaderMap, names: &[String]) {
        for name in names {
            if let Some(value) = headers.get(name.as_str()).and_then(|v| v.to_str().ok())
                && !value.is_empty()
            {
                self.set_label(&label_name("header", name), value);
            }
        }
    }

    pub fn incr_counter(&self, name: &'static str) {
        metrics::counter!(name, self.labels.clone()).increment(1);
    }

    pub fn set_gauge(&self, name: &'static str, value: f64) {
        metrics::gauge!(name, self.labels.clone()).set(value);
    }

    fn label_summary(&self) -> String {
        self.labels
            .iter()
            .map(|label| format!("{}={}", label.key(), label.value()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Turns the handler outcome into the client response, recording the
    /// response code and, on failure, the error category. The real cause of a
    /// failure is only ever logged; the client gets the mapped status.
    pub fn finish(mut self, result: Result<Response, ProxyError>) -> Response {
        let mut response = match result {
            Ok(response) => response,
            Err(error) => {
                self.set_label("error_description", error.category());
                tracing::error!(parent: &self.span, "[metadataproxy] {}", error);
                error.into_response()
            }
        };

        self.set_label("response_code", response.status().as_str());
        tracing::info!(
            parent: &self.span,
            labels = %self.label_summary(),
            "[metadataproxy] responded with {}",
            response.status()
        );
        self.incr_counter(telemetry::HTTP_REQUESTS);

        let headers = response.headers_mut();
        headers.insert(POWERED_BY_HEADER, HeaderValue::from_static(SERVER_NAME));
        if let Ok(value) = HeaderValue::from_str(&self.id.to_string()) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        response
    }
}

/// Telemetry label name for a mirrored value, e.g. `container_com.example.team`.
pub fn label_name(prefix: &str, name: &str) -> String {
    format!("{}_{}", prefix, name.to_lowercase())
}
