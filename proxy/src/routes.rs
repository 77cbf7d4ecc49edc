// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! HTTP route handlers for the metadata proxy.
//!
//! | Method | Path | Handler | Description |
//! |--------|------|---------|-------------|
//! | GET | `/{v}/meta-data/iam/info` | [`role_info`] | Assumed role ARN and id |
//! | GET | `/{v}/meta-data/iam/security-credentials/` | [`role_name`] | Container role name |
//! | GET | `/{v}/meta-data/iam/security-credentials/{role}` | [`credentials`] | Assumed role credentials |
//! | GET | `/metrics` | [`metrics`] | Prometheus exposition |
//! | GET | `/favicon.ico` | [`favicon`] | Always 404 |
//! | any | anything else | [`passthrough`] | Forwarded to the real metadata service |
//!
//! Emulated handlers only answer for API versions at or above the configured
//! minimum. Older versions are forwarded like any other path.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::connect_info::MockConnectInfo;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::application::AppState;
use crate::constants::{NOT_FOUND_BODY, PASSTHROUGH_LOOKUP_TIMEOUT};
use crate::errors::ProxyError;
use crate::models::{ContainerRecord, CredentialsResponse, RoleDescriptor, RoleInfoResponse};
use crate::request::RequestContext;
use crate::roles::RoleIdentifier;
use crate::telemetry;

const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

#[derive(Debug, Deserialize)]
pub struct MetadataPath {
    pub api_version: String,
    pub requested_role: Option<String>,
}

/// Metadata API versions are ISO dates, so string order is release order.
pub fn is_compatible_api_version(version: &str, min_version: &str) -> bool {
    version >= min_version
}

/// Peer address from the server, or from a `MockConnectInfo` layer in tests.
fn remote_addr(request: &Request) -> Option<SocketAddr> {
    let extensions = request.extensions();
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
        .or_else(|| {
            extensions
                .get::<MockConnectInfo<SocketAddr>>()
                .map(|MockConnectInfo(addr)| *addr)
        })
}

fn remote_ip(request: &Request) -> Result<IpAddr, ProxyError> {
    remote_addr(request).map(|addr| addr.ip()).ok_or_else(|| {
        tracing::error!("[metadataproxy] request has no peer address");
        ProxyError::InternalServerError
    })
}

fn request_context(state: &AppState, handler_name: &'static str, request: &Request) -> RequestContext {
    let mut context = RequestContext::new(handler_name, request.uri().path(), remote_addr(request));
    context.copy_request_headers(request.headers(), &state.options.copied_request_headers());
    tracing::info!(
        parent: context.span(),
        "[metadataproxy] handling {} {}",
        request.method(),
        request.uri()
    );
    context
}

fn json_response<T: Serialize>(value: &T) -> Result<Response, ProxyError> {
    let mut body = serde_json::to_string_pretty(value)?;
    body.push('\n');
    Ok((StatusCode::OK, [(CONTENT_TYPE, JSON_CONTENT_TYPE)], body).into_response())
}

/// Container and role for the caller at `ip`. Shared by every emulated handler.
async fn resolve_caller(
    state: &AppState,
    ip: IpAddr,
    context: &mut RequestContext,
) -> Result<(ContainerRecord, RoleDescriptor), ProxyError> {
    let container = state.containers.resolve(ip, context).await?;
    let identifier = state.containers.role_identifier(&container)?;
    let role = state.roles.resolve(&identifier, context).await?;
    context.set_label("role_name", &role.name);
    Ok((container, role))
}

/// Returns `true` when the handler should emulate, recording the version label.
fn check_version(state: &AppState, api_version: &str, context: &mut RequestContext) -> bool {
    context.set_label("aws_api_version", api_version);
    if is_compatible_api_version(api_version, &state.options.min_api_version) {
        return true;
    }
    tracing::info!(
        parent: context.span(),
        "[metadataproxy] API version {} is older than {}, passing through directly",
        api_version,
        state.options.min_api_version
    );
    false
}

/// Role-Info: `/{api_version}/meta-data/iam/info`
#[tracing::instrument(skip_all)]
pub async fn role_info(
    State(state): State<Arc<AppState>>,
    Path(path): Path<MetadataPath>,
    request: Request,
) -> Response {
    let mut context = request_context(&state, "iam-info-handler", &request);
    if !check_version(&state, &path.api_version, &mut context) {
        let result = forward(&state, request, &mut context).await;
        return context.finish(result);
    }

    let ip = remote_ip(&request);
    let result = async {
        let ip = ip?;
        let (container, role) = resolve_caller(&state, ip, &mut context).await?;
        let external_id = state.containers.external_id(&container);
        let credentials = state
            .credentials
            .assume(&role.arn, external_id.as_deref(), &mut context)
            .await?;
        json_response(&RoleInfoResponse::from(&credentials))
    }
    .await;

    context.finish(result)
}

/// Role-Name: `/{api_version}/meta-data/iam/security-credentials/`
///
/// Never assumes the role.
#[tracing::instrument(skip_all)]
pub async fn role_name(
    State(state): State<Arc<AppState>>,
    Path(path): Path<MetadataPath>,
    request: Request,
) -> Response {
    let mut context = request_context(&state, "iam-role-name-handler", &request);
    if !check_version(&state, &path.api_version, &mut context) {
        let result = forward(&state, request, &mut context).await;
        return context.finish(result);
    }

    let ip = remote_ip(&request);
    let result = async {
        let ip = ip?;
        let (_, role) = resolve_caller(&state, ip, &mut context).await?;
        Ok::<_, ProxyError>((StatusCode::OK, [(CONTENT_TYPE, TEXT_CONTENT_TYPE)], role.name).into_response())
    }
    .await;

    context.finish(result)
}

/// Credentials-For-Role: `/{api_version}/meta-data/iam/security-credentials/{requested_role}`
///
/// The requested role must be the container's own role.
#[tracing::instrument(skip_all)]
pub async fn credentials(
    State(state): State<Arc<AppState>>,
    Path(path): Path<MetadataPath>,
    request: Request,
) -> Response {
    let mut context = request_context(&state, "iam-security-credentials-handler", &request);
    if !check_version(&state, &path.api_version, &mut context) {
        let result = forward(&state, request, &mut context).await;
        return context.finish(result);
    }

    let ip = remote_ip(&request);
    let result = async {
        let ip = ip?;
        let (container, role) = resolve_caller(&state, ip, &mut context).await?;

        let requested = path.requested_role.unwrap_or_default();
        if requested != role.name {
            return Err(ProxyError::RoleMismatch {
                requested,
                resolved: role.name,
            });
        }

        let external_id = state.containers.external_id(&container);
        let credentials = state
            .credentials
            .assume(&role.arn, external_id.as_deref(), &mut context)
            .await?;
        json_response(&CredentialsResponse::from(&credentials))
    }
    .await;

    context.finish(result)
}

/// Everything that is not emulated.
#[tracing::instrument(skip_all)]
pub async fn passthrough(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let mut context = request_context(&state, "passthrough-handler", &request);
    let result = forward(&state, request, &mut context).await;
    context.finish(result)
}

/// Forwards `request` upstream while a single container lookup runs alongside
/// it. The lookup only adds labels and is cut off after
/// [`PASSTHROUGH_LOOKUP_TIMEOUT`]; its failure is logged at debug level.
async fn forward(
    state: &AppState,
    request: Request,
    context: &mut RequestContext,
) -> Result<Response, ProxyError> {
    let ip = remote_addr(&request).map(|addr| addr.ip());
    let lookup = async {
        let ip = ip?;
        match tokio::time::timeout(PASSTHROUGH_LOOKUP_TIMEOUT, state.containers.find_once(ip)).await {
            Ok(found) => Some(found),
            Err(_) => {
                tracing::debug!(
                    "[metadataproxy] passthrough lookup for {} gave up after {:?}",
                    ip,
                    PASSTHROUGH_LOOKUP_TIMEOUT
                );
                None
            }
        }
    };

    let (forwarded, container) = tokio::join!(state.passthrough.forward(request), lookup);

    match container {
        Some(Ok(container)) => {
            state.containers.record_container(&container, context);
            if let Ok(identifier) = state.containers.role_identifier(&container) {
                let name = RoleIdentifier::parse(&identifier)
                    .ok()
                    .and_then(|parsed| parsed.local_descriptor())
                    .map_or(identifier, |role| role.name);
                context.set_label("role_name", &name);
            }
        }
        Some(Err(e)) => {
            tracing::debug!(parent: context.span(), "[metadataproxy] passthrough lookup: {}", e);
        }
        None => {}
    }

    let (response, timings) = forwarded?;
    context.set_gauge(telemetry::PASSTHROUGH_CONNECT_SECONDS, timings.connect.as_secs_f64());
    context.set_gauge(telemetry::PASSTHROUGH_REQUEST_SECONDS, timings.request.as_secs_f64());
    context.set_gauge(telemetry::PASSTHROUGH_TOTAL_SECONDS, timings.total.as_secs_f64());
    tracing::debug!(
        parent: context.span(),
        "[metadataproxy] passthrough to {} took {:?}",
        state.passthrough.endpoint(),
        timings.total
    );
    Ok(response)
}

pub async fn favicon() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, [(CONTENT_TYPE, TEXT_CONTENT_TYPE)], NOT_FOUND_BODY)
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, ProxyError> {
    telemetry::render(state.metrics.as_ref())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    // Handler flows are covered in tests/http_integration.rs

    #[test]
    fn test_version_boundary_is_inclusive() {
        assert!(is_compatible_api_version("2012-01-12", "2012-01-12"));
        assert!(!is_compatible_api_version("2012-01-11", "2012-01-12"));
        assert!(is_compatible_api_version("2016-09-02", "2012-01-12"));
        assert!(is_compatible_api_version("latest", "2012-01-12"));
        assert!(!is_compatible_api_version("1.0", "2012-01-12"));
    }

    #[tokio::test]
    async fn test_favicon_is_not_found() {
        let response = favicon().await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], NOT_FOUND_BODY.as_bytes());
    }

    #[tokio::test]
    async fn test_json_response_is_pretty_with_trailing_newline() {
        let response = json_response(&serde_json::json!({"Code": "Success"})).unwrap();
        assert_eq!(response.headers()[CONTENT_TYPE], JSON_CONTENT_TYPE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"{\n  \"Code\": \"Success\"\n}\n");
    }
}
