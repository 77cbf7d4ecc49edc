// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::net::IpAddr;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::constants;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProxyError {
    #[error("could not find any container with IP {ip}: {message}")]
    ContainerNotFound { ip: IpAddr, message: String },
    #[error("could not find IAM_ROLE in the environment of container {0}")]
    RoleNotConfigured(String),
    #[error("invalid role identifier {0:?}")]
    InvalidRoleIdentifier(String),
    #[error("could not read IAM role {role}: {message}")]
    ReadRole { role: String, message: String },
    #[error("could not assume role {arn}: {message}")]
    AssumeRole { arn: String, message: String },
    #[error("requested role {requested:?} does not match container role {resolved:?}")]
    RoleMismatch { requested: String, resolved: String },
    #[error("could not proxy request upstream: {0}")]
    Upstream(String),
    #[error("internal server error")]
    InternalServerError,
}

impl ProxyError {
    /// Stable telemetry category. These strings are dashboarded; do not rename.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ContainerNotFound { .. } => "could_not_find_container",
            Self::RoleNotConfigured(_) => "could_not_find_container_role",
            Self::InvalidRoleIdentifier(_) | Self::ReadRole { .. } => "could_not_read_role",
            Self::AssumeRole { .. } => "could_not_assume_role",
            Self::RoleMismatch { .. } => "role_names_do_not_match",
            Self::Upstream(_) => "could_not_proxy_request",
            Self::InternalServerError => "internal_error",
        }
    }

    /// Status the client sees. Resolution failures mirror the real metadata
    /// service, which answers 404 for a missing role.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match status {
            StatusCode::NOT_FOUND => constants::NOT_FOUND_BODY.to_string(),
            _ => format!("{}\n", status.canonical_reason().unwrap_or("Server Error")),
        };

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(_source: serde_json::Error) -> Self {
        tracing::error!("{:?}", _source);
        ProxyError::InternalServerError
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_categories_are_stable() {
        let mismatch = ProxyError::RoleMismatch {
            requested: "other-role".into(),
            resolved: "deploy-bot".into(),
        };
        assert_eq!(mismatch.category(), "role_names_do_not_match");

        let missing = ProxyError::ContainerNotFound {
            ip: "172.17.0.2".parse().unwrap(),
            message: "not listed".into(),
        };
        assert_eq!(missing.category(), "could_not_find_container");

        let assume = ProxyError::AssumeRole {
            arn: "arn:aws:iam::111122223333:role/deploy-bot".into(),
            message: "AccessDenied".into(),
        };
        assert_eq!(assume.category(), "could_not_assume_role");
    }

    #[tokio::test]
    async fn test_resolution_errors_render_plain_404() {
        let response = ProxyError::RoleNotConfigured("abc123".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], constants::NOT_FOUND_BODY.as_bytes());
    }

    #[test]
    fn test_upstream_error_is_bad_gateway() {
        let response = ProxyError::Upstream("connection refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
