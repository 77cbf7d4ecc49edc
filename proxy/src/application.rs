// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::cache::Caches;
use crate::configuration::ProxyOptions;
use crate::constants::ASSUME_ROLE_SESSION_NAME;
use crate::credentials::{CredentialBroker, StsAuthority};
use crate::docker::{ContainerResolver, ContainerRuntime};
use crate::passthrough::PassthroughProxy;
use crate::roles::{IamAuthority, RoleResolver};
use crate::routes;

pub struct AppState {
    pub options: ProxyOptions,
    pub containers: ContainerResolver,
    pub roles: RoleResolver,
    pub credentials: CredentialBroker,
    pub passthrough: PassthroughProxy,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        options: ProxyOptions,
        runtime: Arc<dyn ContainerRuntime>,
        iam: Arc<dyn IamAuthority>,
        sts: Arc<dyn StsAuthority>,
        caches: &Caches,
    ) -> Self {
        Self {
            containers: ContainerResolver::new(runtime, &options),
            roles: RoleResolver::new(iam, caches.roles.clone(), options.role_cache_ttl),
            credentials: CredentialBroker::new(
                sts,
                caches.credentials.clone(),
                options.credential_ttl_offset,
                ASSUME_ROLE_SESSION_NAME,
            ),
            passthrough: PassthroughProxy::new(options.metadata_endpoint.clone()),
            metrics: None,
            options,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    pub async fn build(state: AppState) -> Result<Self, std::io::Error> {
        let address = format!("{}:{}", state.options.host, state.options.port);
        let listener = TcpListener::bind(address).await?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            "[metadataproxy] listening at http://{}:{}",
            state.options.host,
            port
        );

        Ok(Self {
            port,
            listener,
            router: create_router(state),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
}

/// Routes for the emulated endpoints; every other method and path is passed
/// through to the real metadata service.
pub fn create_router(state: AppState) -> Router {
    let request_timeout = state.options.request_timeout;
    let state = Arc::new(state);

    Router::new()
        .route(
            "/{api_version}/meta-data/iam/info",
            get(routes::role_info).fallback(routes::passthrough),
        )
        .route(
            "/{api_version}/meta-data/iam/info/{junk}",
            get(routes::role_info).fallback(routes::passthrough),
        )
        .route(
            "/{api_version}/meta-data/iam/security-credentials",
            get(routes::role_name).fallback(routes::passthrough),
        )
        .route(
            "/{api_version}/meta-data/iam/security-credentials/",
            get(routes::role_name).fallback(routes::passthrough),
        )
        .route(
            "/{api_version}/meta-data/iam/security-credentials/{requested_role}",
            get(routes::credentials).fallback(routes::passthrough),
        )
        .route(
            "/{api_version}/meta-data/iam/security-credentials/{requested_role}/",
            get(routes::credentials).fallback(routes::passthrough),
        )
        .route("/metrics", get(routes::metrics).fallback(routes::passthrough))
        .route("/favicon.ico", get(routes::favicon).fallback(routes::passthrough))
        .fallback(routes::passthrough)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[metadataproxy] failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("[metadataproxy] failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("[metadataproxy] shutting down");
}
