// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use metrics_util::MetricKindMask;

use crate::constants::METRICS_IDLE_TIMEOUT;
use crate::errors::ProxyError;

pub const HTTP_REQUESTS: &str = "metadataproxy_http_requests";
pub const PASSTHROUGH_CONNECT_SECONDS: &str = "metadataproxy_passthrough_connect_seconds";
pub const PASSTHROUGH_REQUEST_SECONDS: &str = "metadataproxy_passthrough_request_seconds";
pub const PASSTHROUGH_TOTAL_SECONDS: &str = "metadataproxy_passthrough_total_seconds";

/// Label values come from callers and container metadata, so series that
/// stop being updated are dropped after [`METRICS_IDLE_TIMEOUT`].
fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new().idle_timeout(
        MetricKindMask::COUNTER | MetricKindMask::GAUGE,
        Some(METRICS_IDLE_TIMEOUT),
    )
}

/// Installs the process-wide Prometheus recorder. The returned handle renders
/// the exposition served on `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, anyhow::Error> {
    let handle = builder().install_recorder()?;

    metrics::describe_counter!(HTTP_REQUESTS, "Requests handled, by handler and outcome");
    metrics::describe_gauge!(
        PASSTHROUGH_CONNECT_SECONDS,
        "Time to resolve and connect to the metadata service"
    );
    metrics::describe_gauge!(
        PASSTHROUGH_REQUEST_SECONDS,
        "Time from connection to upstream response headers"
    );
    metrics::describe_gauge!(PASSTHROUGH_TOTAL_SECONDS, "Total passthrough round trip");

    Ok(handle)
}

pub fn render(handle: Option<&PrometheusHandle>) -> Result<String, ProxyError> {
    handle
        .map(PrometheusHandle::render)
        .ok_or(ProxyError::InternalServerError)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::request::RequestContext;

    #[test]
    fn test_render_without_handle_is_an_error() {
        assert!(render(None).is_err());
    }

    #[test]
    fn test_passthrough_paths_stay_out_of_exposition() {
        let recorder = builder().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            for n in 0..3 {
                let path = format!("/latest/meta-data/scan-{n}");
                RequestContext::new("passthrough-handler", &path, None).incr_counter(HTTP_REQUESTS);
            }
        });

        let rendered = render(Some(&handle)).unwrap();
        assert!(rendered.contains(r#"metadataproxy_http_requests{handler_name="passthrough-handler"} 3"#));
        assert!(!rendered.contains("scan-"));
    }
}
