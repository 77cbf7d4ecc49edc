// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

/// Oldest metadata API version that gets credential emulation. Versions are ISO
/// dates, so a plain string comparison orders them chronologically.
pub const MIN_API_VERSION: &str = "2012-01-12";
pub const METADATA_ENDPOINT: &str = "169.254.169.254:80";

pub const ROLE_ENV_VAR: &str = "IAM_ROLE";
pub const EXTERNAL_ID_ENV_VAR: &str = "IAM_EXTERNAL_ID";

pub const ASSUME_ROLE_SESSION_NAME: &str = "metadataproxy";

pub const POWERED_BY_HEADER: &str = "x-powered-by";
pub const PROXY_BY_HEADER: &str = "x-proxy-by";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const SERVER_NAME: &str = "metadataproxy";

/// Layout of every timestamp in an emulated response (Go's `2006-01-02T15:04:05Z`).
pub const AWS_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
/// The real service reports `LastUpdated` as the issuance time, one hour before expiry.
pub const LAST_UPDATED_OFFSET: Duration = Duration::from_secs(60 * 60);

pub const ROLE_CACHE_TTL: Duration = Duration::from_secs(60 * 60); // 1 hour
pub const CREDENTIAL_TTL_OFFSET: Duration = Duration::from_secs(15 * 60); // 15 minutes
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub const CONTAINER_LOOKUP_INITIAL_INTERVAL: Duration = Duration::from_millis(5);
pub const CONTAINER_LOOKUP_MAX_ELAPSED: Duration = Duration::from_secs(5);
pub const BACKOFF_MULTIPLIER: f64 = 1.5;
pub const BACKOFF_RANDOMIZATION_FACTOR: f64 = 0.5;
pub const BACKOFF_MAX_INTERVAL: Duration = Duration::from_secs(1);

pub const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Budget for the label-only container lookup run next to a passthrough.
pub const PASSTHROUGH_LOOKUP_TIMEOUT: Duration = Duration::from_millis(100);
/// Series not updated for this long are dropped from the exposition.
pub const METRICS_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub const NOT_FOUND_BODY: &str = "404 page not found\n";
