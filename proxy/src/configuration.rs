// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::constants;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct ProxyOptions {
    #[arg(long, default_value = "0.0.0.0", env("HTTP_HOST"))]
    pub host: String,
    #[arg(long, default_value = "8000", env("HTTP_PORT"))]
    pub port: u16,
    /// Role used when a container has no `IAM_ROLE` environment variable
    #[arg(long, env("DEFAULT_ROLE"))]
    pub default_role: Option<String>,
    /// Container labels mirrored into telemetry
    #[arg(long, env("COPY_DOCKER_LABELS"), value_delimiter = ',')]
    pub copy_docker_labels: Vec<String>,
    /// Container environment variables mirrored into telemetry
    #[arg(long, env("COPY_DOCKER_ENV"), value_delimiter = ',')]
    pub copy_docker_env: Vec<String>,
    /// Request headers mirrored into telemetry
    #[arg(long, env("COPY_REQUEST_HEADERS"), value_delimiter = ',')]
    pub copy_request_headers: Vec<String>,
    /// Subtracted from the STS expiration before caching assumed credentials
    #[arg(long, default_value = "15m", env("CREDENTIAL_TTL_OFFSET"), value_parser = humantime::parse_duration)]
    pub credential_ttl_offset: Duration,
    #[arg(long, default_value = "1h", env("ROLE_CACHE_TTL"), value_parser = humantime::parse_duration)]
    pub role_cache_ttl: Duration,
    #[arg(long, default_value = "10m", env("CACHE_SWEEP_INTERVAL"), value_parser = humantime::parse_duration)]
    pub cache_sweep_interval: Duration,
    #[arg(long, default_value = constants::MIN_API_VERSION, env("MIN_API_VERSION"))]
    pub min_api_version: String,
    /// Address of the real instance metadata service
    #[arg(long, default_value = constants::METADATA_ENDPOINT, env("METADATA_ENDPOINT"))]
    pub metadata_endpoint: String,
    #[arg(long, default_value = "5ms", env("CONTAINER_LOOKUP_INITIAL_INTERVAL"), value_parser = humantime::parse_duration)]
    pub container_lookup_initial_interval: Duration,
    #[arg(long, default_value = "5s", env("CONTAINER_LOOKUP_MAX_ELAPSED"), value_parser = humantime::parse_duration)]
    pub container_lookup_max_elapsed: Duration,
    #[arg(long, default_value = "15s", env("REQUEST_TIMEOUT"), value_parser = humantime::parse_duration)]
    pub request_timeout: Duration,
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env("LOG_FORMAT"))]
    pub log_format: LogFormat,
}

impl ProxyOptions {
    /// Allow-lists with blank entries removed; an unset env var arrives as `[""]`.
    pub fn copied_docker_labels(&self) -> Vec<String> {
        non_empty(&self.copy_docker_labels)
    }

    pub fn copied_docker_env(&self) -> Vec<String> {
        non_empty(&self.copy_docker_env)
    }

    pub fn copied_request_headers(&self) -> Vec<String> {
        non_empty(&self.copy_request_headers)
    }
}

fn non_empty(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

impl Default for ProxyOptions {
    fn default() -> Self {
        ProxyOptions {
            host: "0.0.0.0".to_string(),
            port: 8000,
            default_role: None,
            copy_docker_labels: Vec::new(),
            copy_docker_env: Vec::new(),
            copy_request_headers: Vec::new(),
            credential_ttl_offset: constants::CREDENTIAL_TTL_OFFSET,
            role_cache_ttl: constants::ROLE_CACHE_TTL,
            cache_sweep_interval: constants::CACHE_SWEEP_INTERVAL,
            min_api_version: constants::MIN_API_VERSION.to_string(),
            metadata_endpoint: constants::METADATA_ENDPOINT.to_string(),
            container_lookup_initial_interval: constants::CONTAINER_LOOKUP_INITIAL_INTERVAL,
            container_lookup_max_elapsed: constants::CONTAINER_LOOKUP_MAX_ELAPSED,
            request_timeout: constants::REQUEST_TIMEOUT,
            log_format: LogFormat::Text,
        }
    }
}
