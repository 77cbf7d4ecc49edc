// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # Metadata Proxy
//!
//! An EC2 instance metadata proxy for Docker hosts that hands each container
//! credentials for its own IAM role instead of the instance role.
//!
//! ## Architecture
//!
//! ```text
//! Container -> 169.254.169.254 (DNAT) -> metadata-proxy -+-> Docker (who is calling?)
//!                                                         +-> IAM (role ARN)
//!                                                         +-> STS (AssumeRole)
//!                                                         +-> real metadata service
//! ```
//!
//! The proxy emulates three IAM endpoints of the metadata API and forwards
//! every other request to the real metadata service:
//!
//! - **Container lookup**: the caller is found by source IP, retrying while
//!   the runtime catches up with freshly started containers
//! - **Role resolution**: `IAM_ROLE` may be a bare name, `name@account` or a
//!   full ARN; only bare names need IAM
//! - **Credential brokering**: STS credentials are cached per role ARN and
//!   external ID until shortly before they expire
//!
//! ## Modules
//!
//! - [`application`]: Axum server, router and shared state
//! - [`aws`]: IAM and STS clients from the AWS SDK
//! - [`cache`]: TTL caches for roles and assumed credentials
//! - [`configuration`]: CLI argument parsing with clap
//! - [`constants`]: Defaults and wire constants
//! - [`credentials`]: STS credential broker
//! - [`docker`]: Container runtime access and caller lookup
//! - [`errors`]: Error categories and their HTTP responses
//! - [`models`]: Container, role and credential types, response bodies
//! - [`passthrough`]: Forwarding to the real metadata service
//! - [`request`]: Per-request log and metric labels
//! - [`retry`]: Exponential backoff
//! - [`roles`]: Role identifier parsing and resolution
//! - [`routes`]: HTTP route handlers
//! - [`telemetry`]: Prometheus recorder and metric names
//!
//! ## Usage
//!
//! ```bash
//! metadata-proxy --port 8000 --default-role app-default --copy-docker-labels com.example.team
//! ```

pub mod application;
pub mod aws;
pub mod cache;
pub mod configuration;
pub mod constants;
pub mod credentials;
pub mod docker;
pub mod errors;
pub mod models;
pub mod passthrough;
pub mod request;
pub mod retry;
pub mod roles;
pub mod routes;
pub mod telemetry;
