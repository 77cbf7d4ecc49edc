// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use zeroize::ZeroizeOnDrop;

use crate::constants::{AWS_TIME_FORMAT, LAST_UPDATED_OFFSET};

/// Entry of the runtime's container listing. Environment variables are not
/// part of a listing, so a match still needs a full inspect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    /// Network name to IP address.
    pub networks: BTreeMap<String, String>,
}

/// Snapshot of an inspected container. Fetched fresh for every request and
/// never cached, attachments and environment are only valid at lookup time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub networks: BTreeMap<String, String>,
    /// Raw `KEY=value` pairs in runtime order.
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
}

impl ContainerRecord {
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|pair| match pair.split_once('=') {
            Some((k, v)) if k == key => Some(v),
            _ => None,
        })
    }

    pub fn label_value(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Resolved IAM role. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDescriptor {
    pub name: String,
    pub arn: String,
}

/// Temporary credentials returned by STS AssumeRole.
#[derive(Clone, PartialEq, ZeroizeOnDrop)]
pub struct AssumedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    #[zeroize(skip)]
    pub expiration: DateTime<Utc>,
    #[zeroize(skip)]
    pub assumed_role_arn: String,
    #[zeroize(skip)]
    pub assumed_role_id: String,
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for AssumedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssumedCredentials")
            .field("access_key_id", &"[REDACTED]")
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("expiration", &self.expiration)
            .field("assumed_role_arn", &self.assumed_role_arn)
            .field("assumed_role_id", &self.assumed_role_id)
            .finish()
    }
}

impl AssumedCredentials {
    /// Issuance time as the real service reports it.
    pub fn last_updated(&self) -> DateTime<Utc> {
        let offset = TimeDelta::seconds(LAST_UPDATED_OFFSET.as_secs() as i64);
        self.expiration - offset
    }
}

pub fn format_aws_time(time: DateTime<Utc>) -> String {
    time.format(AWS_TIME_FORMAT).to_string()
}

/// Body of `/{api_version}/meta-data/iam/info`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoleInfoResponse {
    #[serde(rename = "Code")]
    pub code: &'static str,
    #[serde(rename = "LastUpdated")]
    pub last_updated: String,
    #[serde(rename = "InstanceProfileArn")]
    pub instance_profile_arn: String,
    #[serde(rename = "InstanceProfileId")]
    pub instance_profile_id: String,
}

impl From<&AssumedCredentials> for RoleInfoResponse {
    fn from(credentials: &AssumedCredentials) -> Self {
        Self {
            code: "Success",
            last_updated: format_aws_time(credentials.last_updated()),
            instance_profile_arn: credentials.assumed_role_arn.clone(),
            instance_profile_id: credentials.assumed_role_id.clone(),
        }
    }
}

/// Body of `/{api_version}/meta-data/iam/security-credentials/{role}`.
/// Borrows the secrets rather than copying them out of the cache entry.
#[derive(Serialize)]
pub struct CredentialsResponse<'a> {
    #[serde(rename = "Code")]
    pub code: &'static str,
    #[serde(rename = "LastUpdated")]
    pub last_updated: String,
    #[serde(rename = "Type")]
    pub credential_type: &'static str,
    #[serde(rename = "AccessKeyId")]
    pub access_key_id: &'a str,
    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: &'a str,
    #[serde(rename = "Token")]
    pub token: &'a str,
    #[serde(rename = "Expiration")]
    pub expiration: String,
}

impl<'a> From<&'a AssumedCredentials> for CredentialsResponse<'a> {
    fn from(credentials: &'a AssumedCredentials) -> Self {
        Self {
            code: "Success",
            last_updated: format_aws_time(credentials.last_updated()),
            credential_type: "AWS-HMAC",
            access_key_id: &credentials.access_key_id,
            secret_access_key: &credentials.secret_access_key,
            token: &credentials.session_token,
            expiration: format_aws_time(credentials.expiration),
        }
    }
}
