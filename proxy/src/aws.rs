// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! AWS SDK implementations of the IAM and STS collaborators.

use anyhow::anyhow;
use async_trait::async_trait;
use aws_config::SdkConfig;
use chrono::DateTime;

use crate::credentials::{AssumeRoleRequest, StsAuthority};
use crate::models::{AssumedCredentials, RoleDescriptor};
use crate::roles::IamAuthority;

pub struct AwsIam {
    client: aws_sdk_iam::Client,
}

impl AwsIam {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_iam::Client::new(config),
        }
    }
}

#[async_trait]
impl IamAuthority for AwsIam {
    async fn get_role(&self, role_name: &str) -> anyhow::Result<RoleDescriptor> {
        let output = self
            .client
            .get_role()
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| anyhow!("{}", aws_sdk_iam::error::DisplayErrorContext(e)))?;

        let role = output
            .role()
            .ok_or_else(|| anyhow!("GetRole returned no role for {}", role_name))?;

        Ok(RoleDescriptor {
            name: role.role_name().to_string(),
            arn: role.arn().to_string(),
        })
    }
}

pub struct AwsSts {
    client: aws_sdk_sts::Client,
}

impl AwsSts {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_sts::Client::new(config),
        }
    }
}

#[async_trait]
impl StsAuthority for AwsSts {
    async fn assume_role(&self, request: AssumeRoleRequest) -> anyhow::Result<AssumedCredentials> {
        let output = self
            .client
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.session_name)
            .set_external_id(request.external_id.clone())
            .send()
            .await
            .map_err(|e| anyhow!("{}", aws_sdk_sts::error::DisplayErrorContext(e)))?;

        let credentials = output
            .credentials()
            .ok_or_else(|| anyhow!("AssumeRole returned no credentials for {}", request.role_arn))?;

        let smithy_expiration = credentials.expiration();
        let expiration =
            DateTime::from_timestamp(smithy_expiration.secs(), smithy_expiration.subsec_nanos())
                .ok_or_else(|| anyhow!("invalid expiration {}", smithy_expiration))?;

        let (assumed_role_arn, assumed_role_id) = output
            .assumed_role_user()
            .map(|user| (user.arn().to_string(), user.assumed_role_id().to_string()))
            .unwrap_or_default();

        Ok(AssumedCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration,
            assumed_role_arn,
            assumed_role_id,
        })
    }
}
