// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Role identifier parsing and resolution.
//!
//! Containers name their role in one of three shapes:
//!
//! | Shape | Example | Resolution |
//! |-------|---------|------------|
//! | bare name | `deploy-bot` | IAM `GetRole` |
//! | name at account | `/team/deploy-bot@111122223333` | built locally |
//! | full ARN | `arn:aws:iam::111122223333:role/team/deploy-bot` | used as is |
//!
//! Every resolution is cached under the raw identifier string.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::TtlCache;
use crate::errors::ProxyError;
use crate::models::RoleDescriptor;
use crate::request::RequestContext;

/// IAM control plane, only used to complete bare role names.
#[async_trait]
pub trait IamAuthority: Send + Sync {
    async fn get_role(&self, role_name: &str) -> anyhow::Result<RoleDescriptor>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleIdentifier {
    BareName(String),
    InlineAccount { path: String, account: String },
    FullArn(String),
}

fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl RoleIdentifier {
    pub fn parse(raw: &str) -> Result<Self, ProxyError> {
        let invalid = || ProxyError::InvalidRoleIdentifier(raw.to_string());

        if raw.starts_with("arn:") {
            return match raw.split_once(":role/") {
                Some((_, path)) if !leaf_name(path).is_empty() => Ok(Self::FullArn(raw.to_string())),
                _ => Err(invalid()),
            };
        }

        if let Some((path, account)) = raw.split_once('@') {
            let path = path.trim_start_matches('/');
            if path.is_empty() || account.is_empty() || leaf_name(path).is_empty() {
                return Err(invalid());
            }
            return Ok(Self::InlineAccount {
                path: path.to_string(),
                account: account.to_string(),
            });
        }

        if raw.is_empty() {
            return Err(invalid());
        }
        Ok(Self::BareName(raw.to_string()))
    }

    /// Descriptor built without calling IAM, `None` for bare names.
    pub fn local_descriptor(&self) -> Option<RoleDescriptor> {
        match self {
            Self::BareName(_) => None,
            Self::InlineAccount { path, account } => Some(RoleDescriptor {
                name: leaf_name(path).to_string(),
                arn: format!("arn:aws:iam::{}:role/{}", account, path),
            }),
            Self::FullArn(arn) => {
                let path = arn.split_once(":role/").map_or("", |(_, path)| path);
                Some(RoleDescriptor {
                    name: leaf_name(path).to_string(),
                    arn: arn.clone(),
                })
            }
        }
    }
}

/// Role Resolver.
pub struct RoleResolver {
    iam: Arc<dyn IamAuthority>,
    cache: TtlCache<String, RoleDescriptor>,
    ttl: Duration,
}

impl RoleResolver {
    pub fn new(iam: Arc<dyn IamAuthority>, cache: TtlCache<String, RoleDescriptor>, ttl: Duration) -> Self {
        Self { iam, cache, ttl }
    }

    pub async fn resolve(
        &self,
        raw: &str,
        context: &mut RequestContext,
    ) -> Result<RoleDescriptor, ProxyError> {
        let span = context.span().clone();
        tracing::info!(parent: &span, "[metadataproxy] looking for IAM role for {}", raw);

        if let Some(role) = self.cache.get(&raw.to_string()).await {
            context.set_label("read_role_from_aws_cache", "hit");
            tracing::info!(parent: &span, "[metadataproxy] found IAM role {} in cache", raw);
            return Ok(role);
        }
        context.set_label("read_role_from_aws_cache", "miss");

        let identifier = RoleIdentifier::parse(raw)?;
        let role = match identifier.local_descriptor() {
            Some(role) => {
                tracing::info!(parent: &span, "[metadataproxy] constructed IAM role info for {} locally", raw);
                role
            }
            None => {
                tracing::info!(parent: &span, "[metadataproxy] requesting IAM role info for {} from AWS", raw);
                self.iam
                    .get_role(raw)
                    .await
                    .map_err(|e| ProxyError::ReadRole {
                        role: raw.to_string(),
                        message: format!("{:#}", e),
                    })?
            }
        };

        self.cache.insert(raw.to_string(), role.clone(), self.ttl).await;
        Ok(role)
    }
}
