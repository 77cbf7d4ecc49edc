// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Credential Broker.
//!
//! Assumed credentials are cached per (role ARN, external ID) until their STS
//! expiration minus a safety offset, so a client is never handed credentials
//! that are about to lapse. STS failures are returned as is; retries belong to
//! the SDK transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::cache::{CredentialKey, TtlCache};
use crate::errors::ProxyError;
use crate::models::AssumedCredentials;
use crate::request::RequestContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub session_name: String,
    pub external_id: Option<String>,
}

/// STS, consumed through `AssumeRole` only.
#[async_trait]
pub trait StsAuthority: Send + Sync {
    async fn assume_role(&self, request: AssumeRoleRequest) -> anyhow::Result<AssumedCredentials>;
}

/// Time left before `expiration - offset`, or `None` when that moment has
/// already passed. A `None` means the credentials are served once and not cached.
pub fn cache_ttl(expiration: DateTime<Utc>, offset: Duration, now: DateTime<Utc>) -> Option<Duration> {
    let offset = TimeDelta::from_std(offset).ok()?;
    let usable_until = expiration.checked_sub_signed(offset)?;
    (usable_until - now)
        .to_std()
        .ok()
        .filter(|ttl| !ttl.is_zero())
}

pub struct CredentialBroker {
    sts: Arc<dyn StsAuthority>,
    cache: TtlCache<CredentialKey, AssumedCredentials>,
    safety_offset: Duration,
    session_name: String,
}

impl CredentialBroker {
    pub fn new(
        sts: Arc<dyn StsAuthority>,
        cache: TtlCache<CredentialKey, AssumedCredentials>,
        safety_offset: Duration,
        session_name: impl Into<String>,
    ) -> Self {
        Self {
            sts,
            cache,
            safety_offset,
            session_name: session_name.into(),
        }
    }

    pub async fn assume(
        &self,
        role_arn: &str,
        external_id: Option<&str>,
        context: &mut RequestContext,
    ) -> Result<AssumedCredentials, ProxyError> {
        let span = context.span().clone();
        let key = CredentialKey::new(role_arn, external_id);
        tracing::info!(parent: &span, "[metadataproxy] looking for STS assumed role for {}", role_arn);

        if let Some(credentials) = self.cache.get(&key).await {
            context.set_label("assume_role_from_aws_cache", "hit");
            tracing::info!(parent: &span, "[metadataproxy] found STS assumed role {} in cache", role_arn);
            return Ok(credentials);
        }
        context.set_label("assume_role_from_aws_cache", "miss");

        tracing::info!(parent: &span, "[metadataproxy] requesting STS assume role for {}", role_arn);
        let request = AssumeRoleRequest {
            role_arn: key.role_arn.clone(),
            session_name: self.session_name.clone(),
            external_id: key.external_id.clone(),
        };
        let credentials = self
            .sts
            .assume_role(request)
            .await
            .map_err(|e| ProxyError::AssumeRole {
                arn: role_arn.to_string(),
                message: format!("{:#}", e),
            })?;

        match cache_ttl(credentials.expiration, self.safety_offset, Utc::now()) {
            Some(ttl) => {
                tracing::info!(parent: &span, "[metadataproxy] caching STS assumed role for {} for {:?}", role_arn, ttl);
                self.cache.insert(key, credentials.clone(), ttl).await;
            }
            None => {
                tracing::warn!(
                    parent: &span,
                    "[metadataproxy] credentials for {} expire within the {:?} safety offset, not caching",
                    role_arn,
                    self.safety_offset
                );
            }
        }

        Ok(credentials)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ARN: &str = "arn:aws:iam::111122223333:role/deploy-bot";

    struct FakeSts {
        lifetime: TimeDelta,
        calls: AtomicUsize,
        requests: Mutex<Vec<AssumeRoleRequest>>,
    }

    impl FakeSts {
        fn new(lifetime: TimeDelta) -> Arc<Self> {
            Arc::new(Self {
                lifetime,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl StsAuthority for FakeSts {
        async fn assume_role(&self, request: AssumeRoleRequest) -> anyhow::Result<AssumedCredentials> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if request.role_arn.ends_with("/forbidden") {
                return Err(anyhow!("AccessDenied: not authorized to perform sts:AssumeRole"));
            }
            self.requests.lock().unwrap().push(request.clone());
            Ok(AssumedCredentials {
                access_key_id: format!("ASIA{call}"),
                secret_access_key: "secret".into(),
                session_token: "token".into(),
                expiration: Utc::now() + self.lifetime,
                assumed_role_arn: format!("{}/{}", request.role_arn, request.session_name),
                assumed_role_id: format!("AROA{call}:{}", request.session_name),
            })
        }
    }

    fn broker(sts: Arc<FakeSts>) -> CredentialBroker {
        CredentialBroker::new(sts, TtlCache::new(), Duration::from_secs(15 * 60), "metadataproxy")
    }

    fn context() -> RequestContext {
        RequestContext::new("test", "/latest/meta-data/iam/security-credentials/deploy-bot", None)
    }

    #[test]
    fn test_cache_ttl_respects_offset() {
        let now = Utc::now();
        let expiration = now + TimeDelta::hours(1);
        let offset = Duration::from_secs(15 * 60);

        let ttl = cache_ttl(expiration, offset, now).unwrap();
        let cached_until = now + TimeDelta::from_std(ttl).unwrap();
        assert!(cached_until <= expiration - TimeDelta::from_std(offset).unwrap());
        assert_eq!(ttl, Duration::from_secs(45 * 60));
    }

    #[test]
    fn test_cache_ttl_non_positive_means_no_cache() {
        let now = Utc::now();
        let offset = Duration::from_secs(15 * 60);

        assert_eq!(cache_ttl(now + TimeDelta::minutes(15), offset, now), None);
        assert_eq!(cache_ttl(now + TimeDelta::minutes(5), offset, now), None);
        assert_eq!(cache_ttl(now - TimeDelta::minutes(5), offset, now), None);
    }

    #[tokio::test]
    async fn test_second_assume_is_served_from_cache() {
        let sts = FakeSts::new(TimeDelta::hours(1));
        let broker = broker(sts.clone());

        let mut first = context();
        let a = broker.assume(ARN, None, &mut first).await.unwrap();
        assert_eq!(first.label("assume_role_from_aws_cache"), Some("miss"));

        let mut second = context();
        let b = broker.assume(ARN, None, &mut second).await.unwrap();
        assert_eq!(second.label("assume_role_from_aws_cache"), Some("hit"));

        assert_eq!(a, b);
        assert_eq!(sts.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_external_id_is_part_of_the_key() {
        let sts = FakeSts::new(TimeDelta::hours(1));
        let broker = broker(sts.clone());

        broker.assume(ARN, None, &mut context()).await.unwrap();
        broker.assume(ARN, Some("tenant-a"), &mut context()).await.unwrap();
        broker.assume(ARN, Some("tenant-a"), &mut context()).await.unwrap();
        broker.assume(ARN, Some(""), &mut context()).await.unwrap();

        assert_eq!(sts.calls.load(Ordering::SeqCst), 2);
        let requests = sts.requests.lock().unwrap();
        assert_eq!(requests[0].external_id, None);
        assert_eq!(requests[1].external_id.as_deref(), Some("tenant-a"));
        assert!(requests.iter().all(|r| r.session_name == "metadataproxy"));
    }

    #[tokio::test]
    async fn test_short_lived_credentials_are_not_cached() {
        let sts = FakeSts::new(TimeDelta::minutes(10));
        let broker = broker(sts.clone());

        broker.assume(ARN, None, &mut context()).await.unwrap();
        broker.assume(ARN, None, &mut context()).await.unwrap();

        assert_eq!(sts.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_assume_failure_is_surfaced_and_not_cached() {
        let sts = FakeSts::new(TimeDelta::hours(1));
        let broker = broker(sts.clone());
        let arn = "arn:aws:iam::111122223333:role/forbidden";

        let error = broker.assume(arn, None, &mut context()).await.unwrap_err();
        assert_eq!(error.category(), "could_not_assume_role");
        assert!(error.to_string().contains("AccessDenied"));

        broker.assume(arn, None, &mut context()).await.unwrap_err();
        assert_eq!(sts.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_misses_converge() {
        let sts = FakeSts::new(TimeDelta::hours(1));
        let broker = Arc::new(broker(sts.clone()));

        let (a, b) = tokio::join!(
            {
                let broker = broker.clone();
                tokio::spawn(async move { broker.assume(ARN, None, &mut context()).await })
            },
            {
                let broker = broker.clone();
                tokio::spawn(async move { broker.assume(ARN, None, &mut context()).await })
            }
        );
        let a = a.unwrap().unwrap();
        let b = b.unwrap().unwrap();
        assert!(a.expiration > Utc::now());
        assert!(b.expiration > Utc::now());

        let calls = sts.calls.load(Ordering::SeqCst);
        assert!((1..=2).contains(&calls));

        let cached = broker.assume(ARN, None, &mut context()).await.unwrap();
        assert!(cached == a || cached == b);
        assert_eq!(sts.calls.load(Ordering::SeqCst), calls);
    }
}
