// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! In-memory TTL caches shared by every request task.
//!
//! Entries are replaced whole, never mutated. A lookup never returns an entry
//! past its deadline, and a periodic sweep drops expired entries so the maps
//! do not grow with roles nobody asks for anymore.
//!
//! Lookups and population are not coalesced: two concurrent misses for the
//! same key both reach the authority and the later insert wins.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::models::{AssumedCredentials, RoleDescriptor};

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_valid(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

pub struct TtlCache<K, V> {
    entries: Arc<RwLock<HashMap<K, CacheEntry<V>>>>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.is_valid(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    /// Stores `value` for `ttl`. A zero TTL stores nothing.
    pub async fn insert(&self, key: K, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Removes expired entries and returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Assumed credentials are keyed by ARN and external ID. Different external
/// IDs may be granted different trust for the same role.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub role_arn: String,
    pub external_id: Option<String>,
}

impl CredentialKey {
    pub fn new(role_arn: &str, external_id: Option<&str>) -> Self {
        Self {
            role_arn: role_arn.to_string(),
            external_id: external_id.filter(|id| !id.is_empty()).map(str::to_string),
        }
    }
}

/// The process-wide caches, built once at startup and handed to the role
/// resolver and the credential broker.
#[derive(Clone, Default)]
pub struct Caches {
    pub roles: TtlCache<String, RoleDescriptor>,
    pub credentials: TtlCache<CredentialKey, AssumedCredentials>,
}

impl Caches {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn purge_expired(&self) -> (usize, usize) {
        let roles = self.roles.purge_expired().await;
        let credentials = self.credentials.purge_expired().await;
        (roles, credentials)
    }

    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let caches = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let (roles, credentials) = caches.purge_expired().await;
                tracing::debug!(
                    "[metadataproxy] cache sweep evicted {} roles and {} credentials",
                    roles,
                    credentials
                );
            }
        })
    }
}
