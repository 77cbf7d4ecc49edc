// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Container identity lookup.
//!
//! The metadata request only carries a source IP. [`ContainerResolver`] maps it
//! to a container by scanning the runtime's listing for a matching network
//! attachment, then inspects the match for its environment and labels.
//!
//! A freshly started container can issue requests before the runtime lists its
//! address, so the list-and-scan step is retried with exponential backoff until
//! the container shows up or the time budget runs out.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::EndpointSettings;

use crate::configuration::ProxyOptions;
use crate::constants::{EXTERNAL_ID_ENV_VAR, ROLE_ENV_VAR};
use crate::errors::ProxyError;
use crate::models::{ContainerRecord, ContainerSummary};
use crate::request::{RequestContext, label_name};
use crate::retry::ExponentialBackoff;

/// Read-only view of the container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Every container the runtime knows about, including ones still starting.
    async fn list_containers(&self) -> anyhow::Result<Vec<ContainerSummary>>;
    async fn inspect_container(&self, id: &str) -> anyhow::Result<ContainerRecord>;
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using `DOCKER_HOST` or the local socket and checks that the
    /// daemon answers.
    pub async fn connect() -> anyhow::Result<Self> {
        tracing::info!("[metadataproxy] connecting to Docker daemon");
        let docker =
            Docker::connect_with_local_defaults().context("could not create Docker client")?;
        let info = docker.info().await.context("could not get Docker info")?;

        tracing::info!(
            "[metadataproxy] connected to Docker daemon: {} @ {}",
            info.name.unwrap_or_default(),
            info.server_version.unwrap_or_default()
        );

        Ok(Self { docker })
    }
}

fn attachment_addresses(
    networks: Option<std::collections::HashMap<String, EndpointSettings>>,
) -> BTreeMap<String, String> {
    networks
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(name, endpoint)| {
            endpoint
                .ip_address
                .filter(|ip| !ip.is_empty())
                .map(|ip| (name, ip))
        })
        .collect()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> anyhow::Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .filter_map(|container| {
                let id = container.id?;
                Some(ContainerSummary {
                    id,
                    names: container.names.unwrap_or_default(),
                    networks: attachment_addresses(
                        container.network_settings.and_then(|settings| settings.networks),
                    ),
                })
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> anyhow::Result<ContainerRecord> {
        let inspected = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        let config = inspected
            .config
            .ok_or_else(|| anyhow!("container {} has no config", id))?;

        Ok(ContainerRecord {
            id: inspected.id.unwrap_or_else(|| id.to_string()),
            name: inspected.name.unwrap_or_default(),
            networks: attachment_addresses(
                inspected.network_settings.and_then(|settings| settings.networks),
            ),
            env: config.env.unwrap_or_default(),
            labels: config.labels.unwrap_or_default(),
        })
    }
}

fn address_matches(address: &str, ip: IpAddr) -> bool {
    address
        .parse::<IpAddr>()
        .is_ok_and(|candidate| candidate.to_canonical() == ip)
}

/// Container Identity Resolver.
pub struct ContainerResolver {
    runtime: Arc<dyn ContainerRuntime>,
    backoff: ExponentialBackoff,
    default_role: Option<String>,
    copy_labels: Vec<String>,
    copy_env: Vec<String>,
}

impl ContainerResolver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, options: &ProxyOptions) -> Self {
        Self {
            runtime,
            backoff: ExponentialBackoff::new(
                options.container_lookup_initial_interval,
                options.container_lookup_max_elapsed,
            ),
            default_role: options.default_role.clone().filter(|role| !role.is_empty()),
            copy_labels: options.copied_docker_labels(),
            copy_env: options.copied_docker_env(),
        }
    }

    /// Finds the container owning `ip`, retrying while the runtime catches up.
    pub async fn resolve(
        &self,
        ip: IpAddr,
        context: &mut RequestContext,
    ) -> Result<ContainerRecord, ProxyError> {
        let ip = ip.to_canonical();
        let span = context.span().clone();
        tracing::info!(parent: &span, "[metadataproxy] looking up container info for {}", ip);

        let container = self
            .backoff
            .retry(
                || self.find_once(ip),
                |error, wait| {
                    tracing::warn!(parent: &span, "[metadataproxy] {} (retrying in {:?})", error, wait)
                },
            )
            .await?;

        self.record_container(&container, context);
        Ok(container)
    }

    /// A single list-and-inspect attempt without retries.
    pub async fn find_once(&self, ip: IpAddr) -> Result<ContainerRecord, ProxyError> {
        let ip = ip.to_canonical();
        let not_found = |message: String| ProxyError::ContainerNotFound { ip, message };

        let containers = self
            .runtime
            .list_containers()
            .await
            .map_err(|e| not_found(format!("{:#}", e)))?;

        let (summary, network) = containers
            .iter()
            .find_map(|container| {
                container
                    .networks
                    .iter()
                    .find(|(_, address)| address_matches(address, ip))
                    .map(|(network, _)| (container, network))
            })
            .ok_or_else(|| not_found("no container attached with that address".to_string()))?;

        tracing::debug!(
            "[metadataproxy] found container IP {} in {:?} within network {}",
            ip,
            summary.names,
            network
        );

        self.runtime
            .inspect_container(&summary.id)
            .await
            .map_err(|e| not_found(format!("{:#}", e)))
    }

    /// Copies the container id and the allow-listed labels and environment
    /// variables into the request context.
    pub fn record_container(&self, container: &ContainerRecord, context: &mut RequestContext) {
        context.set_log_label("container_id", &container.id);
        context.set_labels(self.telemetry_labels(container));
    }

    fn telemetry_labels(&self, container: &ContainerRecord) -> Vec<(String, String)> {
        let labels = self.copy_labels.iter().filter_map(|name| {
            container
                .label_value(name)
                .map(|value| (label_name("container", name), value.to_string()))
        });
        let env = self.copy_env.iter().filter_map(|name| {
            container
                .env_value(name)
                .map(|value| (label_name("container", name), value.to_string()))
        });
        labels.chain(env).collect()
    }

    /// Raw role identifier for `container`, falling back to the default role.
    pub fn role_identifier(&self, container: &ContainerRecord) -> Result<String, ProxyError> {
        if let Some(role) = container.env_value(ROLE_ENV_VAR).filter(|v| !v.is_empty()) {
            return Ok(role.to_string());
        }

        match &self.default_role {
            Some(role) => {
                tracing::info!(
                    "[metadataproxy] no {} in container {}, using default role {}",
                    ROLE_ENV_VAR,
                    container.id,
                    role
                );
                Ok(role.clone())
            }
            None => Err(ProxyError::RoleNotConfigured(container.id.clone())),
        }
    }

    pub fn external_id(&self, container: &ContainerRecord) -> Option<String> {
        container
            .env_value(EXTERNAL_ID_ENV_VAR)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Lists `container` only from the `visible_from`-th listing onwards.
    struct LaggingRuntime {
        container: ContainerRecord,
        visible_from: usize,
        list_calls: AtomicUsize,
    }

    #[async_trait]
    impl ContainerRuntime for LaggingRuntime {
        async fn list_containers(&self) -> anyhow::Result<Vec<ContainerSummary>> {
            let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < self.visible_from {
                return Ok(Vec::new());
            }
            Ok(vec![ContainerSummary {
                id: self.container.id.clone(),
                names: vec![self.container.name.clone()],
                networks: self.container.networks.clone(),
            }])
        }

        async fn inspect_container(&self, id: &str) -> anyhow::Result<ContainerRecord> {
            if id == self.container.id {
                Ok(self.container.clone())
            } else {
                Err(anyhow!("no such container: {}", id))
            }
        }
    }

    struct BrokenRuntime;

    #[async_trait]
    impl ContainerRuntime for BrokenRuntime {
        async fn list_containers(&self) -> anyhow::Result<Vec<ContainerSummary>> {
            Err(anyhow!("Cannot connect to the Docker daemon"))
        }

        async fn inspect_container(&self, _id: &str) -> anyhow::Result<ContainerRecord> {
            unreachable!()
        }
    }

    fn container(env: &[&str]) -> ContainerRecord {
        ContainerRecord {
            id: "abc123".into(),
            name: "/deploy-bot".into(),
            networks: BTreeMap::from([("bridge".to_string(), "172.17.0.2".to_string())]),
            env: env.iter().map(|e| e.to_string()).collect(),
            labels: HashMap::from([("com.example.team".to_string(), "payments".to_string())]),
        }
    }

    fn resolver(runtime: Arc<dyn ContainerRuntime>, options: &ProxyOptions) -> ContainerResolver {
        ContainerResolver::new(runtime, options)
    }

    fn context() -> RequestContext {
        RequestContext::new("test", "/latest/meta-data/iam/info", None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_retries_until_listed() {
        let runtime = Arc::new(LaggingRuntime {
            container: container(&["IAM_ROLE=deploy-bot"]),
            visible_from: 4,
            list_calls: AtomicUsize::new(0),
        });
        let resolver = resolver(runtime.clone(), &ProxyOptions::default());

        let found = resolver
            .resolve("172.17.0.2".parse().unwrap(), &mut context())
            .await
            .unwrap();

        assert_eq!(found.id, "abc123");
        assert_eq!(runtime.list_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_gives_up_after_budget() {
        let runtime = Arc::new(LaggingRuntime {
            container: container(&[]),
            visible_from: usize::MAX,
            list_calls: AtomicUsize::new(0),
        });
        let options = ProxyOptions {
            container_lookup_max_elapsed: Duration::from_secs(5),
            ..ProxyOptions::default()
        };
        let resolver = resolver(runtime.clone(), &options);
        let started = tokio::time::Instant::now();

        let result = resolver
            .resolve("172.17.0.9".parse().unwrap(), &mut context())
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.category(), "could_not_find_container");
        assert!(started.elapsed() <= Duration::from_secs(5));
        assert!(runtime.list_calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_errors_are_retried_then_not_found() {
        let options = ProxyOptions {
            container_lookup_max_elapsed: Duration::from_millis(100),
            ..ProxyOptions::default()
        };
        let resolver = resolver(Arc::new(BrokenRuntime), &options);

        let error = resolver
            .resolve("172.17.0.2".parse().unwrap(), &mut context())
            .await
            .unwrap_err();

        assert!(matches!(error, ProxyError::ContainerNotFound { .. }));
        assert!(error.to_string().contains("Docker daemon"));
    }

    #[tokio::test]
    async fn test_ipv4_mapped_peer_matches() {
        let runtime = Arc::new(LaggingRuntime {
            container: container(&[]),
            visible_from: 0,
            list_calls: AtomicUsize::new(0),
        });
        let resolver = resolver(runtime, &ProxyOptions::default());

        let found = resolver.find_once("::ffff:172.17.0.2".parse().unwrap()).await;
        assert!(found.is_ok());
    }

    #[tokio::test]
    async fn test_copied_labels_and_env_reach_context() {
        let runtime = Arc::new(LaggingRuntime {
            container: container(&["SERVICE_NAME=billing"]),
            visible_from: 0,
            list_calls: AtomicUsize::new(0),
        });
        let options = ProxyOptions {
            copy_docker_labels: vec!["com.example.team".into(), "missing".into()],
            copy_docker_env: vec!["SERVICE_NAME".into()],
            ..ProxyOptions::default()
        };
        let resolver = resolver(runtime, &options);
        let mut context = context();

        resolver
            .resolve("172.17.0.2".parse().unwrap(), &mut context)
            .await
            .unwrap();

        assert_eq!(context.label("container_com.example.team"), Some("payments"));
        assert_eq!(context.label("container_service_name"), Some("billing"));
        assert_eq!(context.label("container_missing"), None);
    }

    #[test]
    fn test_role_identifier_and_default_role() {
        let options = ProxyOptions {
            default_role: Some("fallback-role".into()),
            ..ProxyOptions::default()
        };
        let with_default = resolver(Arc::new(BrokenRuntime), &options);
        let without_default = resolver(Arc::new(BrokenRuntime), &ProxyOptions::default());

        let configured = container(&["IAM_ROLE=deploy-bot"]);
        assert_eq!(with_default.role_identifier(&configured).unwrap(), "deploy-bot");

        let bare = container(&["PATH=/usr/bin"]);
        assert_eq!(with_default.role_identifier(&bare).unwrap(), "fallback-role");
        assert_eq!(
            without_default.role_identifier(&bare).unwrap_err(),
            ProxyError::RoleNotConfigured("abc123".into())
        );
    }

    #[test]
    fn test_external_id() {
        let resolver = resolver(Arc::new(BrokenRuntime), &ProxyOptions::default());

        let with_id = container(&["IAM_EXTERNAL_ID=tenant-a"]);
        assert_eq!(resolver.external_id(&with_id), Some("tenant-a".to_string()));

        let empty = container(&["IAM_EXTERNAL_ID="]);
        assert_eq!(resolver.external_id(&empty), None);
    }
}
