//! Cancela - a sharding proxy for Redis-protocol backends
//!
//! Clients speak plain RESP to the proxy. Every keyed request is routed to
//! one shard group, either through a direct slot table or a consistent-hash
//! ring, and forwarded over pooled backend connections. Multi-key commands
//! are fanned out per key and merged back in argument order. Groups whose
//! servants all went away can be ejected from the table and restored once
//! they come back.

pub mod command;
pub mod config;
pub mod core;
pub mod error;
pub mod group;
pub mod health;
pub mod protocol;
pub mod proxy;
pub mod routing;
pub mod utils;

use bytes::Bytes;
use futures::future::join_all;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, RoutingMode};
use crate::core::servant::{Servant, ServantOptions};
use crate::error::{CancelaError, CancelaResult};
use crate::group::policy::PolicyKind;
use crate::group::Group;
use crate::health::{GroupHealthManager, HealthOptions};
use crate::proxy::{Proxy, ProxyServer};
use crate::routing::hash::HashKind;
use crate::routing::RoutingTable;
use crate::utils::parse_socket_addr;

/// The proxy application assembled from a `Config`
pub struct Cancela {
    config: Config,
    proxy: Option<Arc<Proxy>>,
}

impl Cancela {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            proxy: None,
        }
    }

    /// Get the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The running proxy, once `initialize` succeeded
    pub fn proxy(&self) -> Option<&Arc<Proxy>> {
        self.proxy.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.proxy.is_some()
    }

    /// Build groups, routing and health management, then start every
    /// servant. Servants that cannot be reached yet keep retrying in the
    /// background.
    pub async fn initialize(&mut self) -> CancelaResult<Arc<Proxy>> {
        self.config.validate()?;

        let groups = build_groups(&self.config)?;
        let routing = Arc::new(build_routing(&self.config, groups)?);
        let health = Arc::new(GroupHealthManager::new(
            Arc::clone(&routing),
            HealthOptions::from(&self.config.group_option),
        ));

        join_all(routing.groups().iter().map(|g| g.set_enabled(true))).await;
        let enabled = routing.groups().iter().filter(|g| g.is_enabled()).count();
        if enabled < routing.groups().len() {
            warn!(
                "{} of {} groups have no reachable servant yet",
                routing.groups().len() - enabled,
                routing.groups().len()
            );
        }

        let proxy = Arc::new(Proxy::new(
            routing,
            health,
            self.config.server.password.clone(),
            self.config.server.state_file.as_ref().map(PathBuf::from),
        ));
        self.proxy = Some(Arc::clone(&proxy));
        Ok(proxy)
    }

    /// Serve clients until `shutdown` resolves
    pub async fn run<F>(&mut self, shutdown: F) -> CancelaResult<()>
    where
        F: Future<Output = ()>,
    {
        let proxy = match &self.proxy {
            Some(proxy) => Arc::clone(proxy),
            None => self.initialize().await?,
        };

        let addr: SocketAddr = self.config.server.listen_addr.parse()?;
        let server = ProxyServer::bind(addr, proxy, self.config.server.max_connections).await?;
        info!(
            "Cancela v{} serving {} groups in {:?} mode",
            env!("CARGO_PKG_VERSION"),
            self.config.groups.len(),
            self.config.routing.mode
        );
        server.run(shutdown).await
    }
}

/// One `Group` per configured group, servants in configuration order
pub fn build_groups(config: &Config) -> CancelaResult<Vec<Arc<Group>>> {
    let timeout = config.server.backend_timeout_ms.map(Duration::from_millis);
    let mut groups = Vec::with_capacity(config.groups.len());

    for (id, group_config) in config.groups.iter().enumerate() {
        let policy = PolicyKind::from_name(&group_config.policy).ok_or_else(|| {
            CancelaError::internal(format!("unknown policy {}", group_config.policy))
        })?;
        let mut group = Group::new(id, group_config.name.clone(), group_config.weight, policy);

        for host in &group_config.hosts {
            let addr = parse_socket_addr(&host.addr)?;
            let options = ServantOptions {
                pool_size: host.pool_size,
                connect_timeout: Duration::from_millis(config.server.connect_timeout_ms),
                password: host.password.clone(),
                retry_interval: Duration::from_secs(config.group_option.backend_retry_interval),
                retry_limit: config.group_option.backend_retry_limit,
                backend_timeout: timeout,
            };
            group.add_servant(Arc::new(Servant::new(host.name.clone(), addr, host.master, options)));
        }
        groups.push(Arc::new(group));
    }
    Ok(groups)
}

/// Routing table for the configured mode, with key overrides applied
pub fn build_routing(config: &Config, groups: Vec<Arc<Group>>) -> CancelaResult<RoutingTable> {
    let hasher = HashKind::from_name(&config.routing.hash)
        .ok_or_else(|| CancelaError::internal(format!("unknown hash {}", config.routing.hash)))?;

    let routing = match config.routing.mode {
        RoutingMode::Direct => RoutingTable::direct(hasher, groups, &config.slot_assignments()?),
        RoutingMode::Ring => RoutingTable::ring(hasher, groups),
    };

    for mapping in &config.key_mappings {
        let group = routing
            .group_by_name(mapping.group.as_bytes())
            .cloned()
            .ok_or_else(|| CancelaError::routing(format!("unknown group {}", mapping.group)))?;
        routing.add_key_override(Bytes::from(mapping.key.clone()), &group);
    }
    Ok(routing)
}
