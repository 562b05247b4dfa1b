/// Request dispatch
///
/// `Proxy` is shared by every client session. It owns the routing table,
/// the group health manager and the command registry, and turns one parsed
/// client request into the exact reply bytes the client receives.
pub mod client;
pub mod server;

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};

use crate::command::scatter::{self, Aggregation, MultiKind};
use crate::command::{handlers, CommandKind, CommandSpec, CommandTable};
use crate::error::ErrorSeverity;
use crate::health::GroupHealthManager;
use crate::protocol::reply;
use crate::protocol::resp::Message;
use crate::routing::RoutingTable;

pub use client::ClientSession;
pub use server::ProxyServer;

pub struct Proxy {
    routing: Arc<RoutingTable>,
    health: Arc<GroupHealthManager>,
    commands: CommandTable,
    password: Option<String>,
    state_file: Option<PathBuf>,
}

impl Proxy {
    pub fn new(
        routing: Arc<RoutingTable>,
        health: Arc<GroupHealthManager>,
        password: Option<String>,
        state_file: Option<PathBuf>,
    ) -> Self {
        Self {
            routing,
            health,
            commands: CommandTable::new(),
            password,
            state_file,
        }
    }

    pub fn routing(&self) -> &Arc<RoutingTable> {
        &self.routing
    }

    pub fn health(&self) -> &Arc<GroupHealthManager> {
        &self.health
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn requires_auth(&self) -> bool {
        self.password.is_some()
    }

    /// Answer one client request. `authenticated` is the session's auth
    /// flag; AUTH may set it.
    pub async fn dispatch(&self, request: &Message, authenticated: &mut bool) -> Bytes {
        let Some(spec) = request.token(0).and_then(|name| self.commands.lookup(name)) else {
            return Bytes::from_static(reply::PROTO_NOT_SUPPORT);
        };

        if self.requires_auth() && !*authenticated && spec.kind != CommandKind::Auth {
            return Bytes::from_static(reply::NOAUTH);
        }

        match spec.kind {
            CommandKind::Key => self.forward_key(spec, request).await,
            CommandKind::MultiGet => self.scatter(MultiKind::Get, spec, request).await,
            CommandKind::MultiSet => self.scatter(MultiKind::Set, spec, request).await,
            CommandKind::MultiDel => self.scatter(MultiKind::Del, spec, request).await,
            CommandKind::Ping => handlers::ping(),
            CommandKind::Auth => handlers::auth(request, self.password.as_deref(), authenticated),
            CommandKind::ShowCmd => handlers::show_cmd(&self.commands),
            CommandKind::ShowMapping => handlers::show_mapping(&self.routing),
            CommandKind::PoolInfo => handlers::pool_info(&self.routing),
            CommandKind::HashMapping => {
                let outcome = handlers::hash_mapping(&self.routing, request);
                self.after_admin(outcome)
            }
            CommandKind::AddKeyMapping => {
                let outcome = handlers::add_key_mapping(&self.routing, request);
                self.after_admin(outcome)
            }
            CommandKind::DelKeyMapping => {
                let outcome = handlers::del_key_mapping(&self.routing, request);
                self.after_admin(outcome)
            }
        }
    }

    fn after_admin(&self, outcome: handlers::AdminReply) -> Bytes {
        if outcome.changed {
            if let Some(path) = &self.state_file {
                if let Err(e) = handlers::persist_mapping(&self.routing, path) {
                    error!("Failed to persist mapping state: {}", e);
                }
            }
        }
        outcome.reply
    }

    async fn forward_key(&self, spec: &CommandSpec, request: &Message) -> Bytes {
        match request.token(1) {
            Some(key) => self.forward(key, request.raw().clone(), spec.mutating).await,
            None => Bytes::from_static(reply::WRONG_ARITY),
        }
    }

    async fn scatter(&self, kind: MultiKind, spec: &CommandSpec, request: &Message) -> Bytes {
        match scatter::key_count(kind, request) {
            0 => Bytes::from_static(reply::WRONG_ARITY),
            1 => self.forward_key(spec, request).await,
            count => {
                let mut inflight: FuturesUnordered<_> = scatter::split(kind, request)
                    .into_iter()
                    .map(|sub| async move {
                        let reply = self.forward(&sub.key, sub.request, spec.mutating).await;
                        (sub.index, reply)
                    })
                    .collect();

                let mut aggregation = Aggregation::new(kind, count);
                while let Some((index, reply)) = inflight.next().await {
                    if aggregation.complete(index, reply) {
                        break;
                    }
                }
                aggregation.merge()
            }
        }
    }

    /// Send `request` to the group owning `key` and return its reply.
    /// Every failure becomes the request error reply.
    pub async fn forward(&self, key: &[u8], request: Bytes, mutating: bool) -> Bytes {
        let Some(group) = self.routing.resolve(key) else {
            debug!("No group owns key {:?}", String::from_utf8_lossy(key));
            return reply::unavailable();
        };

        let Some(servant) = group.select_servant(mutating) else {
            debug!("Group {} has no usable servant", group.name());
            self.health.report_unavailable(&group);
            return reply::unavailable();
        };

        match servant.execute(request).await {
            Ok(reply) => reply,
            Err(e) => {
                match e.severity() {
                    ErrorSeverity::Critical | ErrorSeverity::Error => {
                        error!("Servant {} failed request: {}", servant.name(), e)
                    }
                    _ => debug!("Servant {} failed request: {}", servant.name(), e),
                }
                reply::unavailable()
            }
        }
    }

    /// Stop every servant and cancel health timers
    pub fn shutdown(&self) {
        self.health.shutdown();
        for group in self.routing.groups() {
            for servant in group.servants() {
                servant.stop();
            }
        }
    }
}
