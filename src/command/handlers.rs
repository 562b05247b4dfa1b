/// Commands answered by the proxy itself
///
/// Replies are status text laid out for humans running `redis-cli` against
/// the proxy. Mapping changes are applied to the live routing table and,
/// when a state file is configured, written out for the operator.
use bytes::Bytes;
use std::fmt::Write;
use std::path::Path;
use tracing::info;

use crate::command::CommandTable;
use crate::config::{ConfigError, HashMapping, KeyMapping, MappingState};
use crate::protocol::reply;
use crate::protocol::resp::Message;
use crate::routing::RoutingTable;

/// Reply from an admin handler plus whether the routing table changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminReply {
    pub reply: Bytes,
    pub changed: bool,
}

impl AdminReply {
    fn unchanged(reply: &'static [u8]) -> Self {
        Self {
            reply: Bytes::from_static(reply),
            changed: false,
        }
    }

    fn ok() -> Self {
        Self {
            reply: Bytes::from_static(reply::OK),
            changed: true,
        }
    }
}

pub fn ping() -> Bytes {
    Bytes::from_static(reply::PONG)
}

/// `AUTH <password>`; marks the session authenticated on a match
pub fn auth(request: &Message, password: Option<&str>, authenticated: &mut bool) -> Bytes {
    if request.token_count() != 2 {
        return Bytes::from_static(reply::WRONG_ARITY);
    }
    let Some(expected) = password else {
        return Bytes::from_static(reply::AUTH_NOT_SET);
    };

    if request.token(1) == Some(expected.as_bytes()) {
        *authenticated = true;
        Bytes::from_static(reply::OK)
    } else {
        Bytes::from_static(reply::AUTH_INVALID)
    }
}

pub fn show_cmd(table: &CommandTable) -> Bytes {
    let mut out = String::from("+ *** Support the command ***\n[Redis Command]\n");
    for spec in table.commands().iter().filter(|c| c.is_backend_command()) {
        out.push_str(spec.name);
        out.push(' ');
    }
    out.push_str("\n\n[Proxy Command]\n");
    for spec in table.commands().iter().filter(|c| !c.is_backend_command()) {
        out.push_str(spec.name);
        out.push(' ');
    }
    out.push_str("\n\r\n");
    Bytes::from(out)
}

/// `HASHMAPPING <slot> <group>`
pub fn hash_mapping(routing: &RoutingTable, request: &Message) -> AdminReply {
    if request.token_count() != 3 {
        return AdminReply::unchanged(reply::HASHMAPPING_USAGE);
    }

    let Some(group) = request.token(2).and_then(|name| routing.group_by_name(name)) else {
        return AdminReply::unchanged(reply::GROUP_NOT_EXISTS);
    };

    let slot = request
        .token(1)
        .and_then(|raw| btoi::btoi::<i64>(raw).ok())
        .and_then(|n| usize::try_from(n).ok());
    match slot {
        Some(index) if routing.set_slot(index, group) => {
            info!("Slot {} mapped to group {}", index, group.name());
            AdminReply::ok()
        }
        _ => AdminReply::unchanged(reply::INVALID_HASH_VALUE),
    }
}

/// `ADDKEYMAPPING <group> <key>...`
pub fn add_key_mapping(routing: &RoutingTable, request: &Message) -> AdminReply {
    if request.token_count() <= 2 {
        return AdminReply::unchanged(reply::ADDKEYMAPPING_USAGE);
    }

    let Some(group) = request.token(1).and_then(|name| routing.group_by_name(name)) else {
        return AdminReply::unchanged(reply::GROUP_NOT_EXISTS);
    };

    for key in request.tokens().skip(2) {
        routing.add_key_override(Bytes::copy_from_slice(key), group);
    }
    info!(
        "{} key mappings added to group {}",
        request.token_count() - 2,
        group.name()
    );
    AdminReply::ok()
}

/// `DELKEYMAPPING <key>...`
pub fn del_key_mapping(routing: &RoutingTable, request: &Message) -> AdminReply {
    if request.token_count() <= 1 {
        return AdminReply::unchanged(reply::DELKEYMAPPING_USAGE);
    }

    let removed = request
        .tokens()
        .skip(1)
        .filter(|key| routing.remove_key_override(key))
        .count();
    info!("{} key mappings removed", removed);
    AdminReply::ok()
}

pub fn show_mapping(routing: &RoutingTable) -> Bytes {
    let mut out = String::from("+\n[HASH MAPPING]\n");
    let _ = writeln!(out, "{:<15} {:<15}", "HASH_VALUE", "GROUP_NAME");
    for (index, owner) in routing.slot_owners().iter().enumerate() {
        let _ = writeln!(out, "{:<15} {:<15}", index, owner.as_deref().unwrap_or("-"));
    }

    out.push_str("\n[KEY MAPPING]\n");
    let _ = writeln!(out, "{:<4} {:<15} KEYS", "ID", "NAME");
    let overrides = routing.key_overrides();
    for group in routing.groups() {
        let _ = write!(out, "{:<4} {:<15} ", group.id(), group.name());
        for (key, _) in overrides.iter().filter(|(_, owner)| owner.id() == group.id()) {
            out.push_str(&String::from_utf8_lossy(key));
            out.push(' ');
        }
        out.push('\n');
    }
    out.push_str("\n\r\n");
    Bytes::from(out)
}

pub fn pool_info(routing: &RoutingTable) -> Bytes {
    let mut out = String::from("+");
    let _ = writeln!(
        out,
        "{:<10} {:<20} {:<8} {:<10} {:<12}",
        "GROUP", "HOST", "ACTIVE", "UNACTIVE", "POOLSIZE"
    );
    for group in routing.groups() {
        for servant in group.masters().iter().chain(group.slaves()) {
            let stats = servant.pool_stats();
            let _ = writeln!(
                out,
                "{:<10} {:<20} {:<8} {:<10} {:<12}",
                group.name(),
                servant.addr().to_string(),
                stats.active,
                stats.idle,
                stats.capacity
            );
        }
    }
    out.push_str("\r\n");
    Bytes::from(out)
}

/// Current slot owners and key overrides in configuration form
pub fn mapping_state(routing: &RoutingTable) -> MappingState {
    let hash_mappings = routing
        .slot_owners()
        .into_iter()
        .enumerate()
        .filter_map(|(slot, owner)| owner.map(|group| HashMapping { slot, group }))
        .collect();
    let key_mappings = routing
        .key_overrides()
        .into_iter()
        .map(|(key, group)| KeyMapping {
            key: String::from_utf8_lossy(&key).into_owned(),
            group: group.name().to_string(),
        })
        .collect();

    MappingState {
        hash_mappings,
        key_mappings,
    }
}

/// Write the mapping state after an admin change
pub fn persist_mapping<P: AsRef<Path>>(routing: &RoutingTable, path: P) -> Result<(), ConfigError> {
    let path = path.as_ref();
    mapping_state(routing).save_to_file(path)?;
    info!("Mapping state saved to {}", path.display());
    Ok(())
}
