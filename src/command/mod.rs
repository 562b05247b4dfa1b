/// Command registry
///
/// A case-insensitive name lookup built once per proxy. The core only needs
/// to know how a command is handled, where its key sits, and whether it
/// mutates data (for read-balanced groups).
pub mod handlers;
pub mod scatter;

use fnv::FnvHashMap;

/// How a command is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Forwarded verbatim to the group owning token 1
    Key,
    MultiGet,
    MultiSet,
    MultiDel,
    Ping,
    Auth,
    ShowCmd,
    HashMapping,
    AddKeyMapping,
    DelKeyMapping,
    ShowMapping,
    PoolInfo,
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub kind: CommandKind,
    pub mutating: bool,
}

impl CommandSpec {
    /// Part of the backend command set, as opposed to a proxy admin command
    pub fn is_backend_command(&self) -> bool {
        !matches!(
            self.kind,
            CommandKind::ShowCmd
                | CommandKind::HashMapping
                | CommandKind::AddKeyMapping
                | CommandKind::DelKeyMapping
                | CommandKind::ShowMapping
                | CommandKind::PoolInfo
        )
    }
}

const KEY_COMMANDS: &[&str] = &[
    "APPEND", "BITCOUNT", "BITPOS", "DUMP", "DECR", "DECRBY", "EXPIREAT", "EXISTS", "EXPIRE", "GET",
    "GETBIT", "GETRANGE", "GETSET", "HSET", "HSETNX", "HMSET", "HGET", "HMGET", "HINCRBY",
    "HEXISTS", "HLEN", "HDEL", "HKEYS", "HVALS", "HGETALL", "HINCRBYFLOAT", "INCR", "INCRBY",
    "INCRBYFLOAT", "LPUSH", "LPUSHX", "LPOP", "LRANGE", "LREM", "LINDEX", "LINSERT", "LLEN", "LSET",
    "LTRIM", "PSETEX", "PERSIST", "PEXPIRE", "PEXPIREAT", "PTTL", "PFADD", "PFCOUNT", "PFMERGE",
    "RESTORE", "RPOP", "RPUSH", "RPUSHX", "SADD", "SMEMBERS", "SREM", "SPOP", "SCARD", "SISMEMBER",
    "SRANDMEMBER", "SETBIT", "SETRANGE", "STRLEN", "SET", "SETEX", "SETNX", "TTL", "TYPE", "ZADD",
    "ZRANGE", "ZREM", "ZINCRBY", "ZRANK", "ZREVRANK", "ZREVRANGE", "ZRANGEBYSCORE", "ZCOUNT",
    "ZCARD", "ZREMRANGEBYRANK", "ZREMRANGEBYSCORE",
];

const MUTATING_COMMANDS: &[&str] = &[
    "APPEND", "BITPOS", "DUMP", "DEL", "DECR", "DECRBY", "EXPIREAT", "EXISTS", "EXPIRE", "GETSET",
    "HSET", "HSETNX", "HMSET", "HINCRBY", "HDEL", "HINCRBYFLOAT", "INCR", "INCRBY", "INCRBYFLOAT",
    "LPUSH", "LPUSHX", "LPOP", "LREM", "LINSERT", "LSET", "LTRIM", "MSET", "PSETEX", "PERSIST",
    "PEXPIRE", "PEXPIREAT", "PTTL", "PING", "RESTORE", "RPOP", "RPUSH", "RPUSHX", "SADD", "SREM",
    "SPOP", "SETBIT", "SETRANGE", "SET", "SETEX", "SETNX", "TTL", "ZADD", "ZREM", "ZINCRBY",
    "ZREMRANGEBYRANK", "ZREMRANGEBYSCORE",
];

const SPECIAL_COMMANDS: &[(&str, CommandKind)] = &[
    ("AUTH", CommandKind::Auth),
    ("PING", CommandKind::Ping),
    ("MGET", CommandKind::MultiGet),
    ("MSET", CommandKind::MultiSet),
    ("DEL", CommandKind::MultiDel),
    ("SHOWCMD", CommandKind::ShowCmd),
    ("HASHMAPPING", CommandKind::HashMapping),
    ("ADDKEYMAPPING", CommandKind::AddKeyMapping),
    ("DELKEYMAPPING", CommandKind::DelKeyMapping),
    ("SHOWMAPPING", CommandKind::ShowMapping),
    ("POOLINFO", CommandKind::PoolInfo),
];

/// Registered commands, in registration order
pub struct CommandTable {
    commands: Vec<CommandSpec>,
    by_name: FnvHashMap<Vec<u8>, usize>,
}

impl CommandTable {
    pub fn new() -> Self {
        let mut table = Self {
            commands: Vec::new(),
            by_name: FnvHashMap::default(),
        };
        for (name, kind) in SPECIAL_COMMANDS {
            table.register(name, *kind);
        }
        for name in KEY_COMMANDS {
            table.register(name, CommandKind::Key);
        }
        table
    }

    fn register(&mut self, name: &'static str, kind: CommandKind) {
        let spec = CommandSpec {
            name,
            kind,
            mutating: MUTATING_COMMANDS.contains(&name),
        };
        self.by_name.insert(name.as_bytes().to_vec(), self.commands.len());
        self.commands.push(spec);
    }

    /// Case-insensitive lookup
    pub fn lookup(&self, name: &[u8]) -> Option<&CommandSpec> {
        let index = self.by_name.get(&name.to_ascii_uppercase())?;
        self.commands.get(*index)
    }

    pub fn commands(&self) -> &[CommandSpec] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}
