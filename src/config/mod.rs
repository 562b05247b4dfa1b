/// Configuration management for cancela

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::group::policy::PolicyKind;
use crate::routing::hash::HashKind;

/// Largest slot table accepted in direct mode
pub const MAX_SLOT_COUNT: usize = 1024;

/// Main cancela configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Routing discipline
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Group health and servant reconnection
    #[serde(default)]
    pub group_option: GroupOptionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Shard groups
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    /// Explicit per-slot overrides (direct mode)
    #[serde(default)]
    pub hash_mappings: Vec<HashMapping>,
    /// Explicit key overrides
    #[serde(default)]
    pub key_mappings: Vec<KeyMapping>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen_addr: String,
    /// Number of worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Shared secret clients must AUTH with
    #[serde(default)]
    pub password: Option<String>,
    /// Deadline for one backend round trip; unset means no deadline
    #[serde(default)]
    pub backend_timeout_ms: Option<u64>,
    /// Backend connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Where admin mapping changes are persisted
    #[serde(default)]
    pub state_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    Direct,
    Ring,
}

/// Routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_mode")]
    pub mode: RoutingMode,
    /// Number of slots in direct mode
    #[serde(default = "default_slot_count")]
    pub slot_count: usize,
    /// Key hash function name
    #[serde(default = "default_hash")]
    pub hash: String,
}

/// One shard group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default = "default_policy")]
    pub policy: String,
    /// First slot owned in direct mode
    #[serde(default)]
    pub hash_min: Option<usize>,
    /// Last slot owned in direct mode (inclusive)
    #[serde(default)]
    pub hash_max: Option<usize>,
    /// Relative share of ring points in ring mode
    #[serde(default = "default_weight")]
    pub weight: u32,
    pub hosts: Vec<HostConfig>,
}

/// One backend host of a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: String,
    pub addr: String,
    #[serde(default = "default_master")]
    pub master: bool,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashMapping {
    pub slot: usize,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMapping {
    pub key: String,
    pub group: String,
}

/// Group health and reconnection options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupOptionConfig {
    /// Seconds between servant reconnect attempts
    #[serde(default = "default_backend_retry_interval")]
    pub backend_retry_interval: u64,
    /// Reconnect attempts before giving up on a servant
    #[serde(default = "default_backend_retry_limit")]
    pub backend_retry_limit: u32,
    /// Seconds an ejected group waits before re-evaluation
    #[serde(default = "default_group_retry_time")]
    pub group_retry_time: u64,
    #[serde(default)]
    pub auto_eject_group: bool,
    #[serde(default)]
    pub eject_after_restore: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
    /// Log to stdout
    pub stdout: bool,
    /// Log file path (optional)
    #[serde(default)]
    pub file: Option<String>,
}

/// Admin mapping state written after runtime changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingState {
    #[serde(default)]
    pub hash_mappings: Vec<HashMapping>,
    #[serde(default)]
    pub key_mappings: Vec<KeyMapping>,
}

fn default_max_connections() -> usize {
    10000
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_mode() -> RoutingMode {
    RoutingMode::Direct
}

fn default_slot_count() -> usize {
    128
}

fn default_hash() -> String {
    "bytes".to_string()
}

fn default_policy() -> String {
    "master_only".to_string()
}

fn default_weight() -> u32 {
    1
}

fn default_master() -> bool {
    true
}

fn default_pool_size() -> usize {
    50
}

fn default_backend_retry_interval() -> u64 {
    1
}

fn default_backend_retry_limit() -> u32 {
    100
}

fn default_group_retry_time() -> u64 {
    30
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            slot_count: default_slot_count(),
            hash: default_hash(),
        }
    }
}

impl Default for GroupOptionConfig {
    fn default() -> Self {
        Self {
            backend_retry_interval: default_backend_retry_interval(),
            backend_retry_limit: default_backend_retry_limit(),
            group_retry_time: default_group_retry_time(),
            auto_eject_group: false,
            eject_after_restore: false,
        }
    }
}

impl HostConfig {
    pub fn new(name: &str, addr: &str, master: bool) -> Self {
        Self {
            name: name.to_string(),
            addr: addr.to_string(),
            master,
            pool_size: default_pool_size(),
            password: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "0.0.0.0:8221".to_string(),
                worker_threads: None, // Use system default
                max_connections: default_max_connections(),
                password: None,
                backend_timeout_ms: None,
                connect_timeout_ms: default_connect_timeout_ms(),
                state_file: None,
            },
            routing: RoutingConfig::default(),
            group_option: GroupOptionConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
                stdout: true,
                file: None,
            },
            groups: vec![GroupConfig {
                name: "group0".to_string(),
                policy: default_policy(),
                hash_min: Some(0),
                hash_max: Some(default_slot_count() - 1),
                weight: default_weight(),
                hosts: vec![HostConfig::new("redis0", "127.0.0.1:6379", true)],
            }],
            hash_mappings: Vec::new(),
            key_mappings: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Index of the group with the given name
    pub fn group_index(&self, name: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.name == name)
    }

    /// Owning group index for every slot in direct mode: the configured
    /// ranges, with `hash_mappings` applied on top.
    pub fn slot_assignments(&self) -> Result<Vec<usize>, ConfigError> {
        let count = self.routing.slot_count;
        let mut owners: Vec<Option<usize>> = vec![None; count];

        for (index, group) in self.groups.iter().enumerate() {
            let (min, max) = match (group.hash_min, group.hash_max) {
                (Some(min), Some(max)) => (min, max),
                (None, None) => continue,
                _ => {
                    return Err(ConfigError::ValidationError(format!(
                        "Group {} must set both hash_min and hash_max",
                        group.name
                    )))
                }
            };
            if min > max {
                return Err(ConfigError::ValidationError(format!(
                    "Group {} has hash_min greater than hash_max",
                    group.name
                )));
            }
            if max >= count {
                return Err(ConfigError::ValidationError(format!(
                    "Group {} hash range exceeds slot_count {}",
                    group.name, count
                )));
            }
            for slot in min..=max {
                if let Some(other) = owners[slot] {
                    return Err(ConfigError::ValidationError(format!(
                        "Slot {} is claimed by both {} and {}",
                        slot, self.groups[other].name, group.name
                    )));
                }
                owners[slot] = Some(index);
            }
        }

        for mapping in &self.hash_mappings {
            let index = self.group_index(&mapping.group).ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "Hash mapping references unknown group: {}",
                    mapping.group
                ))
            })?;
            if mapping.slot >= count {
                return Err(ConfigError::ValidationError(format!(
                    "Hash mapping slot {} out of range",
                    mapping.slot
                )));
            }
            owners[mapping.slot] = Some(index);
        }

        owners
            .into_iter()
            .enumerate()
            .map(|(slot, owner)| {
                owner.ok_or_else(|| {
                    ConfigError::ValidationError(format!("Slot {} is not assigned to any group", slot))
                })
            })
            .collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server config
        self.server
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|_| {
                ConfigError::ValidationError(format!(
                    "Invalid listen address: {}",
                    self.server.listen_addr
                ))
            })?;

        if self.server.worker_threads == Some(0) {
            return Err(ConfigError::ValidationError(
                "worker_threads must be greater than 0".to_string(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        // Validate routing config
        if HashKind::from_name(&self.routing.hash).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "Unknown hash function: {}",
                self.routing.hash
            )));
        }

        if self.routing.mode == RoutingMode::Direct
            && (self.routing.slot_count == 0 || self.routing.slot_count > MAX_SLOT_COUNT)
        {
            return Err(ConfigError::ValidationError(format!(
                "slot_count must be between 1 and {}",
                MAX_SLOT_COUNT
            )));
        }

        // Validate groups
        if self.groups.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one group is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for group in &self.groups {
            if group.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "Group name cannot be empty".to_string(),
                ));
            }
            if !names.insert(group.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate group name: {}",
                    group.name
                )));
            }
            if PolicyKind::from_name(&group.policy).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown policy {} for group {}",
                    group.policy, group.name
                )));
            }
            if group.hosts.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Group {} has no hosts",
                    group.name
                )));
            }
            if self.routing.mode == RoutingMode::Ring && group.weight == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Group {} weight must be greater than 0",
                    group.name
                )));
            }
            for host in &group.hosts {
                host.addr.parse::<std::net::SocketAddr>().map_err(|_| {
                    ConfigError::ValidationError(format!("Invalid host address: {}", host.addr))
                })?;
                if host.pool_size == 0 {
                    return Err(ConfigError::ValidationError(format!(
                        "Host {} pool_size must be greater than 0",
                        host.name
                    )));
                }
            }
        }

        if self.routing.mode == RoutingMode::Direct {
            self.slot_assignments()?;
        }

        for mapping in &self.key_mappings {
            if mapping.key.is_empty() {
                return Err(ConfigError::ValidationError(
                    "Key mapping key cannot be empty".to_string(),
                ));
            }
            if self.group_index(&mapping.group).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "Key mapping references unknown group: {}",
                    mapping.group
                )));
            }
        }

        // Validate group options
        if self.group_option.backend_retry_interval == 0 {
            return Err(ConfigError::ValidationError(
                "backend_retry_interval must be greater than 0".to_string(),
            ));
        }

        if self.group_option.backend_retry_limit == 0 {
            return Err(ConfigError::ValidationError(
                "backend_retry_limit must be greater than 0".to_string(),
            ));
        }

        if self.group_option.auto_eject_group && self.group_option.group_retry_time == 0 {
            return Err(ConfigError::ValidationError(
                "group_retry_time must be greater than 0 when auto_eject_group is set".to_string(),
            ));
        }

        // Validate logging config
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log format: {}", self.logging.format)
            )),
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P, mode: &str) -> Result<(), ConfigError> {
        let group = |name: &str, hosts: Vec<HostConfig>, range: Option<(usize, usize)>| GroupConfig {
            name: name.to_string(),
            policy: default_policy(),
            hash_min: range.map(|r| r.0),
            hash_max: range.map(|r| r.1),
            weight: default_weight(),
            hosts,
        };

        let config = match mode {
            "direct" => Config {
                groups: vec![
                    group(
                        "group0",
                        vec![
                            HostConfig::new("redis0", "10.0.1.20:6379", true),
                            HostConfig::new("redis0-replica", "10.0.1.21:6379", false),
                        ],
                        Some((0, 63)),
                    ),
                    group(
                        "group1",
                        vec![
                            HostConfig::new("redis1", "10.0.1.22:6379", true),
                            HostConfig::new("redis1-replica", "10.0.1.23:6379", false),
                        ],
                        Some((64, 127)),
                    ),
                ],
                ..Default::default()
            },
            "ring" => Config {
                routing: RoutingConfig {
                    mode: RoutingMode::Ring,
                    slot_count: default_slot_count(),
                    hash: "md5".to_string(),
                },
                groups: vec![
                    group("group0", vec![HostConfig::new("redis0", "10.0.1.20:6379", true)], None),
                    group("group1", vec![HostConfig::new("redis1", "10.0.1.21:6379", true)], None),
                    group("group2", vec![HostConfig::new("redis2", "10.0.1.22:6379", true)], None),
                ],
                ..Default::default()
            },
            _ => return Err(ConfigError::ValidationError(
                "Mode must be 'direct' or 'ring'".to_string(),
            )),
        };

        config.save_to_file(path)
    }
}

impl MappingState {
    /// Write the mapping state as TOML
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn two_group_config() -> Config {
        let mut config = Config::default();
        config.routing.slot_count = 4;
        config.groups = vec![
            GroupConfig {
                name: "a".to_string(),
                policy: "master_only".to_string(),
                hash_min: Some(0),
                hash_max: Some(1),
                weight: 1,
                hosts: vec![HostConfig::new("a0", "127.0.0.1:7001", true)],
            },
            GroupConfig {
                name: "b".to_string(),
                policy: "read_balance".to_string(),
                hash_min: Some(2),
                hash_max: Some(3),
                weight: 1,
                hosts: vec![
                    HostConfig::new("b0", "127.0.0.1:7002", true),
                    HostConfig::new("b1", "127.0.0.1:7003", false),
                ],
            },
        ];
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.listen_addr, "0.0.0.0:8221");
        assert_eq!(config.routing.slot_count, 128);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Test invalid max_connections
        config.server.max_connections = 0;
        assert!(config.validate().is_err());

        config.server.max_connections = 1000;
        assert!(config.validate().is_ok());

        config.routing.hash = "sha1".to_string();
        assert!(config.validate().is_err());
        config.routing.hash = "fnv1a_64".to_string();
        assert!(config.validate().is_ok());

        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_slot_assignments() {
        let config = two_group_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.slot_assignments().unwrap(), vec![0, 0, 1, 1]);

        let mut remapped = config.clone();
        remapped.hash_mappings.push(HashMapping {
            slot: 3,
            group: "a".to_string(),
        });
        assert_eq!(remapped.slot_assignments().unwrap(), vec![0, 0, 1, 0]);
    }

    #[test]
    fn test_slot_coverage_errors() {
        let mut gap = two_group_config();
        gap.groups[1].hash_min = Some(3);
        assert!(gap.validate().is_err());

        let mut overlap = two_group_config();
        overlap.groups[1].hash_min = Some(1);
        assert!(overlap.validate().is_err());

        let mut out_of_range = two_group_config();
        out_of_range.groups[1].hash_max = Some(4);
        assert!(out_of_range.validate().is_err());

        let mut too_many = two_group_config();
        too_many.routing.slot_count = MAX_SLOT_COUNT + 1;
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_group_validation() {
        let mut duplicate = two_group_config();
        duplicate.groups[1].name = "a".to_string();
        assert!(duplicate.validate().is_err());

        let mut bad_policy = two_group_config();
        bad_policy.groups[0].policy = "random".to_string();
        assert!(bad_policy.validate().is_err());

        let mut bad_addr = two_group_config();
        bad_addr.groups[0].hosts[0].addr = "not-an-addr".to_string();
        assert!(bad_addr.validate().is_err());

        let mut bad_key = two_group_config();
        bad_key.key_mappings.push(KeyMapping {
            key: "user:1".to_string(),
            group: "missing".to_string(),
        });
        assert!(bad_key.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = two_group_config();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed_config: Config = toml::from_str(&toml_str).unwrap();
        assert!(parsed_config.validate().is_ok());
        assert_eq!(parsed_config.groups.len(), 2);
        assert!(!parsed_config.groups[1].hosts[1].master);
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let toml_str = r#"
            [server]
            listen_addr = "127.0.0.1:8221"

            [logging]
            level = "debug"
            format = "json"
            stdout = true

            [routing]
            mode = "ring"

            [[groups]]
            name = "g0"

            [[groups.hosts]]
            name = "h0"
            addr = "127.0.0.1:6379"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.routing.mode, RoutingMode::Ring);
        assert_eq!(config.groups[0].hosts[0].pool_size, 50);
        assert!(config.groups[0].hosts[0].master);
        assert_eq!(config.group_option.group_retry_time, 30);
    }

    #[test]
    fn test_config_file_operations() {
        let config = Config::default();
        let temp_file = NamedTempFile::new().unwrap();

        // Test save and load
        config.save_to_file(temp_file.path()).unwrap();
        let loaded_config = Config::load_from_file(temp_file.path()).unwrap();
        assert!(loaded_config.validate().is_ok());
    }

    #[test]
    fn test_example_configs() {
        for mode in ["direct", "ring"] {
            let temp_file = NamedTempFile::new().unwrap();
            Config::create_example_config(temp_file.path(), mode).unwrap();
            assert!(Config::load_from_file(temp_file.path()).is_ok());
        }

        let temp_file = NamedTempFile::new().unwrap();
        assert!(Config::create_example_config(temp_file.path(), "cluster").is_err());
    }

    #[test]
    fn test_mapping_state_file() {
        let state = MappingState {
            hash_mappings: vec![HashMapping {
                slot: 7,
                group: "a".to_string(),
            }],
            key_mappings: vec![KeyMapping {
                key: "session".to_string(),
                group: "b".to_string(),
            }],
        };
        let temp_file = NamedTempFile::new().unwrap();
        state.save_to_file(temp_file.path()).unwrap();
        assert_eq!(MappingState::load_from_file(temp_file.path()).unwrap(), state);
    }
}
