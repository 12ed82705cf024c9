//! Configuration for sessions and their network role.

use std::path::PathBuf;
use std::time::Duration;
use trellis_core::UserId;

/// Configuration for a replication session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Identity of the local user.
    pub user: UserId,
    /// Apply fetched nodes at the end of every poll.
    pub auto_apply: bool,
    /// Send every committed node to peers as they join (host only).
    pub catch_up_joiners: bool,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user: UserId::new("anonymous"),
            auto_apply: false,
            catch_up_joiners: true,
            event_capacity: 100,
        }
    }
}

/// Builder for session configuration.
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    pub fn user(mut self, user: impl Into<UserId>) -> Self {
        self.config.user = user.into();
        self
    }

    pub fn auto_apply(mut self, enabled: bool) -> Self {
        self.config.auto_apply = enabled;
        self
    }

    pub fn catch_up_joiners(mut self, enabled: bool) -> Self {
        self.config.catch_up_joiners = enabled;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings for hosting a session.
#[derive(Clone, Debug)]
pub struct HostConfig {
    pub port: u16,
    pub timeout: Duration,
    pub password: Option<String>,
    /// Directory the transport may use for cached payloads.
    pub cache_dir: PathBuf,
    /// Log level requested for the transport's own logging.
    pub log_level: String,
    /// Users granted admin rights when they join.
    pub admins: Vec<UserId>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            port: 5555,
            timeout: Duration::from_secs(5),
            password: None,
            cache_dir: PathBuf::from(".trellis-cache"),
            log_level: "info".to_string(),
            admins: Vec::new(),
        }
    }
}

/// Builder for host configuration.
pub struct HostConfigBuilder {
    config: HostConfig,
}

impl HostConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: HostConfig::default(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    pub fn admin(mut self, user: impl Into<UserId>) -> Self {
        self.config.admins.push(user.into());
        self
    }

    pub fn build(self) -> HostConfig {
        self.config
    }
}

impl Default for HostConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings for joining a hosted session.
#[derive(Clone, Debug)]
pub struct ConnectConfig {
    pub address: String,
    pub port: u16,
    pub timeout: Duration,
    pub password: Option<String>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 5555,
            timeout: Duration::from_secs(5),
            password: None,
        }
    }
}

/// Builder for connect configuration.
pub struct ConnectConfigBuilder {
    config: ConnectConfig,
}

impl ConnectConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ConnectConfig::default(),
        }
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    pub fn build(self) -> ConnectConfig {
        self.config
    }
}

impl Default for ConnectConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
