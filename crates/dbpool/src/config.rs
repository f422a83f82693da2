//! Resource descriptors and registry configuration.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Default driver kind for connection parameters.
pub const DEFAULT_DRIVER: &str = "mysql";

/// Default character set for connection parameters.
pub const DEFAULT_CHARSET: &str = "utf8mb4";

/// Parameters a factory needs to open one connection.
///
/// The pool never interprets these; they are passed through to the
/// [`ConnectionFactory`](crate::lifecycle::ConnectionFactory) untouched.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    /// Driver kind, e.g. `mysql`.
    pub driver: String,
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Database (schema) name.
    pub database: String,
    /// Connection character set.
    pub charset: String,
    /// Driver-specific options.
    pub options: BTreeMap<String, String>,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            driver: DEFAULT_DRIVER.to_string(),
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            charset: DEFAULT_CHARSET.to_string(),
            options: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("charset", &self.charset)
            .field("options", &self.options)
            .finish()
    }
}

impl ConnectionParams {
    /// Create connection parameters with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the driver kind.
    #[must_use]
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set login credentials.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the character set.
    #[must_use]
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Add a driver-specific option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Static configuration for one resource class.
///
/// This struct is marked `#[non_exhaustive]` so capacity knobs can be added
/// later. Build it with [`ResourceDescriptor::new`] and the setter methods,
/// or deserialize it from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ResourceDescriptor {
    /// Resource-class name; the key callers acquire by.
    pub name: String,

    /// Parameters handed to the factory.
    #[serde(default)]
    pub connection: ConnectionParams,

    /// Handles created into the idle collection by `initialize`.
    #[serde(default = "default_initial_size")]
    pub initial_size: usize,

    /// Idle watermark at or below which an acquire tops the pool up.
    #[serde(default = "default_min_idle")]
    pub min_idle: usize,

    /// Upper bound for the idle collection after a release.
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,

    /// Maximum number of concurrently checked-out handles.
    #[serde(default = "default_max_active")]
    pub max_active: usize,
}

fn default_initial_size() -> usize {
    1
}

fn default_min_idle() -> usize {
    1
}

fn default_max_idle() -> usize {
    5
}

fn default_max_active() -> usize {
    10
}

impl ResourceDescriptor {
    /// Create a descriptor with default capacity and connection parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: ConnectionParams::default(),
            initial_size: default_initial_size(),
            min_idle: default_min_idle(),
            max_idle: default_max_idle(),
            max_active: default_max_active(),
        }
    }

    /// Set the connection parameters.
    #[must_use]
    pub fn connection(mut self, connection: ConnectionParams) -> Self {
        self.connection = connection;
        self
    }

    /// Set the number of handles created at initialization.
    #[must_use]
    pub fn initial_size(mut self, count: usize) -> Self {
        self.initial_size = count;
        self
    }

    /// Set the minimum idle watermark.
    #[must_use]
    pub fn min_idle(mut self, count: usize) -> Self {
        self.min_idle = count;
        self
    }

    /// Set the idle ceiling.
    #[must_use]
    pub fn max_idle(mut self, count: usize) -> Self {
        self.max_idle = count;
        self
    }

    /// Set the active ceiling.
    #[must_use]
    pub fn max_active(mut self, count: usize) -> Self {
        self.max_active = count;
        self
    }

    /// Validate the descriptor.
    ///
    /// Besides the basic sanity checks, `initial_size` may not exceed
    /// `max_idle`: bootstrap puts every initial handle into idle, and idle
    /// never holds more than `max_idle` handles.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.name.trim().is_empty() {
            return Err(PoolError::Configuration(
                "resource class name must not be empty".into(),
            ));
        }
        if self.max_active == 0 {
            return Err(PoolError::Configuration(format!(
                "{}: max_active must be greater than 0",
                self.name
            )));
        }
        if self.min_idle > self.max_idle {
            return Err(PoolError::Configuration(format!(
                "{}: min_idle cannot be greater than max_idle",
                self.name
            )));
        }
        if self.initial_size > self.max_idle {
            return Err(PoolError::Configuration(format!(
                "{}: initial_size cannot be greater than max_idle",
                self.name
            )));
        }
        Ok(())
    }
}

/// How many handles an acquire creates when idle supply is at or below
/// `min_idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopUpPolicy {
    /// Fill idle up to `max_idle` regardless of the active count.
    #[default]
    FillToMaxIdle,
    /// Fill idle up to `min(max_idle, max_active - active)`.
    ///
    /// Never pre-warms more handles than could be checked out at once.
    HeadroomCapped,
}

impl TopUpPolicy {
    /// Number of handles to create for the given class state.
    ///
    /// Returns zero when idle is above the `min_idle` watermark.
    #[must_use]
    pub fn deficit(self, descriptor: &ResourceDescriptor, idle: usize, active: usize) -> usize {
        if idle > descriptor.min_idle {
            return 0;
        }
        let target = match self {
            Self::HeadroomCapped => descriptor
                .max_idle
                .min(descriptor.max_active.saturating_sub(active)),
            Self::FillToMaxIdle => descriptor.max_idle,
        };
        target.saturating_sub(idle)
    }
}

/// Configuration for a whole registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct RegistryConfig {
    /// One descriptor per resource class.
    #[serde(default)]
    pub drivers: Vec<ResourceDescriptor>,

    /// Top-up policy applied to every class.
    #[serde(default)]
    pub top_up: TopUpPolicy,
}

impl RegistryConfig {
    /// Create an empty registry configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource class.
    #[must_use]
    pub fn driver(mut self, descriptor: ResourceDescriptor) -> Self {
        self.drivers.push(descriptor);
        self
    }

    /// Set the top-up policy.
    #[must_use]
    pub fn top_up(mut self, policy: TopUpPolicy) -> Self {
        self.top_up = policy;
        self
    }

    /// Parse a registry configuration from JSON.
    ///
    /// ```rust
    /// use dbpool::RegistryConfig;
    ///
    /// let config = RegistryConfig::from_json_str(r#"{
    ///     "drivers": [
    ///         { "name": "demo", "initial_size": 2, "min_idle": 1, "max_idle": 3, "max_active": 2 }
    ///     ]
    /// }"#).unwrap();
    /// assert_eq!(config.drivers[0].max_active, 2);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self, PoolError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PoolError::Configuration(format!("invalid registry JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a registry configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PoolError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            PoolError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Validate every descriptor and reject duplicate class names.
    pub fn validate(&self) -> Result<(), PoolError> {
        let mut seen = HashSet::with_capacity(self.drivers.len());
        for descriptor in &self.drivers {
            descriptor.validate()?;
            if !seen.insert(descriptor.name.as_str()) {
                return Err(PoolError::Configuration(format!(
                    "duplicate resource class: {}",
                    descriptor.name
                )));
            }
        }
        Ok(())
    }
}
