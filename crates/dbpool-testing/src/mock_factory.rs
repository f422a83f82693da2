//! Mock connection factory for unit and integration tests.
//!
//! [`MockFactory`] hands out [`MockConnection`]s without touching the
//! network and records every open and close, so tests can assert exactly
//! which handles the registry created and destroyed.
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool::{Registry, RegistryConfig};
//! use dbpool_testing::MockFactory;
//!
//! let factory = MockFactory::builder().fail_after(3).build();
//! let registry = Registry::new(config, factory)?;
//! registry.initialize().await?;
//!
//! assert_eq!(registry.factory().opened(), 2);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dbpool::{ConnectionFactory, PoolError, ResourceDescriptor};
use parking_lot::Mutex;
use thiserror::Error;

/// Error returned by [`MockConnection::execute`].
#[derive(Debug, Error)]
pub enum MockConnectionError {
    /// The connection was already disconnected by its factory.
    #[error("connection {0} is closed")]
    Closed(u64),

    /// The statement text was empty.
    #[error("empty statement")]
    EmptyStatement,
}

/// A fake live connection.
#[derive(Debug)]
pub struct MockConnection {
    serial: u64,
    class: String,
    database: String,
    executed: u64,
    open: Arc<AtomicBool>,
}

impl MockConnection {
    /// Factory-wide serial number of this connection.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Resource-class name the connection was opened for.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Database name taken from the descriptor.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Number of statements run on this connection.
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Check if the factory has not closed this connection yet.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Pretend to run a statement, returning a fake affected-row count.
    pub fn execute(&mut self, sql: &str) -> Result<u64, MockConnectionError> {
        if !self.is_open() {
            return Err(MockConnectionError::Closed(self.serial));
        }
        if sql.trim().is_empty() {
            return Err(MockConnectionError::EmptyStatement);
        }
        self.executed += 1;
        Ok(1)
    }
}

/// Builder for [`MockFactory`].
#[derive(Debug, Default)]
pub struct MockFactoryBuilder {
    connect_delay: Option<Duration>,
    fail_after: Option<u64>,
}

impl MockFactoryBuilder {
    /// Sleep this long inside every `connect`.
    #[must_use]
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Refuse every connection after the first `count` succeed.
    #[must_use]
    pub fn fail_after(mut self, count: u64) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Build the factory.
    #[must_use]
    pub fn build(self) -> MockFactory {
        MockFactory {
            connect_delay: self.connect_delay,
            fail_after: self.fail_after,
            refusing: AtomicBool::new(false),
            next_serial: AtomicU64::new(0),
            log: Mutex::new(FactoryLog::default()),
        }
    }
}

#[derive(Debug, Default)]
struct FactoryLog {
    opened: Vec<u64>,
    closed: Vec<u64>,
    refused: u64,
    handles: Vec<(u64, Arc<AtomicBool>)>,
}

/// Connection factory that records opens and closes in memory.
#[derive(Debug)]
pub struct MockFactory {
    connect_delay: Option<Duration>,
    fail_after: Option<u64>,
    refusing: AtomicBool,
    next_serial: AtomicU64,
    log: Mutex<FactoryLog>,
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MockFactory {
    /// Create a factory that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory builder.
    #[must_use]
    pub fn builder() -> MockFactoryBuilder {
        MockFactoryBuilder::default()
    }

    /// Simulate an outage: while set, every `connect` fails.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of connections opened so far.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.log.lock().opened.len()
    }

    /// Number of connections closed so far.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.log.lock().closed.len()
    }

    /// Number of refused connection attempts.
    #[must_use]
    pub fn refused(&self) -> u64 {
        self.log.lock().refused
    }

    /// Serials of closed connections, in close order.
    #[must_use]
    pub fn closed_serials(&self) -> Vec<u64> {
        self.log.lock().closed.clone()
    }

    /// Connections opened and not yet closed.
    #[must_use]
    pub fn live(&self) -> usize {
        self.log
            .lock()
            .handles
            .iter()
            .filter(|(_, open)| open.load(Ordering::SeqCst))
            .count()
    }
}

fn connection_error(descriptor: &ResourceDescriptor, reason: &str) -> PoolError {
    PoolError::ConnectionCreation(format!(
        "{}@{}:{}: {reason}",
        descriptor.name, descriptor.connection.host, descriptor.connection.port
    ))
}

#[async_trait::async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    async fn connect(&self, descriptor: &ResourceDescriptor) -> Result<MockConnection, PoolError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.refusing.load(Ordering::SeqCst) {
            self.log.lock().refused += 1;
            return Err(connection_error(descriptor, "connection refused"));
        }
        let open = Arc::new(AtomicBool::new(true));
        let serial = {
            let mut log = self.log.lock();
            if self
                .fail_after
                .is_some_and(|limit| log.opened.len() as u64 >= limit)
            {
                log.refused += 1;
                None
            } else {
                let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
                log.opened.push(serial);
                log.handles.push((serial, Arc::clone(&open)));
                Some(serial)
            }
        };
        let Some(serial) = serial else {
            return Err(connection_error(descriptor, "too many connections"));
        };
        tracing::trace!(serial, class = %descriptor.name, "mock connection opened");

        Ok(MockConnection {
            serial,
            class: descriptor.name.clone(),
            database: descriptor.connection.database.clone(),
            executed: 0,
            open,
        })
    }

    async fn disconnect(&self, connection: MockConnection) {
        connection.open.store(false, Ordering::SeqCst);
        self.log.lock().closed.push(connection.serial);
        tracing::trace!(serial = connection.serial, "mock connection closed");
    }
}
