//! Connection lifecycle management.
//!
//! This module defines the factory seam the registry uses to open and close
//! connections, plus the metadata it tracks for every pooled handle.

use std::time::{Duration, Instant};

use crate::config::ResourceDescriptor;
use crate::error::PoolError;

/// Creates and destroys live connections for a resource class.
///
/// A factory is a pure function of the descriptor it is handed: it keeps
/// no pool state of its own. The registry wraps every connection it gets
/// back into a [`Handle`](crate::handle::Handle) with a fresh identifier.
///
/// The returned futures are `Send`; releases triggered by a dropped guard
/// run on a spawned task.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The live connection type this factory produces.
    type Connection: Send + 'static;

    /// Establish one connection using the descriptor's parameters.
    ///
    /// Failures should be reported as [`PoolError::ConnectionCreation`].
    async fn connect(&self, descriptor: &ResourceDescriptor) -> Result<Self::Connection, PoolError>;

    /// Close a connection.
    ///
    /// Best-effort: implementations log failures instead of reporting them.
    /// The connection must not be used again.
    async fn disconnect(&self, connection: Self::Connection);
}

/// Where a handle currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// In the idle collection, available for checkout.
    Idle,
    /// Checked out by a caller.
    Active,
    /// Handed to the factory for destruction.
    Closed,
}

impl ConnectionState {
    /// Check if the connection is available for checkout.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if the connection is currently checked out.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection last changed hands.
    pub last_used_at: Instant,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
    /// Current state of the connection.
    pub state: ConnectionState,
}

impl ConnectionMetadata {
    /// Create metadata for a freshly opened connection.
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
            state: ConnectionState::Idle,
        }
    }

    /// Time since the connection was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection last changed hands.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Mark the connection as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
        self.state = ConnectionState::Active;
    }

    /// Mark the connection as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
        self.state = ConnectionState::Idle;
    }

    /// Mark the connection as being destroyed.
    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

impl Default for ConnectionMetadata {
    fn default() -> Self {
        Self::new()
    }
}
