//! # dbpool
//!
//! Connection pooling across several named resource classes.
//!
//! Each resource class (one logical database, say) has its own descriptor
//! with four capacity numbers, its own idle stack and active set, and its
//! own lock. Callers acquire a handle by class name and release it when
//! done; the pool reuses idle handles and sheds the excess.
//!
//! ## Features
//!
//! - Pre-warmed idle connections at startup (`initial_size`)
//! - Hard ceiling on checked-out handles (`max_active`), reported
//!   immediately instead of queued
//! - Opportunistic top-up when idle supply drops to `min_idle`
//! - Excess handles closed on return once idle reaches `max_idle`
//! - Optional bounded wait with timeout
//! - Per-class status snapshots and `tracing` state dumps
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool::{Registry, RegistryConfig, ResourceDescriptor};
//!
//! let config = RegistryConfig::new().driver(
//!     ResourceDescriptor::new("demo")
//!         .initial_size(2)
//!         .min_idle(1)
//!         .max_idle(3)
//!         .max_active(10),
//! );
//!
//! let registry = Registry::new(config, factory)?;
//! registry.initialize().await?;
//!
//! let conn = registry.acquire("demo").await?;
//! // Use connection...
//! conn.release().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod pool;
pub mod registry;

pub use config::{ConnectionParams, RegistryConfig, ResourceDescriptor, TopUpPolicy};
pub use error::{PoolError, ReleaseError, Result};
pub use handle::{Handle, HandleId, PooledConnection};
pub use lifecycle::{ConnectionFactory, ConnectionMetadata, ConnectionState};
pub use pool::PoolStatus;
pub use registry::Registry;
