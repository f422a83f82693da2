//! # dbpool-testing
//!
//! Test infrastructure for the `dbpool` connection registry.
//!
//! This crate provides an in-memory connection factory and fixtures so
//! registry behavior can be tested without a database server.
//!
//! ## Features
//!
//! - Mock factory recording every connection it opens and closes
//! - Injected connection failures (after N opens, or on demand)
//! - Configurable connect latency
//! - Descriptor and registry configuration fixtures
//! - One-shot `tracing` subscriber setup for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool::{Registry, TopUpPolicy};
//! use dbpool_testing::{MockFactory, fixtures};
//!
//! #[tokio::test]
//! async fn test_with_mock_factory() {
//!     let config = fixtures::registry_config(
//!         TopUpPolicy::default(),
//!         [fixtures::demo_descriptor()],
//!     );
//!     let registry = Registry::new(config, MockFactory::new()).unwrap();
//!     registry.initialize().await.unwrap();
//!
//!     let conn = registry.acquire("demo").await.unwrap();
//!     conn.release().await.unwrap();
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_factory;

pub use mock_factory::{MockConnection, MockConnectionError, MockFactory, MockFactoryBuilder};
