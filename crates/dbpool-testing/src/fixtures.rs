//! Test fixture utilities.

use std::sync::Once;

use dbpool::{ConnectionParams, RegistryConfig, ResourceDescriptor, TopUpPolicy};

/// Connection parameters pointing at a local test database.
#[must_use]
pub fn local_params(database: impl Into<String>) -> ConnectionParams {
    ConnectionParams::new()
        .host("127.0.0.1")
        .port(3306)
        .credentials("test", "test")
        .database(database)
}

/// Descriptor with explicit capacity numbers, in
/// `initial_size, min_idle, max_idle, max_active` order.
#[must_use]
pub fn descriptor(
    name: &str,
    initial_size: usize,
    min_idle: usize,
    max_idle: usize,
    max_active: usize,
) -> ResourceDescriptor {
    ResourceDescriptor::new(name)
        .connection(local_params(name))
        .initial_size(initial_size)
        .min_idle(min_idle)
        .max_idle(max_idle)
        .max_active(max_active)
}

/// The reference class: two pre-warmed handles, watermark one, idle
/// ceiling three, two concurrent checkouts.
#[must_use]
pub fn demo_descriptor() -> ResourceDescriptor {
    descriptor("demo", 2, 1, 3, 2)
}

/// Registry configuration holding the given classes.
#[must_use]
pub fn registry_config(
    policy: TopUpPolicy,
    descriptors: impl IntoIterator<Item = ResourceDescriptor>,
) -> RegistryConfig {
    descriptors
        .into_iter()
        .fold(RegistryConfig::new().top_up(policy), RegistryConfig::driver)
}

/// Install a `tracing` subscriber that honors `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
