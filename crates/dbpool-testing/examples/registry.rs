//! Registry walkthrough using the in-memory mock factory.
//!
//! Builds a registry with two resource classes, acquires and releases
//! handles, and prints the pool status after each step. Debug dumps go to
//! the `dbpool::debug` target.
//!
//! # Running
//!
//! ```bash
//! # Optionally load classes from a JSON file instead of the built-in ones
//! export DBPOOL_CONFIG=dbpool.json
//!
//! RUST_LOG=dbpool=debug cargo run -p dbpool-testing --example registry
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use dbpool::{ConnectionParams, PoolError, Registry, RegistryConfig, ResourceDescriptor};
use dbpool_testing::MockFactory;

fn builtin_config() -> RegistryConfig {
    RegistryConfig::new()
        .driver(
            ResourceDescriptor::new("demo")
                .connection(
                    ConnectionParams::new()
                        .credentials("app", "secret")
                        .database("demo"),
                )
                .initial_size(2)
                .min_idle(1)
                .max_idle(3)
                .max_active(2),
        )
        .driver(
            ResourceDescriptor::new("reports")
                .connection(ConnectionParams::new().database("reports"))
                .initial_size(1)
                .min_idle(0)
                .max_idle(1)
                .max_active(4),
        )
}

async fn print_status(registry: &Registry<MockFactory>, step: &str) -> Result<(), PoolError> {
    for class in registry.classes() {
        let status = registry.status(&class).await?;
        println!(
            "{step:<22} {class:<8} idle={} active={} created={} destroyed={}",
            status.idle, status.active, status.created, status.destroyed
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    let config = match std::env::var("DBPOOL_CONFIG") {
        Ok(path) => RegistryConfig::from_json_file(path)?,
        Err(_) => builtin_config(),
    };

    let registry = Registry::new(config, MockFactory::new())?;
    registry.set_debug(true);
    registry.initialize().await?;
    print_status(&registry, "initialized").await?;

    // Acquire, use, release.
    let mut conn = registry.acquire("demo").await?;
    conn.execute("SELECT 1")?;
    print_status(&registry, "acquired one").await?;
    conn.release().await?;
    print_status(&registry, "released one").await?;

    // Fill the class to its ceiling; the next acquire fails immediately.
    let a = registry.acquire("demo").await?;
    let b = registry.acquire("demo").await?;
    match registry.acquire("demo").await {
        Err(e @ PoolError::CapacityExceeded { .. }) => println!("third acquire: {e}"),
        Err(e) => return Err(e.into()),
        Ok(_) => unreachable!("demo allows two checkouts"),
    }

    // Or wait for someone else to give one back.
    let waiter = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let conn = registry
                .acquire_timeout("demo", Duration::from_secs(1))
                .await?;
            let id = conn.id();
            conn.release().await?;
            Ok::<_, PoolError>(id)
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    a.release().await?;
    println!("waiter got handle {}", waiter.await??);
    b.release().await?;
    print_status(&registry, "all released").await?;

    registry.close().await;
    print_status(&registry, "closed").await?;
    println!(
        "factory opened {} and closed {} connections",
        registry.factory().opened(),
        registry.factory().closed()
    );

    Ok(())
}
