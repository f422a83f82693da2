//! Property tests for registry invariants under arbitrary acquire/release
//! sequences.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;

use dbpool::{Handle, PoolError, Registry, ResourceDescriptor, TopUpPolicy};
use dbpool_testing::fixtures::{descriptor, registry_config};
use dbpool_testing::{MockConnection, MockFactory};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Acquire,
    /// Release the held handle at this index, modulo the number held.
    Release(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Acquire), (0usize..16).prop_map(Op::Release)]
}

fn policy() -> impl Strategy<Value = TopUpPolicy> {
    prop_oneof![Just(TopUpPolicy::HeadroomCapped), Just(TopUpPolicy::FillToMaxIdle)]
}

/// Valid descriptors: `min_idle` and `initial_size` never exceed `max_idle`.
fn class() -> impl Strategy<Value = ResourceDescriptor> {
    (1usize..6, 1usize..6).prop_flat_map(|(max_idle, max_active)| {
        (0..=max_idle, 0..=max_idle).prop_map(move |(initial_size, min_idle)| {
            descriptor("prop", initial_size, min_idle, max_idle, max_active)
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn registry_invariants_hold(
        class in class(),
        policy in policy(),
        ops in proptest::collection::vec(op(), 1..40),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let max_idle = class.max_idle;
            let max_active = class.max_active;
            let registry =
                Registry::new(registry_config(policy, [class]), MockFactory::new()).unwrap();
            registry.initialize().await.unwrap();

            let mut held: Vec<Handle<MockConnection>> = Vec::new();

            for op in &ops {
                let before = registry.status("prop").await.unwrap();
                match op {
                    Op::Acquire => match registry.acquire("prop").await {
                        Ok(conn) => {
                            prop_assert!(before.active < max_active);
                            held.push(conn.into_handle());
                        }
                        Err(PoolError::CapacityExceeded { .. }) => {
                            prop_assert_eq!(before.active, max_active);
                            prop_assert_eq!(registry.status("prop").await.unwrap(), before);
                        }
                        Err(e) => prop_assert!(false, "unexpected error: {}", e),
                    },
                    Op::Release(i) => {
                        if held.is_empty() {
                            continue;
                        }
                        let handle = held.swap_remove(i % held.len());
                        let closed_before = registry.factory().closed();
                        registry.release(handle).await.unwrap();

                        let after = registry.status("prop").await.unwrap();
                        prop_assert_eq!(after.active, before.active - 1);
                        if before.idle < max_idle {
                            prop_assert_eq!(after.idle, before.idle + 1);
                            prop_assert_eq!(registry.factory().closed(), closed_before);
                        } else {
                            prop_assert_eq!(after.idle, before.idle);
                            prop_assert_eq!(registry.factory().closed(), closed_before + 1);
                        }
                    }
                }

                let status = registry.status("prop").await.unwrap();
                prop_assert!(
                    status.active <= max_active,
                    "active {} > {}",
                    status.active,
                    max_active
                );
                prop_assert!(status.idle <= max_idle, "idle {} > {}", status.idle, max_idle);
                prop_assert_eq!(status.active, held.len());
                // A live connection is either idle or checked out, never both.
                prop_assert_eq!(registry.factory().live(), status.idle + status.active);
            }

            for handle in held.drain(..) {
                registry.release(handle).await.unwrap();
            }
            let status = registry.status("prop").await.unwrap();
            prop_assert_eq!(status.active, 0);
            prop_assert_eq!(status.acquisitions, status.releases);
            Ok(())
        })?;
    }

    #[test]
    fn handle_ids_are_never_shared(
        max_active in 1usize..8,
        rounds in 1usize..5,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let registry = Registry::new(
                registry_config(
                    TopUpPolicy::default(),
                    [descriptor("prop", 0, 0, max_active, max_active)],
                ),
                MockFactory::new(),
            )
            .unwrap();
            registry.initialize().await.unwrap();

            for _ in 0..rounds {
                let mut held = Vec::new();
                for _ in 0..max_active {
                    held.push(registry.acquire("prop").await.unwrap().into_handle());
                }
                let mut ids: Vec<_> = held.iter().map(Handle::id).collect();
                ids.sort();
                ids.dedup();
                prop_assert_eq!(ids.len(), max_active);

                let serials: HashSet<_> = held.iter().map(|h| h.serial()).collect();
                prop_assert_eq!(serials.len(), max_active);

                for handle in held {
                    registry.release(handle).await.unwrap();
                }
            }
            Ok(())
        })?;
    }
}
