//! Per-class idle/active bookkeeping.
//!
//! [`ClassState`] is the state machine for one resource class. It does no
//! I/O and takes no locks; the registry owns one per class behind its own
//! mutex and drives it from `acquire` and `release`.

use std::collections::HashMap;
use std::time::Instant;

use crate::config::{ResourceDescriptor, TopUpPolicy};
use crate::error::PoolError;
use crate::handle::{Handle, HandleId};

/// Status information about one resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle handles available.
    pub idle: usize,
    /// Number of handles currently checked out.
    pub active: usize,
    /// Idle watermark that triggers a top-up.
    pub min_idle: usize,
    /// Idle ceiling.
    pub max_idle: usize,
    /// Active ceiling.
    pub max_active: usize,
    /// Handles ever created for this class.
    pub created: u64,
    /// Handles ever destroyed for this class.
    pub destroyed: u64,
    /// Successful checkouts.
    pub acquisitions: u64,
    /// Successful returns.
    pub releases: u64,
    /// Factory failures, including tolerated top-up failures.
    pub failed_creations: u64,
}

impl PoolStatus {
    /// Live handles owned by this class (idle plus active).
    #[must_use]
    pub fn total(&self) -> usize {
        self.idle + self.active
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    created: u64,
    destroyed: u64,
    acquisitions: u64,
    releases: u64,
    failed_creations: u64,
}

/// Record of one checked-out handle.
#[derive(Debug, Clone, Copy)]
struct Checkout {
    at: Instant,
}

/// Idle stack and active set for one resource class.
pub(crate) struct ClassState<C> {
    idle: Vec<Handle<C>>,
    active: HashMap<HandleId, Checkout>,
    counters: Counters,
}

impl<C> ClassState<C> {
    pub(crate) fn new(descriptor: &ResourceDescriptor) -> Self {
        Self {
            idle: Vec::with_capacity(descriptor.max_idle),
            active: HashMap::with_capacity(descriptor.max_active),
            counters: Counters::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn idle_len(&self) -> usize {
        self.idle.len()
    }

    #[cfg(test)]
    pub(crate) fn active_len(&self) -> usize {
        self.active.len()
    }

    #[cfg(test)]
    pub(crate) fn is_active(&self, id: HandleId) -> bool {
        self.active.contains_key(&id)
    }

    /// Fail with `CapacityExceeded` when the active ceiling is reached.
    pub(crate) fn check_capacity(&self, descriptor: &ResourceDescriptor) -> Result<(), PoolError> {
        if self.active.len() >= descriptor.max_active {
            return Err(PoolError::CapacityExceeded {
                class: descriptor.name.clone(),
                max: descriptor.max_active,
            });
        }
        Ok(())
    }

    /// Number of handles the next top-up should create.
    pub(crate) fn deficit(&self, descriptor: &ResourceDescriptor, policy: TopUpPolicy) -> usize {
        policy.deficit(descriptor, self.idle.len(), self.active.len())
    }

    /// Add a freshly created handle to the idle stack.
    pub(crate) fn push_created(&mut self, handle: Handle<C>) {
        self.counters.created += 1;
        self.idle.push(handle);
    }

    pub(crate) fn record_failed_creation(&mut self) {
        self.counters.failed_creations += 1;
    }

    /// Pop the most recently returned idle handle and mark it active.
    pub(crate) fn checkout(&mut self) -> Option<Handle<C>> {
        let mut handle = self.idle.pop()?;
        handle.metadata_mut().mark_checkout();
        self.active.insert(handle.id(), Checkout { at: Instant::now() });
        self.counters.acquisitions += 1;
        Some(handle)
    }

    /// Remove `id` from the active set.
    ///
    /// Returns `false` if the id was not checked out from this class.
    pub(crate) fn checkin(&mut self, id: HandleId) -> bool {
        match self.active.remove(&id) {
            Some(checkout) => {
                tracing::trace!(
                    handle = %id,
                    held_for = ?checkout.at.elapsed(),
                    "handle checked in"
                );
                self.counters.releases += 1;
                true
            }
            None => false,
        }
    }

    /// Return a checked-in handle to idle, or hand it back for destruction
    /// when idle is already at `max_idle`.
    pub(crate) fn restore(
        &mut self,
        descriptor: &ResourceDescriptor,
        mut handle: Handle<C>,
    ) -> Option<Handle<C>> {
        if self.idle.len() >= descriptor.max_idle {
            return Some(self.retire(handle));
        }
        handle.metadata_mut().mark_checkin();
        self.idle.push(handle);
        None
    }

    /// Count a handle as destroyed and mark it closed.
    pub(crate) fn retire(&mut self, mut handle: Handle<C>) -> Handle<C> {
        handle.metadata_mut().mark_closed();
        self.counters.destroyed += 1;
        handle
    }

    /// Remove every idle handle, counting them as destroyed.
    pub(crate) fn drain_idle(&mut self) -> Vec<Handle<C>> {
        let drained: Vec<_> = self.idle.drain(..).collect();
        drained.into_iter().map(|h| self.retire(h)).collect()
    }

    pub(crate) fn status(&self, descriptor: &ResourceDescriptor) -> PoolStatus {
        PoolStatus {
            idle: self.idle.len(),
            active: self.active.len(),
            min_idle: descriptor.min_idle,
            max_idle: descriptor.max_idle,
            max_active: descriptor.max_active,
            created: self.counters.created,
            destroyed: self.counters.destroyed,
            acquisitions: self.counters.acquisitions,
            releases: self.counters.releases,
            failed_creations: self.counters.failed_creations,
        }
    }
}
