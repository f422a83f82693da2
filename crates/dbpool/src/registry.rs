//! The pool registry.
//!
//! A [`Registry`] owns one pool per resource class. Each class has its own
//! async mutex around its idle/active state, so unrelated classes never
//! contend, and all transitions for one class are totally ordered.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify, OnceCell};
use uuid::Uuid;

use crate::config::{RegistryConfig, ResourceDescriptor, TopUpPolicy};
use crate::error::{PoolError, ReleaseError, Result};
use crate::handle::{Handle, PooledConnection};
use crate::lifecycle::ConnectionFactory;
use crate::pool::{ClassState, PoolStatus};

/// `tracing` target for the state dumps enabled by [`Registry::set_debug`].
pub const DEBUG_TARGET: &str = "dbpool::debug";

struct ClassPool<C> {
    name: Arc<str>,
    descriptor: ResourceDescriptor,
    state: Mutex<ClassState<C>>,
    /// Signaled whenever a handle goes back to idle or the registry closes.
    released: Notify,
}

struct RegistryInner<F: ConnectionFactory> {
    /// Stamped on every handle this registry creates.
    id: Uuid,
    factory: F,
    policy: TopUpPolicy,
    classes: HashMap<Arc<str>, ClassPool<F::Connection>>,
    initialized: OnceCell<()>,
    closed: AtomicBool,
    debug: AtomicBool,
}

/// Connection pools for a set of resource classes.
///
/// Cloning a `Registry` is cheap and yields another reference to the same
/// pools, so one registry can be built at startup and shared with every
/// caller.
///
/// # Example
///
/// ```rust,ignore
/// use dbpool::{Registry, RegistryConfig};
///
/// let config = RegistryConfig::from_json_file("dbpool.json")?;
/// let registry = Registry::new(config, MySqlFactory::default())?;
/// registry.initialize().await?;
///
/// let conn = registry.acquire("demo").await?;
/// // Use connection...
/// conn.release().await?;
/// ```
pub struct Registry<F: ConnectionFactory> {
    inner: Arc<RegistryInner<F>>,
}

impl<F: ConnectionFactory> Clone for Registry<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for Registry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("classes", &self.classes())
            .field("policy", &self.inner.policy)
            .field("initialized", &self.is_initialized())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> Registry<F> {
    /// Build a registry from validated configuration.
    ///
    /// No connections are opened until [`initialize`](Self::initialize).
    pub fn new(config: RegistryConfig, factory: F) -> Result<Self> {
        config.validate()?;

        let classes = config
            .drivers
            .into_iter()
            .map(|descriptor| {
                let name: Arc<str> = Arc::from(descriptor.name.as_str());
                let pool = ClassPool {
                    name: Arc::clone(&name),
                    state: Mutex::new(ClassState::new(&descriptor)),
                    descriptor,
                    released: Notify::new(),
                };
                (name, pool)
            })
            .collect();

        Ok(Self {
            inner: Arc::new(RegistryInner {
                id: Uuid::new_v4(),
                factory,
                policy: config.top_up,
                classes,
                initialized: OnceCell::new(),
                closed: AtomicBool::new(false),
                debug: AtomicBool::new(false),
            }),
        })
    }

    /// Open `initial_size` idle connections for every class.
    ///
    /// Runs once; later calls return `Ok(())` without touching the pools.
    /// If any connection fails to open, every connection opened so far is
    /// closed, the registry stays uninitialized, and the factory error is
    /// returned. Callers treat that as a startup failure. If [`close`]
    /// runs while the pools are being filled, bootstrap stops with
    /// [`PoolError::PoolClosed`] and the registry stays uninitialized.
    ///
    /// [`close`]: Self::close
    pub async fn initialize(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner
            .initialized
            .get_or_try_init(|| self.bootstrap())
            .await?;
        Ok(())
    }

    async fn bootstrap(&self) -> Result<()> {
        for pool in self.inner.classes.values() {
            let mut state = pool.state.lock().await;
            // close() drains each class once; anything added after that
            // would never be disconnected.
            if self.is_closed() {
                drop(state);
                tracing::warn!(class = %pool.name, "registry closed during bootstrap");
                self.discard_idle().await;
                return Err(PoolError::PoolClosed);
            }
            for _ in 0..pool.descriptor.initial_size {
                match self.create_handle(pool).await {
                    Ok(handle) => state.push_created(handle),
                    Err(e) => {
                        state.record_failed_creation();
                        drop(state);
                        tracing::error!(
                            class = %pool.name,
                            error = %e,
                            "failed to bootstrap resource class"
                        );
                        self.discard_idle().await;
                        return Err(e);
                    }
                }
            }
            self.dump("initialize", pool, &state);
        }

        tracing::info!(classes = self.inner.classes.len(), "connection registry initialized");
        Ok(())
    }

    /// Check out a handle for `class`.
    ///
    /// Never waits for capacity: if `max_active` handles are already out the
    /// call fails with [`PoolError::CapacityExceeded`], and if no idle handle
    /// exists after the top-up it fails with [`PoolError::PoolExhausted`].
    pub async fn acquire(&self, class: &str) -> Result<PooledConnection<F>> {
        let handle = self.checkout(self.class_pool(class)?).await?;
        Ok(PooledConnection::new(handle, self.clone()))
    }

    /// Check out a handle for `class`, waiting up to `timeout` for capacity.
    ///
    /// Each release for the class wakes waiters, which then retry the
    /// normal acquire path. Errors other than capacity conditions are
    /// returned immediately. Dropping the future cancels the wait.
    pub async fn acquire_timeout(
        &self,
        class: &str,
        timeout: Duration,
    ) -> Result<PooledConnection<F>> {
        let pool = self.class_pool(class)?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = pool.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.checkout(pool).await {
                Ok(handle) => return Ok(PooledConnection::new(handle, self.clone())),
                Err(PoolError::CapacityExceeded { .. } | PoolError::PoolExhausted { .. }) => {}
                Err(e) => return Err(e),
            }

            tracing::trace!(class, "waiting for a released connection");
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(PoolError::AcquisitionTimeout(timeout));
            }
        }
    }

    async fn checkout(&self, pool: &ClassPool<F::Connection>) -> Result<Handle<F::Connection>> {
        self.ensure_open()?;
        if !self.is_initialized() {
            return Err(PoolError::NotInitialized);
        }

        let descriptor = &pool.descriptor;
        let mut state = pool.state.lock().await;
        // close() may have run while this call waited for the lock.
        self.ensure_open()?;
        state.check_capacity(descriptor)?;

        let deficit = state.deficit(descriptor, self.inner.policy);
        if deficit > 0 {
            for _ in 0..deficit {
                match self.create_handle(pool).await {
                    Ok(handle) => state.push_created(handle),
                    Err(e) => {
                        state.record_failed_creation();
                        tracing::warn!(class = %pool.name, error = %e, "top-up connection failed");
                        break;
                    }
                }
            }
            self.dump("top-up", pool, &state);
        }

        let handle = state.checkout().ok_or_else(|| PoolError::PoolExhausted {
            class: descriptor.name.clone(),
        })?;

        tracing::trace!(class = %pool.name, handle = %handle.id(), "connection acquired");
        self.dump("fetch", pool, &state);
        Ok(handle)
    }

    /// Return a checked-out handle.
    ///
    /// The handle goes back to idle unless idle is already at `max_idle`, in
    /// which case it is closed. A handle whose class is unknown here, or
    /// which was not checked out from this registry, is left untouched and
    /// handed back inside the [`ReleaseError`].
    pub async fn release(
        &self,
        handle: Handle<F::Connection>,
    ) -> std::result::Result<(), ReleaseError<F::Connection>> {
        let Some(pool) = self.inner.classes.get(handle.class()) else {
            let error = PoolError::UnknownClass(handle.class().to_string());
            tracing::warn!(error = %error, "rejected release");
            return Err(ReleaseError::new(error, handle));
        };

        let mut state = pool.state.lock().await;
        if handle.origin() != self.inner.id || !state.checkin(handle.id()) {
            drop(state);
            let error = PoolError::InvalidRelease {
                class: handle.class().to_string(),
                id: handle.id(),
            };
            tracing::warn!(error = %error, "rejected release");
            return Err(ReleaseError::new(error, handle));
        }

        let excess = if self.is_closed() {
            Some(state.retire(handle))
        } else {
            state.restore(&pool.descriptor, handle)
        };
        self.dump("release", pool, &state);
        drop(state);

        pool.released.notify_waiters();

        if let Some(handle) = excess {
            tracing::trace!(class = %pool.name, handle = %handle.id(), "closing excess connection");
            self.inner.factory.disconnect(handle.into_connection()).await;
        }
        Ok(())
    }

    /// Close every idle connection and refuse further acquires.
    ///
    /// Handles still checked out are closed when they are released.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.discard_idle().await;
        for pool in self.inner.classes.values() {
            pool.released.notify_waiters();
        }
        tracing::info!("connection registry closed");
    }

    async fn discard_idle(&self) {
        for pool in self.inner.classes.values() {
            let drained = {
                let mut state = pool.state.lock().await;
                let drained = state.drain_idle();
                self.dump("destroy", pool, &state);
                drained
            };
            for handle in drained {
                self.inner.factory.disconnect(handle.into_connection()).await;
            }
        }
    }

    async fn create_handle(
        &self,
        pool: &ClassPool<F::Connection>,
    ) -> Result<Handle<F::Connection>> {
        let connection = self.inner.factory.connect(&pool.descriptor).await?;
        let handle = Handle::new(self.inner.id, Arc::clone(&pool.name), connection);
        tracing::trace!(class = %pool.name, handle = %handle.id(), "connection created");
        Ok(handle)
    }

    /// Enable or disable state-transition dumps on [`DEBUG_TARGET`].
    pub fn set_debug(&self, enabled: bool) {
        self.inner.debug.store(enabled, Ordering::Relaxed);
    }

    /// Check if state-transition dumps are enabled.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.inner.debug.load(Ordering::Relaxed)
    }

    fn dump(
        &self,
        stage: &'static str,
        pool: &ClassPool<F::Connection>,
        state: &ClassState<F::Connection>,
    ) {
        if !self.is_debug() {
            return;
        }
        let status = state.status(&pool.descriptor);
        tracing::debug!(
            target: DEBUG_TARGET,
            stage,
            class = %pool.name,
            idle = status.idle,
            active = status.active,
            created = status.created,
            destroyed = status.destroyed,
            "pool state"
        );
    }

    /// Get the current status of one class.
    pub async fn status(&self, class: &str) -> Result<PoolStatus> {
        let pool = self.class_pool(class)?;
        let state = pool.state.lock().await;
        Ok(state.status(&pool.descriptor))
    }

    /// Descriptor registered for `class`.
    pub fn descriptor(&self, class: &str) -> Result<&ResourceDescriptor> {
        self.class_pool(class).map(|pool| &pool.descriptor)
    }

    /// Names of all registered classes, sorted.
    #[must_use]
    pub fn classes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.classes.keys().map(|k| k.to_string()).collect();
        names.sort();
        names
    }

    /// Get the top-up policy.
    #[must_use]
    pub fn policy(&self) -> TopUpPolicy {
        self.inner.policy
    }

    /// Check if `initialize` has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.initialized()
    }

    /// Check if the registry is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Get the factory.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    fn class_pool(&self, class: &str) -> Result<&ClassPool<F::Connection>> {
        self.inner
            .classes
            .get(class)
            .ok_or_else(|| PoolError::UnknownClass(class.to_string()))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use tokio_test::{assert_err, assert_ok};

    /// Counts opened and closed connections; fails once `fail_after` is hit.
    struct CountingFactory {
        opened: AtomicU64,
        closed: AtomicU64,
        fail_after: Option<u64>,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                opened: AtomicU64::new(0),
                closed: AtomicU64::new(0),
                fail_after: None,
            }
        }

        fn failing_after(n: u64) -> Self {
            Self {
                fail_after: Some(n),
                ..Self::new()
            }
        }
    }

    #[async_trait::async_trait]
    impl ConnectionFactory for CountingFactory {
        type Connection = u64;

        async fn connect(&self, _descriptor: &ResourceDescriptor) -> Result<u64> {
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| n >= limit) {
                self.opened.fetch_sub(1, Ordering::SeqCst);
                return Err(PoolError::ConnectionCreation("connection refused".into()));
            }
            Ok(n)
        }

        async fn disconnect(&self, _connection: u64) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn demo() -> ResourceDescriptor {
        ResourceDescriptor::new("demo")
            .initial_size(2)
            .min_idle(1)
            .max_idle(3)
            .max_active(2)
    }

    async fn registry(factory: CountingFactory) -> Registry<CountingFactory> {
        let registry = Registry::new(RegistryConfig::new().driver(demo()), factory).unwrap();
        registry.initialize().await.unwrap();
        registry
    }

    #[tokio::test]
    async fn test_initialize_populates_idle() {
        let registry = registry(CountingFactory::new()).await;
        let status = registry.status("demo").await.unwrap();
        assert_eq!(status.idle, 2);
        assert_eq!(status.active, 0);
        assert!(registry.is_initialized());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let registry = registry(CountingFactory::new()).await;
        assert_ok!(registry.initialize().await);

        let status = registry.status("demo").await.unwrap();
        assert_eq!(status.idle, 2);
        assert_eq!(registry.factory().opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_initialize_failure_rolls_back() {
        let registry = Registry::new(
            RegistryConfig::new().driver(demo()),
            CountingFactory::failing_after(1),
        )
        .unwrap();

        let err = registry.initialize().await.unwrap_err();
        assert!(matches!(err, PoolError::ConnectionCreation(_)));
        assert!(!registry.is_initialized());

        let status = registry.status("demo").await.unwrap();
        assert_eq!(status.idle, 0);
        assert_eq!(registry.factory().closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquire_before_initialize() {
        let registry =
            Registry::new(RegistryConfig::new().driver(demo()), CountingFactory::new()).unwrap();
        let err = registry.acquire("demo").await.unwrap_err();
        assert!(matches!(err, PoolError::NotInitialized));
    }

    #[tokio::test]
    async fn test_acquire_unknown_class() {
        let registry = registry(CountingFactory::new()).await;
        let err = registry.acquire("missing").await.unwrap_err();
        assert!(matches!(err, PoolError::UnknownClass(ref name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_acquire_and_release_round_trip() {
        let registry = registry(CountingFactory::new()).await;

        let conn = registry.acquire("demo").await.unwrap();
        assert_eq!(conn.class(), "demo");
        let status = registry.status("demo").await.unwrap();
        assert_eq!((status.idle, status.active), (1, 1));

        assert_ok!(conn.release().await);
        let status = registry.status("demo").await.unwrap();
        assert_eq!((status.idle, status.active), (2, 0));
    }

    #[tokio::test]
    async fn test_capacity_exceeded_leaves_state_unchanged() {
        let registry = registry(CountingFactory::new()).await;
        let _a = registry.acquire("demo").await.unwrap();
        let _b = registry.acquire("demo").await.unwrap();

        let before = registry.status("demo").await.unwrap();
        let err = assert_err!(registry.acquire("demo").await);
        assert!(matches!(err, PoolError::CapacityExceeded { max: 2, .. }));
        assert_eq!(registry.status("demo").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_top_up_failure_reports_exhaustion() {
        let descriptor = ResourceDescriptor::new("lazy")
            .initial_size(0)
            .min_idle(0)
            .max_idle(2)
            .max_active(2);
        let registry = Registry::new(
            RegistryConfig::new().driver(descriptor),
            CountingFactory::failing_after(0),
        )
        .unwrap();
        registry.initialize().await.unwrap();

        let err = registry.acquire("lazy").await.unwrap_err();
        assert!(matches!(err, PoolError::PoolExhausted { .. }));
        assert_eq!(registry.status("lazy").await.unwrap().failed_creations, 1);
    }

    #[tokio::test]
    async fn test_release_foreign_handle_is_handed_back() {
        let registry = registry(CountingFactory::new()).await;
        let handle = registry.acquire("demo").await.unwrap().into_handle();
        let id = handle.id();
        assert_ok!(registry.release(handle).await);

        let again = registry.acquire("demo").await.unwrap().into_handle();
        assert_eq!(again.id(), id);
        assert_ok!(registry.release(again).await);

        let stranger = Handle::new(Uuid::new_v4(), Arc::from("demo"), 42u64);
        let stranger_id = stranger.id();
        let err = registry.release(stranger).await.unwrap_err();
        assert!(matches!(err.error(), PoolError::InvalidRelease { id, .. } if *id == stranger_id));
        assert_eq!(*err.into_handle(), 42);
        assert_eq!(registry.factory().closed.load(Ordering::SeqCst), 0);

        let status = registry.status("demo").await.unwrap();
        assert_eq!((status.idle, status.active), (2, 0));
    }

    #[tokio::test]
    async fn test_release_unknown_class() {
        let registry = registry(CountingFactory::new()).await;
        let handle = Handle::new(Uuid::new_v4(), Arc::from("elsewhere"), 7u64);
        let err = registry.release(handle).await.unwrap_err();
        assert!(matches!(err.error(), PoolError::UnknownClass(_)));
        assert_eq!(err.handle().class(), "elsewhere");
        assert_eq!(registry.factory().closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropped_guard_returns_handle() {
        let registry = registry(CountingFactory::new()).await;
        {
            let _conn = registry.acquire("demo").await.unwrap();
        }
        // Let the spawned release run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
            if registry.status("demo").await.unwrap().active == 0 {
                break;
            }
        }
        let status = registry.status("demo").await.unwrap();
        assert_eq!((status.idle, status.active), (2, 0));
    }

    #[tokio::test]
    async fn test_close_discards_idle_and_rejects_acquire() {
        let registry = registry(CountingFactory::new()).await;
        let held = registry.acquire("demo").await.unwrap();

        registry.close().await;
        assert!(registry.is_closed());
        assert_eq!(registry.factory().closed.load(Ordering::SeqCst), 1);

        let err = registry.acquire("demo").await.unwrap_err();
        assert!(matches!(err, PoolError::PoolClosed));

        assert_ok!(held.release().await);
        let status = registry.status("demo").await.unwrap();
        assert_eq!((status.idle, status.active), (0, 0));
        assert_eq!(registry.factory().closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_debug_toggle() {
        let registry = registry(CountingFactory::new()).await;
        assert!(!registry.is_debug());
        registry.set_debug(true);
        assert!(registry.is_debug());

        let conn = registry.acquire("demo").await.unwrap();
        assert_ok!(conn.release().await);
        registry.set_debug(false);
        assert!(!registry.is_debug());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = RegistryConfig::new().driver(ResourceDescriptor::new("demo").max_active(0));
        let err = Registry::new(config, CountingFactory::new()).unwrap_err();
        assert!(matches!(err, PoolError::Configuration(_)));
    }

    #[test]
    fn test_classes_are_sorted() {
        let config = RegistryConfig::new()
            .driver(ResourceDescriptor::new("users"))
            .driver(ResourceDescriptor::new("audit"));
        let registry = Registry::new(config, CountingFactory::new()).unwrap();
        assert_eq!(registry.classes(), vec!["audit", "users"]);
        assert!(registry.descriptor("users").is_ok());
        assert!(registry.descriptor("orders").is_err());
    }
}
