//! Pooled handles and the scoped-acquisition guard.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{ReleaseError, Result};
use crate::lifecycle::{ConnectionFactory, ConnectionMetadata};
use crate::registry::Registry;

/// Process-unique identifier of a pooled handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(Uuid);

impl HandleId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One live connection owned by the pool or by the caller that checked it
/// out.
///
/// A handle is moved in and out of the registry, so it can only ever sit
/// in one place: the idle collection, or the hands of exactly one caller
/// (in which case the class's active collection records its id).
pub struct Handle<C> {
    id: HandleId,
    origin: Uuid,
    class: Arc<str>,
    connection: C,
    metadata: ConnectionMetadata,
}

impl<C> Handle<C> {
    pub(crate) fn new(origin: Uuid, class: Arc<str>, connection: C) -> Self {
        Self {
            id: HandleId::new(),
            origin,
            class,
            connection,
            metadata: ConnectionMetadata::new(),
        }
    }

    /// Identifier of this handle.
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Resource-class name this handle belongs to.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Identifier of the registry that created this handle.
    pub(crate) fn origin(&self) -> Uuid {
        self.origin
    }

    /// Lifecycle metadata.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// Borrow the underlying connection.
    #[must_use]
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Mutably borrow the underlying connection.
    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut ConnectionMetadata {
        &mut self.metadata
    }

    pub(crate) fn into_connection(self) -> C {
        self.connection
    }
}

impl<C> Deref for Handle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C> DerefMut for Handle<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.connection
    }
}

impl<C> fmt::Debug for Handle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// A handle checked out through [`Registry::acquire`].
///
/// Call [`release`](Self::release) to hand it back and observe any error.
/// If the guard is dropped instead, the release is spawned onto the
/// current tokio runtime so the handle still returns on every exit path.
pub struct PooledConnection<F: ConnectionFactory> {
    handle: Option<Handle<F::Connection>>,
    registry: Registry<F>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    pub(crate) fn new(handle: Handle<F::Connection>, registry: Registry<F>) -> Self {
        Self {
            handle: Some(handle),
            registry,
        }
    }

    fn handle_ref(&self) -> &Handle<F::Connection> {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("pooled handle taken before drop"),
        }
    }

    fn handle_mut(&mut self) -> &mut Handle<F::Connection> {
        match &mut self.handle {
            Some(handle) => handle,
            None => unreachable!("pooled handle taken before drop"),
        }
    }

    /// Identifier of the wrapped handle.
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.handle_ref().id()
    }

    /// Resource-class name of the wrapped handle.
    #[must_use]
    pub fn class(&self) -> &str {
        self.handle_ref().class()
    }

    /// Lifecycle metadata of the wrapped handle.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        self.handle_ref().metadata()
    }

    /// Return the handle to the registry now.
    pub async fn release(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self
                .registry
                .release(handle)
                .await
                .map_err(ReleaseError::into_error),
            None => Ok(()),
        }
    }

    /// Take the raw handle out of the guard.
    ///
    /// The handle stays checked out; pass it to [`Registry::release`] when
    /// done with it.
    #[must_use]
    pub fn into_handle(mut self) -> Handle<F::Connection> {
        match self.handle.take() {
            Some(handle) => handle,
            None => unreachable!("pooled handle taken before drop"),
        }
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &F::Connection {
        self.handle_ref().connection()
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut F::Connection {
        self.handle_mut().connection_mut()
    }
}

impl<F: ConnectionFactory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let registry = self.registry.clone();
                runtime.spawn(async move {
                    let id = handle.id();
                    if let Err(e) = registry.release(handle).await {
                        tracing::warn!(
                            handle = %id,
                            error = %e,
                            "failed to return dropped connection"
                        );
                    }
                });
            }
            Err(_) => {
                // Without a runtime the release cannot run; the active slot
                // stays occupied until the registry is dropped.
                tracing::warn!(
                    handle = %handle.id(),
                    class = handle.class(),
                    "pooled connection dropped outside a tokio runtime"
                );
            }
        }
    }
}
