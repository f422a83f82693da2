//! Pool error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::handle::{Handle, HandleId};

/// Errors that can occur during pool operations.
///
/// Every error is returned to the immediate caller. The registry never
/// retries an acquire or release on its own; see [`PoolError::is_retryable`]
/// for the variants a caller may reasonably try again.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// No descriptor is registered under this resource-class name.
    #[error("unknown resource class: {0}")]
    UnknownClass(String),

    /// The class already has `max` handles checked out.
    #[error("resource class {class}: maximum active handles ({max}) reached")]
    CapacityExceeded {
        /// Resource-class name.
        class: String,
        /// Configured active ceiling.
        max: usize,
    },

    /// The idle collection was still empty after the top-up attempt.
    #[error("resource class {class}: no idle handle available")]
    PoolExhausted {
        /// Resource-class name.
        class: String,
    },

    /// The factory could not establish a connection.
    #[error("failed to create connection: {0}")]
    ConnectionCreation(String),

    /// The released handle is not checked out from this registry.
    #[error("resource class {class}: handle {id} is not active")]
    InvalidRelease {
        /// Resource-class name carried by the handle.
        class: String,
        /// Identifier of the rejected handle.
        id: HandleId,
    },

    /// `initialize` has not completed yet.
    #[error("registry is not initialized")]
    NotInitialized,

    /// Registry is closed.
    #[error("registry is closed")]
    PoolClosed,

    /// No handle became available within the bounded wait.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(Duration),

    /// Descriptor or registry configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Check if the caller may retry the operation later.
    ///
    /// These are capacity conditions that clear once other callers release
    /// their handles. Everything else is either a programming error or a
    /// failure that retrying the same call will not fix.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. } | Self::PoolExhausted { .. } | Self::AcquisitionTimeout(_)
        )
    }

    /// Resource-class name this error refers to, if any.
    #[must_use]
    pub fn class(&self) -> Option<&str> {
        match self {
            Self::UnknownClass(class)
            | Self::CapacityExceeded { class, .. }
            | Self::PoolExhausted { class }
            | Self::InvalidRelease { class, .. } => Some(class),
            _ => None,
        }
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// A rejected [`Registry::release`](crate::Registry::release).
///
/// The registry leaves a handle it did not issue untouched and hands it
/// back here. Release it to the registry it came from, or the slot it
/// holds there stays occupied.
pub struct ReleaseError<C> {
    error: PoolError,
    handle: Handle<C>,
}

impl<C> ReleaseError<C> {
    pub(crate) fn new(error: PoolError, handle: Handle<C>) -> Self {
        Self { error, handle }
    }

    /// Why the release was rejected.
    #[must_use]
    pub fn error(&self) -> &PoolError {
        &self.error
    }

    /// The rejected handle.
    #[must_use]
    pub fn handle(&self) -> &Handle<C> {
        &self.handle
    }

    /// Take the handle back.
    #[must_use]
    pub fn into_handle(self) -> Handle<C> {
        self.handle
    }

    /// Split into the error and the handle.
    #[must_use]
    pub fn into_parts(self) -> (PoolError, Handle<C>) {
        (self.error, self.handle)
    }

    /// Keep the error and drop the handle along with its connection.
    #[must_use]
    pub fn into_error(self) -> PoolError {
        self.error
    }
}

impl<C> fmt::Debug for ReleaseError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseError")
            .field("error", &self.error)
            .field("handle", &self.handle)
            .finish()
    }
}

impl<C> fmt::Display for ReleaseError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<C> std::error::Error for ReleaseError<C> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(
            PoolError::CapacityExceeded {
                class: "demo".into(),
                max: 2
            }
            .is_retryable()
        );
        assert!(
            PoolError::PoolExhausted {
                class: "demo".into()
            }
            .is_retryable()
        );
        assert!(PoolError::AcquisitionTimeout(Duration::from_millis(10)).is_retryable());

        assert!(!PoolError::UnknownClass("demo".into()).is_retryable());
        assert!(!PoolError::ConnectionCreation("refused".into()).is_retryable());
        assert!(!PoolError::PoolClosed.is_retryable());
    }

    #[test]
    fn test_class_accessor() {
        let err = PoolError::InvalidRelease {
            class: "users".into(),
            id: HandleId::new(),
        };
        assert_eq!(err.class(), Some("users"));
        assert_eq!(PoolError::NotInitialized.class(), None);
    }

    #[test]
    fn test_release_error_hands_back_handle() {
        let handle = Handle::new(uuid::Uuid::new_v4(), std::sync::Arc::from("demo"), 7u32);
        let id = handle.id();
        let err = ReleaseError::new(
            PoolError::InvalidRelease {
                class: "demo".into(),
                id,
            },
            handle,
        );
        assert_eq!(err.to_string(), format!("resource class demo: handle {id} is not active"));
        assert_eq!(err.handle().id(), id);

        let (error, handle) = err.into_parts();
        assert_eq!(error.class(), Some("demo"));
        assert_eq!(*handle, 7);
    }

    #[test]
    fn test_display_messages() {
        let err = PoolError::CapacityExceeded {
            class: "demo".into(),
            max: 2,
        };
        assert_eq!(
            err.to_string(),
            "resource class demo: maximum active handles (2) reached"
        );
        assert_eq!(
            PoolError::UnknownClass("nope".into()).to_string(),
            "unknown resource class: nope"
        );
    }
}
