use std::sync::Arc;

/// A result type defaulting to the crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All error variants that `seqrow` can emit.
///
/// Every failure is surfaced to the immediate caller. An allocator never
/// returns a stale or default identifier in place of an error, so callers
/// inserting new records must treat any of these as a hard stop.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The registry could not map a name to a generator, or was built from an
    /// inconsistent configuration. Never retried.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The sequence store failed while refilling the window of `name`.
    #[error("failed to allocate ids for `{name}`: {source}")]
    Allocation {
        /// The logical name being refilled.
        name: String,
        /// The underlying store failure.
        #[source]
        source: StoreError,
    },

    /// Concurrent first-row creation for `name` kept losing the insert race.
    #[error("gave up creating the sequence row for `{name}` after {attempts} attempts")]
    BootstrapRaceExceeded {
        /// The logical name being bootstrapped.
        name: String,
        /// Number of bootstrap attempts made.
        attempts: u32,
    },

    /// The request itself was malformed (empty name, zero count).
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// What was wrong with the request.
        reason: String,
    },

    /// The operation failed because a window lock was **poisoned**.
    ///
    /// This occurs when a thread panics while holding the lock. When the
    /// `parking-lot` feature is enabled, mutexes do **not** poison, so this
    /// variant is never produced.
    #[error("window lock poisoned")]
    LockPoisoned,
}

impl Error {
    pub(crate) fn allocation(name: &str, source: StoreError) -> Self {
        Self::Allocation {
            name: name.to_owned(),
            source,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}

/// Configuration problems, detected when a [`Registry`] is built or when a
/// name is first looked up.
///
/// [`Registry`]: crate::Registry
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// No generator is configured for `name` and there is no fallback.
    #[error("no generator configured for `{name}` and no fallback generator")]
    NoGenerator {
        /// The requested logical name.
        name: String,
    },

    /// A chain of `refer_to` links loops back on itself.
    #[error("refer_to cycle: {}", chain.join(" -> "))]
    ReferenceCycle {
        /// The names visited, ending with the repeated one.
        chain: Vec<String>,
    },

    /// A `refer_to` link names a generator that is not configured.
    #[error("`{name}` refers to unknown generator `{target}`")]
    UnknownReference {
        /// The referring generator.
        name: String,
        /// The missing target.
        target: String,
    },

    /// A generator names a datasource that was never registered.
    #[error("generator `{name}` uses unknown datasource `{datasource}`")]
    UnknownDatasource {
        /// The generator.
        name: String,
        /// The missing datasource.
        datasource: String,
    },

    /// More than one generator is marked as the fallback.
    #[error("multiple fallback generators: {}", names.join(", "))]
    MultipleFallbacks {
        /// Every generator marked `fallback = true`.
        names: Vec<String>,
    },

    /// A table or column name is not a plain SQL identifier.
    #[error("`{value}` is not a valid SQL identifier for {field}")]
    InvalidIdentifier {
        /// The layout field holding the value.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A step or fetch size is zero.
    #[error("generator `{name}`: {field} must be at least 1")]
    InvalidSize {
        /// The generator.
        name: String,
        /// `step_size` or `fetch_size`.
        field: &'static str,
    },

    /// A dialect identifier that is not one of the known vendors.
    #[error("unknown dialect `{0}`")]
    UnknownDialect(String),
}

/// Failures reported by a [`Connection`] or [`ConnectionSource`].
///
/// Statement execution failures propagate unchanged through the allocator,
/// wrapped in [`Error::Allocation`].
///
/// [`Connection`]: crate::Connection
/// [`ConnectionSource`]: crate::ConnectionSource
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// An insert hit the unique key of the sequence table.
    #[error("duplicate key `{0}`")]
    DuplicateKey(String),

    /// A lock could not be acquired in time.
    #[error("lock wait timed out: {0}")]
    LockTimeout(String),

    /// The row changed between the locked read and the advance.
    #[error("sequence row `{0}` changed under a held lock")]
    Conflict(String),

    /// Advancing the row would overflow a 64-bit value.
    #[error("sequence `{0}` is exhausted")]
    Exhausted(String),

    /// A stored row holds values the allocator cannot use, such as a zero
    /// step size.
    #[error("invalid sequence row: {0}")]
    InvalidRow(String),

    /// Any other backend failure (connectivity, bad SQL, ...).
    #[error(transparent)]
    Backend(Arc<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wraps an arbitrary backend error.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Arc::new(err))
    }
}

#[cfg(not(feature = "parking-lot"))]
use crate::mutex::{MutexGuard, PoisonError};
#[cfg(not(feature = "parking-lot"))]
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::LockPoisoned
    }
}
