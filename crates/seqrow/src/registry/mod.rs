//! Maps logical names to generators.
//!
//! A [`Registry`] is built once from generator configs and datasources, then
//! shared (typically behind an `Arc`) by everything that needs ids. It holds
//! one [`BatchAllocator`] per config that owns a table; names configured with
//! `refer_to` share the allocator of the config they point at, and names with
//! no config at all are served by the fallback generator.

mod builder;

pub use builder::*;

use std::{collections::HashMap, sync::Arc};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    allocator::{BatchAllocator, IdAllocator, IdRange, validate},
    error::{ConfigError, Result, StoreError},
    mutex::{Mutex, lock},
};

/// The generators of one application, keyed by logical name.
///
/// Configured names and the fallback resolve without any bookkeeping. A name
/// that fails to resolve is remembered so that it reports the same error on
/// every call.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use seqrow::{Dialect, GeneratorConfig, MemoryStore, Registry};
///
/// let registry = Registry::builder()
///     .datasource("main", Arc::new(MemoryStore::new()))
///     .generator("orders", GeneratorConfig::new(Dialect::Postgres).with_fallback(true))
///     .generator("invoices", GeneratorConfig::refer_to("orders"))
///     .build()?;
///
/// assert_eq!(registry.next_id("orders")?, 0);
/// assert_eq!(registry.next_id("invoices")?, 0);
/// // served by the fallback
/// assert_eq!(registry.next_ids("audit", 3)?, [0, 1, 2]);
/// # Ok::<(), seqrow::Error>(())
/// ```
pub struct Registry {
    generators: HashMap<String, Arc<BatchAllocator>>,
    fallback: Option<Arc<BatchAllocator>>,
    failures: Mutex<HashMap<String, ConfigError>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub(crate) fn new(
        generators: HashMap<String, Arc<BatchAllocator>>,
        fallback: Option<Arc<BatchAllocator>>,
    ) -> Self {
        Self {
            generators,
            fallback,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// The generator serving `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoGenerator`] if `name` is not configured and
    /// there is no fallback, and [`Error::InvalidRequest`] for an empty name.
    ///
    /// [`Error::InvalidRequest`]: crate::Error::InvalidRequest
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn generator(&self, name: &str) -> Result<Arc<BatchAllocator>> {
        validate(name, 1)?;
        if let Some(allocator) = self.generators.get(name) {
            return Ok(Arc::clone(allocator));
        }
        if let Some(fallback) = &self.fallback {
            #[cfg(feature = "tracing")]
            tracing::trace!(name, "serving unconfigured name from fallback");
            return Ok(Arc::clone(fallback));
        }

        let mut failures = lock(&self.failures)?;
        let err = failures.entry(name.to_owned()).or_insert_with(|| {
            #[cfg(feature = "tracing")]
            tracing::warn!(name, "no generator and no fallback");
            ConfigError::NoGenerator {
                name: name.to_owned(),
            }
        });
        Err(err.clone().into())
    }

    /// Names with a config of their own, in no particular order.
    pub fn configured(&self) -> impl Iterator<Item = &str> {
        self.generators.keys().map(String::as_str)
    }

    /// Creates the sequence table of every generator that owns one.
    ///
    /// # Errors
    ///
    /// Stops at the first table that cannot be created.
    pub fn create_tables(&self) -> Result<(), StoreError> {
        let mut done: Vec<&Arc<BatchAllocator>> = Vec::new();
        for allocator in self.generators.values() {
            if done.iter().any(|seen| Arc::ptr_eq(seen, allocator)) {
                continue;
            }
            allocator.create_table()?;
            #[cfg(feature = "tracing")]
            tracing::info!(
                table = %allocator.config().layout.qualified_table(),
                dialect = %allocator.config().dialect,
                "ensured sequence table"
            );
            done.push(allocator);
        }
        Ok(())
    }

    /// See [`IdAllocator::next_id`].
    ///
    /// # Errors
    ///
    /// See [`Registry::generator`] and [`IdAllocator::allocate`].
    pub fn next_id(&self, name: &str) -> Result<i64> {
        self.allocate(name, 1).map(|range| range.start())
    }

    /// See [`BatchAllocator::next_ids`].
    ///
    /// # Errors
    ///
    /// See [`Registry::generator`] and [`IdAllocator::allocate`].
    pub fn next_ids(&self, name: &str, count: u64) -> Result<Vec<i64>> {
        self.generator(name)?.next_ids(name, count)
    }

    /// See [`IdAllocator::allocate`].
    ///
    /// # Errors
    ///
    /// See [`Registry::generator`] and [`IdAllocator::allocate`].
    pub fn allocate(&self, name: &str, count: u64) -> Result<IdRange> {
        self.generator(name)?.allocate(name, count)
    }
}

impl IdAllocator for Registry {
    fn allocate(&self, name: &str, count: u64) -> Result<IdRange> {
        Self::allocate(self, name, count)
    }

    fn next_id(&self, name: &str) -> Result<i64> {
        Self::next_id(self, name)
    }

    fn next_ids(&self, name: &str, count: u64) -> Result<Vec<i64>> {
        Self::next_ids(self, name, count)
    }
}
