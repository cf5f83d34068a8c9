use std::{collections::HashMap, sync::Arc, thread, time::Duration};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    allocator::{BatchWindow, IdAllocator, IdRange},
    config::GeneratorConfig,
    dialect::SqlStatements,
    error::{Error, Result, StoreError},
    mutex::{Mutex, lock},
    store::{Connection, ConnectionSource, SequenceRow, Statement},
};

/// Bootstrap attempts before giving up on creating a missing row.
pub const MAX_CREATE_RACE_ATTEMPTS: u32 = 5;

type WindowSlot = Arc<Mutex<Option<BatchWindow>>>;

/// Hands out ids for any number of logical names from one sequence table.
///
/// Each name gets an in-memory window of ids. Requests are served from the
/// window without touching the database; when it runs short, the allocator
/// opens a transaction, reads the name's row under a row lock, moves its
/// `prev_value` forward by `step_size * max(fetch_size, count)` and commits,
/// taking everything in between as the new window.
///
/// The first request for a name with no row creates it from the
/// [`GeneratorConfig`]'s `initial_value`, `step_size` and `fetch_size`. If
/// another process creates the same row concurrently, the insert that loses
/// is rolled back and retried after `wait_millis_on_create_race`, up to
/// [`MAX_CREATE_RACE_ATTEMPTS`] times.
///
/// Every name served keeps its window for the lifetime of the allocator, so
/// logical names are expected to come from a bounded set (table or entity
/// names), not from request data.
///
/// ## Features
/// - ✅ Thread-safe: one window lock per name, held across the refill, so a
///   process never refills the same name twice at once
/// - ✅ Safe across processes that share the sequence table
/// - ❌ Gap-free: ids cached by a process that exits are never handed out
///
/// # Example
/// ```
/// use seqrow::{BatchAllocator, Dialect, GeneratorConfig, IdAllocator, MemoryStore};
///
/// let store = MemoryStore::new();
/// let allocator = BatchAllocator::new(
///     GeneratorConfig::new(Dialect::Postgres).with_fetch_size(10),
///     store.clone(),
/// );
///
/// assert_eq!(allocator.next_id("orders")?, 0);
/// assert_eq!(allocator.next_id("orders")?, 1);
/// assert_eq!(allocator.allocate("orders", 3)?.start(), 2);
/// assert_eq!(store.row("orders").unwrap().prev_value, 10);
/// # Ok::<(), seqrow::Error>(())
/// ```
pub struct BatchAllocator {
    config: GeneratorConfig,
    statements: SqlStatements,
    source: Arc<dyn ConnectionSource>,
    windows: Mutex<HashMap<String, WindowSlot>>,
}

enum Reservation {
    /// The row was advanced; the window holds the ids between.
    Reserved(BatchWindow),
    /// The row was missing and has been inserted.
    Created,
}

impl BatchAllocator {
    /// Creates an allocator for `config`, opening connections from `source`.
    pub fn new<S>(config: GeneratorConfig, source: S) -> Self
    where
        S: ConnectionSource + 'static,
    {
        Self::with_shared_source(config, Arc::new(source))
    }

    /// Creates an allocator over a source shared with other allocators.
    pub fn with_shared_source(config: GeneratorConfig, source: Arc<dyn ConnectionSource>) -> Self {
        let statements = config.dialect.statements(&config.layout);
        Self {
            config,
            statements,
            source,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn statements(&self) -> &SqlStatements {
        &self.statements
    }

    /// Creates this generator's sequence table if it is missing.
    ///
    /// # Errors
    ///
    /// Any failure to open a connection or run the DDL.
    pub fn create_table(&self) -> Result<(), StoreError> {
        let mut conn = self.source.open()?;
        conn.execute(&Statement::CreateTable {
            sql: &self.statements.create_table,
        })?;
        conn.commit()
    }

    /// The ids still cached for `name`, without consuming them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockPoisoned`] if a window lock was poisoned.
    pub fn peek(&self, name: &str) -> Result<Option<IdRange>> {
        let slot = lock(&self.windows)?.get(name).cloned();
        match slot {
            Some(slot) => Ok(lock(&slot)?.as_ref().map(BatchWindow::unconsumed)),
            None => Ok(None),
        }
    }

    /// Returns `count` ids for `name`, using up whatever is left in the
    /// current window before refilling for the rest.
    ///
    /// Unlike [`IdAllocator::allocate`], the result may span two windows and
    /// so need not be contiguous. It is still strictly increasing.
    ///
    /// # Errors
    ///
    /// See [`IdAllocator::allocate`].
    pub fn next_ids(&self, name: &str, count: u64) -> Result<Vec<i64>> {
        validate(name, count)?;
        let slot = self.slot(name)?;
        let mut window = lock(&slot)?;

        let cached = window.as_ref().map_or(0, |current| current.remaining().min(count));
        let rest = count - cached;
        // Refill before taking anything from the cached window, which stays
        // intact when the store refuses.
        let fresh = if rest > 0 {
            Some(self.refill(name, rest)?)
        } else {
            None
        };

        let mut ids = Vec::new();
        let collectable = usize::try_from(count)
            .ok()
            .is_some_and(|capacity| ids.try_reserve_exact(capacity).is_ok());
        if !collectable {
            if fresh.is_some() {
                *window = fresh;
            }
            return Err(Error::invalid(format!("cannot collect {count} ids in memory")));
        }

        if let Some(current) = window.as_mut() {
            ids.extend(current.take(cached));
        }
        if let Some(mut fresh) = fresh {
            ids.extend(fresh.take(rest));
            *window = Some(fresh);
        }
        Ok(ids)
    }

    fn slot(&self, name: &str) -> Result<WindowSlot> {
        let mut windows = lock(&self.windows)?;
        Ok(Arc::clone(windows.entry(name.to_owned()).or_default()))
    }

    /// Runs the locked read/advance/bootstrap protocol until a new window for
    /// at least `count` units is committed.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    fn refill(&self, name: &str, count: u64) -> Result<BatchWindow> {
        for _attempt in 1..=MAX_CREATE_RACE_ATTEMPTS {
            let mut conn = self
                .source
                .open()
                .map_err(|source| Error::allocation(name, source))?;

            match self.reserve(conn.as_mut(), name, count) {
                Ok(Reservation::Reserved(window)) => {
                    conn.commit()
                        .map_err(|source| Error::allocation(name, source))?;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(name, limit = window.limit(), "refilled window");
                    return Ok(window);
                }
                Ok(Reservation::Created) => {
                    conn.commit()
                        .map_err(|source| Error::allocation(name, source))?;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(name, attempt = _attempt, "created sequence row");
                }
                Err(StoreError::DuplicateKey(_)) => {
                    if let Err(_e) = conn.rollback() {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(name, error = %_e, "rollback after lost create race failed");
                    }
                    #[cfg(feature = "tracing")]
                    tracing::debug!(name, attempt = _attempt, "lost create race, retrying");
                    thread::sleep(Duration::from_millis(
                        self.config.wait_millis_on_create_race,
                    ));
                }
                Err(source) => {
                    if let Err(_e) = conn.rollback() {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(name, error = %_e, "rollback after failed refill failed");
                    }
                    return Err(Error::allocation(name, source));
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(name, attempts = MAX_CREATE_RACE_ATTEMPTS, "giving up on create race");
        Err(Error::BootstrapRaceExceeded {
            name: name.to_owned(),
            attempts: MAX_CREATE_RACE_ATTEMPTS,
        })
    }

    /// One transaction's worth of the protocol. The caller commits or rolls
    /// back.
    fn reserve(
        &self,
        conn: &mut dyn Connection,
        name: &str,
        count: u64,
    ) -> Result<Reservation, StoreError> {
        let read = Statement::LockedRead {
            sql: self.statements.locked_read.as_str(),
            name,
        };
        let mut row = conn.query_row(&read)?;

        if row.is_none() && self.config.dialect.needs_table_lock_on_missing_row() {
            if let Some(sql) = self.statements.table_lock.as_deref() {
                conn.execute(&Statement::TableLock { sql })?;
                // Another process may have created the row while we waited.
                row = conn.query_row(&read)?;
            }
        }

        let Some(row) = row else {
            let row = SequenceRow {
                name: name.to_owned(),
                prev_value: self.config.initial_value,
                step_size: self.config.step_size,
                fetch_size: self.config.fetch_size,
            };
            conn.execute(&Statement::Bootstrap {
                sql: &self.statements.bootstrap_insert,
                row: &row,
            })?;
            return Ok(Reservation::Created);
        };

        let window = BatchWindow::reserve(&row, count)?;
        let advanced = conn.execute(&Statement::Advance {
            sql: &self.statements.advance,
            name,
            expected: row.prev_value,
            next: window.limit(),
        })?;
        if advanced != 1 {
            return Err(StoreError::Conflict(name.to_owned()));
        }
        Ok(Reservation::Reserved(window))
    }
}

impl IdAllocator for BatchAllocator {
    fn allocate(&self, name: &str, count: u64) -> Result<IdRange> {
        validate(name, count)?;
        let slot = self.slot(name)?;
        let mut window = lock(&slot)?;

        if let Some(current) = window.as_mut() {
            if current.remaining() >= count {
                return Ok(current.take(count));
            }
        }

        // Whatever is left of an insufficient window is abandoned so that the
        // range stays contiguous.
        let mut fresh = self.refill(name, count)?;
        let range = fresh.take(count);
        *window = Some(fresh);
        Ok(range)
    }

    fn next_ids(&self, name: &str, count: u64) -> Result<Vec<i64>> {
        Self::next_ids(self, name, count)
    }
}

pub(crate) fn validate(name: &str, count: u64) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid("name must not be empty"));
    }
    if count == 0 {
        return Err(Error::invalid("count must be at least 1"));
    }
    Ok(())
}
