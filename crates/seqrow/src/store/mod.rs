//! The sequence store: the persisted row contract and the connection seam.
//!
//! The allocator never owns connections. It asks a [`ConnectionSource`] for a
//! [`Connection`] that is already inside a transaction, runs typed
//! [`Statement`]s on it, and commits or rolls back. Any host framework adapts
//! to this with a few lines of glue; two backends ship with the crate:
//!
//! - [`MemoryStore`]: an in-process table with row locks, table locks and
//!   rollback, for tests and simulations.
//! - `SqliteSource` (feature `sqlite`): an embedded SQLite database.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::*;
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
#[cfg(feature = "sqlite")]
pub use sqlite::*;

use crate::error::StoreError;

/// One persisted counter.
///
/// The process that commits a new `prev_value` owns every value in
/// `[old_prev_value, new_prev_value)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SequenceRow {
    pub name: String,
    /// Last value consumed by any process.
    pub prev_value: i64,
    /// Distance between consecutive ids.
    pub step_size: u32,
    /// Units handed out per round trip.
    pub fetch_size: u32,
}

/// A statement with its bound values, as rendered by a [`Dialect`].
///
/// Backends that speak SQL execute `sql` and bind the values in the order
/// documented on [`SqlStatements`]. Backends that do not, such as
/// [`MemoryStore`], interpret the variant directly.
///
/// [`Dialect`]: crate::Dialect
/// [`SqlStatements`]: crate::SqlStatements
#[derive(Clone, Copy, Debug)]
pub enum Statement<'a> {
    /// Read a row and hold its lock until the transaction ends.
    LockedRead { sql: &'a str, name: &'a str },
    /// Set `prev_value` to `next` if it still equals `expected`.
    Advance {
        sql: &'a str,
        name: &'a str,
        expected: i64,
        next: i64,
    },
    /// Insert the first row for `row.name`.
    Bootstrap { sql: &'a str, row: &'a SequenceRow },
    /// Lock the whole table.
    TableLock { sql: &'a str },
    /// Create the sequence table.
    CreateTable { sql: &'a str },
}

impl Statement<'_> {
    pub fn sql(&self) -> &str {
        match self {
            Self::LockedRead { sql, .. }
            | Self::Advance { sql, .. }
            | Self::Bootstrap { sql, .. }
            | Self::TableLock { sql }
            | Self::CreateTable { sql } => sql,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::LockedRead { .. } => "locked read",
            Self::Advance { .. } => "advance",
            Self::Bootstrap { .. } => "bootstrap insert",
            Self::TableLock { .. } => "table lock",
            Self::CreateTable { .. } => "create table",
        }
    }
}

/// A statement was handed to the wrong [`Connection`] method.
#[derive(Debug, thiserror::Error)]
#[error("{kind} statements cannot be run with `{method}`")]
pub struct UnsupportedStatement {
    pub kind: &'static str,
    pub method: &'static str,
}

impl UnsupportedStatement {
    pub(crate) fn error(stmt: &Statement<'_>, method: &'static str) -> StoreError {
        StoreError::backend(Self {
            kind: stmt.kind(),
            method,
        })
    }
}

/// A database connection inside an open transaction.
///
/// Dropping a connection without calling [`Connection::commit`] must roll the
/// transaction back and release every lock it holds.
pub trait Connection {
    /// Runs a [`Statement::LockedRead`], returning the row if it exists.
    ///
    /// # Errors
    ///
    /// Any failure to execute the statement, including lock wait timeouts.
    fn query_row(&mut self, stmt: &Statement<'_>) -> Result<Option<SequenceRow>, StoreError>;

    /// Runs any other statement, returning the number of affected rows.
    ///
    /// # Errors
    ///
    /// Any failure to execute the statement. A bootstrap insert that hits the
    /// unique key must report [`StoreError::DuplicateKey`].
    fn execute(&mut self, stmt: &Statement<'_>) -> Result<usize, StoreError>;

    /// Commits the transaction and releases its locks.
    ///
    /// # Errors
    ///
    /// Any failure to commit.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Rolls the transaction back and releases its locks.
    ///
    /// # Errors
    ///
    /// Any failure to roll back.
    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Opens connections to one physical datasource.
///
/// The allocator imposes no pooling, retry or health-check policy; a source
/// may open a fresh connection every time or lend one from a pool.
///
/// Plain functions and closures are sources too:
///
/// ```
/// use seqrow::{Connection, ConnectionSource, MemoryStore, StoreError};
///
/// let store = MemoryStore::new();
/// let source = move || -> Result<Box<dyn Connection>, StoreError> { store.open() };
/// assert!(source.open().is_ok());
/// ```
pub trait ConnectionSource: Send + Sync {
    /// Opens a connection with a transaction already begun.
    ///
    /// # Errors
    ///
    /// Any failure to connect or to begin the transaction.
    fn open(&self) -> Result<Box<dyn Connection>, StoreError>;
}

impl<F> ConnectionSource for F
where
    F: Fn() -> Result<Box<dyn Connection>, StoreError> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn Connection>, StoreError> {
        self()
    }
}
