//! SQL dialects for the sequence table.
//!
//! A [`Dialect`] renders the statements the allocator runs against one
//! vendor's database. The set of vendors is closed: supporting another means
//! adding a variant and a module, never touching the allocator.

mod postgres;
mod sql_server;
mod sqlite;

use core::{fmt, str::FromStr};

use crate::{config::TableLayout, error::ConfigError};

/// The statements one generator runs, rendered once for its table layout.
///
/// Placeholders are positional and bound in a fixed order per statement:
///
/// | Statement | Parameters |
/// |---|---|
/// | `locked_read` | `name` |
/// | `advance` | `next`, `name`, `expected` |
/// | `bootstrap_insert` | `name`, `prev_value`, `step_size`, `fetch_size` |
/// | `table_lock` | none |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqlStatements {
    /// Reads `prev_value, step_size, fetch_size` for a name, holding a row
    /// lock until the transaction ends.
    pub locked_read: String,
    /// Moves `prev_value` forward, only if it still holds the value read.
    pub advance: String,
    /// Creates the first row for a name.
    pub bootstrap_insert: String,
    /// Serializes first-row inserts across every name in the table.
    pub table_lock: Option<String>,
    /// Creates the sequence table if it is missing.
    pub create_table: String,
}

/// Supported database vendors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Dialect {
    /// MVCC with explicit `FOR UPDATE` row locks. A missing row cannot be
    /// locked, so first inserts take a table lock.
    #[default]
    #[cfg_attr(feature = "serde", serde(alias = "postgresql", alias = "pg"))]
    Postgres,
    /// `UPDLOCK, HOLDLOCK, ROWLOCK` hints. The key-range lock taken by
    /// `HOLDLOCK` also covers a missing key, so no table lock is needed.
    #[cfg_attr(feature = "serde", serde(alias = "mssql"))]
    SqlServer,
    /// Embedded database without row locks. Connections open with
    /// `BEGIN IMMEDIATE`, which holds the database write lock for the whole
    /// transaction.
    Sqlite,
}

impl Dialect {
    pub const ALL: [Self; 3] = [Self::Postgres, Self::SqlServer, Self::Sqlite];

    /// Renders every statement for `layout`.
    pub fn statements(self, layout: &TableLayout) -> SqlStatements {
        match self {
            Self::Postgres => postgres::statements(layout),
            Self::SqlServer => sql_server::statements(layout),
            Self::Sqlite => sqlite::statements(layout),
        }
    }

    /// Whether a first insert must be preceded by the table lock, because the
    /// row lock cannot stop two transactions from inserting the same name.
    pub const fn needs_table_lock_on_missing_row(self) -> bool {
        match self {
            Self::Postgres | Self::Sqlite => true,
            Self::SqlServer => false,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::SqlServer => "sqlserver",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "sqlserver" | "mssql" => Ok(Self::SqlServer),
            "sqlite" => Ok(Self::Sqlite),
            _ => Err(ConfigError::UnknownDialect(s.to_owned())),
        }
    }
}

/// Column names shared by every dialect's statements.
struct Columns<'a> {
    table: String,
    name: &'a str,
    prev: &'a str,
    step: &'a str,
    fetch: &'a str,
}

impl<'a> Columns<'a> {
    fn new(layout: &'a TableLayout) -> Self {
        Self {
            table: layout.qualified_table(),
            name: &layout.name_column,
            prev: &layout.prev_value_column,
            step: &layout.step_size_column,
            fetch: &layout.fetch_size_column,
        }
    }

    /// `UPDATE` and `INSERT` read the same in every dialect; only the
    /// placeholder syntax differs.
    fn advance(&self, p: impl Fn(usize) -> String) -> String {
        format!(
            "UPDATE {} SET {prev} = {} WHERE {} = {} AND {prev} = {}",
            self.table,
            p(1),
            self.name,
            p(2),
            p(3),
            prev = self.prev,
        )
    }

    fn insert(&self, p: impl Fn(usize) -> String) -> String {
        format!(
            "INSERT INTO {} ({}, {}, {}, {}) VALUES ({}, {}, {}, {})",
            self.table,
            self.name,
            self.prev,
            self.step,
            self.fetch,
            p(1),
            p(2),
            p(3),
            p(4),
        )
    }
}
