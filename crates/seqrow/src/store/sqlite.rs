use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use rusqlite::{ErrorCode, OptionalExtension, ffi, params};

use crate::{
    config::GeneratorConfig,
    error::StoreError,
    store::{Connection, ConnectionSource, SequenceRow, Statement, UnsupportedStatement},
};

/// How long a connection waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens connections to a SQLite database file.
///
/// Every connection starts with `BEGIN IMMEDIATE`, taking the database write
/// lock up front. SQLite has no row locks, so this is what serializes the
/// read-advance-commit sequence between processes. Waiting for the lock is
/// bounded by the busy timeout.
#[derive(Clone, Debug)]
pub struct SqliteSource {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the sequence table described by `config` if it is missing.
    ///
    /// # Errors
    ///
    /// Any failure to open the database or run the DDL.
    pub fn create_table(&self, config: &GeneratorConfig) -> Result<(), StoreError> {
        let statements = config.dialect.statements(&config.layout);
        let mut conn = self.open()?;
        conn.execute(&Statement::CreateTable {
            sql: &statements.create_table,
        })?;
        conn.commit()
    }
}

impl ConnectionSource for SqliteSource {
    fn open(&self) -> Result<Box<dyn Connection>, StoreError> {
        let conn = rusqlite::Connection::open(&self.path).map_err(store_error)?;
        conn.busy_timeout(self.busy_timeout).map_err(store_error)?;
        conn.execute_batch("BEGIN IMMEDIATE").map_err(store_error)?;
        Ok(Box::new(SqliteConnection { conn, open: true }))
    }
}

struct SqliteConnection {
    conn: rusqlite::Connection,
    open: bool,
}

impl SqliteConnection {
    fn finish(&mut self, sql: &str) -> Result<(), StoreError> {
        self.open = false;
        self.conn.execute_batch(sql).map_err(store_error)
    }
}

impl Connection for SqliteConnection {
    fn query_row(&mut self, stmt: &Statement<'_>) -> Result<Option<SequenceRow>, StoreError> {
        let Statement::LockedRead { sql, name } = *stmt else {
            return Err(UnsupportedStatement::error(stmt, "query_row"));
        };
        let values = self
            .conn
            .query_row(sql, params![name], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })
            .optional()
            .map_err(store_error)?;

        values
            .map(|(prev_value, step_size, fetch_size)| {
                let size = |value: i64, column: &str| {
                    u32::try_from(value).map_err(|_| {
                        StoreError::InvalidRow(format!("`{name}` has {column} {value}"))
                    })
                };
                Ok(SequenceRow {
                    name: name.to_owned(),
                    prev_value,
                    step_size: size(step_size, "step size")?,
                    fetch_size: size(fetch_size, "fetch size")?,
                })
            })
            .transpose()
    }

    fn execute(&mut self, stmt: &Statement<'_>) -> Result<usize, StoreError> {
        let sql = stmt.sql();
        let result = match *stmt {
            Statement::Advance {
                name, expected, next, ..
            } => self.conn.execute(sql, params![next, name, expected]),
            Statement::Bootstrap { row, .. } => self.conn.execute(
                sql,
                params![row.name, row.prev_value, row.step_size, row.fetch_size],
            ),
            Statement::TableLock { .. } | Statement::CreateTable { .. } => {
                self.conn.execute(sql, params![])
            }
            Statement::LockedRead { .. } => {
                return Err(UnsupportedStatement::error(stmt, "execute"));
            }
        };
        result.map_err(store_error)
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finish("COMMIT")
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finish("ROLLBACK")
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if self.open {
            let _ = self.finish("ROLLBACK");
        }
    }
}

/// Only a primary key or unique violation is a lost create race. Other
/// constraint failures (`NOT NULL`, `CHECK`) come from the table itself.
fn store_error(err: rusqlite::Error) -> StoreError {
    let rusqlite::Error::SqliteFailure(failure, _) = &err else {
        return StoreError::backend(err);
    };
    let (code, extended_code) = (failure.code, failure.extended_code);
    match code {
        ErrorCode::ConstraintViolation
            if matches!(
                extended_code,
                ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE
            ) =>
        {
            StoreError::DuplicateKey(err.to_string())
        }
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
            StoreError::LockTimeout(err.to_string())
        }
        _ => StoreError::backend(err),
    }
}
