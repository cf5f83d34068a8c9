use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use portable_atomic::{AtomicBool, AtomicU64, Ordering};

use crate::{
    error::StoreError,
    store::{Connection, ConnectionSource, SequenceRow, Statement, UnsupportedStatement},
};

/// How long a [`MemoryStore`] connection waits for a lock before failing with
/// [`StoreError::LockTimeout`].
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Counters describing how a [`MemoryStore`] has been used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Connections opened, i.e. database round trips.
    pub connections: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

/// The datasource could not be reached.
#[derive(Debug, thiserror::Error)]
#[error("memory store is unavailable")]
pub struct Unavailable;

/// An in-process sequence table.
///
/// `MemoryStore` models one sequence table shared by every clone of the
/// handle, with the locking behavior the allocator relies on from a real
/// database:
///
/// - a locked read of an existing row holds that row until the transaction
///   ends; a locked read of a missing row locks nothing;
/// - a table lock waits for every other transaction's row locks and blocks
///   all other statements until released;
/// - inserting an existing name fails with [`StoreError::DuplicateKey`];
///   inserting a name another open transaction just inserted waits for it;
/// - rollback, explicit or by drop, undoes every write.
///
/// The SQL text of each [`Statement`] is ignored, so every [`Dialect`] can run
/// against the same store. Clones share state, so several registries built on
/// clones of one store behave like separate processes sharing a database.
///
/// [`Dialect`]: crate::Dialect
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    released: Condvar,
    lock_timeout: Duration,
    available: AtomicBool,
    next_id: AtomicU64,
    connections: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

#[derive(Default)]
struct State {
    rows: BTreeMap<String, SequenceRow>,
    row_locks: HashMap<String, u64>,
    table_lock: Option<u64>,
}

impl State {
    fn table_free_for(&self, id: u64) -> bool {
        self.table_lock.is_none_or(|owner| owner == id)
    }

    fn row_free_for(&self, name: &str, id: u64) -> bool {
        self.table_free_for(id) && self.row_locks.get(name).is_none_or(|&owner| owner == id)
    }

    fn rows_locked_by_others(&self, id: u64) -> bool {
        self.row_locks.values().any(|&owner| owner != id)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                released: Condvar::new(),
                lock_timeout,
                available: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
                connections: AtomicU64::new(0),
                commits: AtomicU64::new(0),
                rollbacks: AtomicU64::new(0),
            }),
        }
    }

    /// Writes `row` directly, replacing any row with the same name.
    pub fn insert_row(&self, row: SequenceRow) {
        self.shared.lock().rows.insert(row.name.clone(), row);
    }

    /// The current row for `name`, including uncommitted writes.
    pub fn row(&self, name: &str) -> Option<SequenceRow> {
        self.shared.lock().rows.get(name).cloned()
    }

    /// Every row, ordered by name.
    pub fn rows(&self) -> Vec<SequenceRow> {
        self.shared.lock().rows.values().cloned().collect()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            connections: self.shared.connections.load(Ordering::Relaxed),
            commits: self.shared.commits.load(Ordering::Relaxed),
            rollbacks: self.shared.rollbacks.load(Ordering::Relaxed),
        }
    }

    /// While unavailable, [`ConnectionSource::open`] fails with an
    /// [`Unavailable`] backend error.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::Relaxed);
    }
}

impl ConnectionSource for MemoryStore {
    fn open(&self) -> Result<Box<dyn Connection>, StoreError> {
        if !self.shared.available.load(Ordering::Relaxed) {
            return Err(StoreError::backend(Unavailable));
        }
        self.shared.connections.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryConnection {
            id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
            shared: Arc::clone(&self.shared),
            undo: Vec::new(),
            open: true,
        }))
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until `ready` holds or the lock timeout elapses.
    fn wait_until(
        &self,
        what: &str,
        ready: impl Fn(&State) -> bool,
    ) -> Result<MutexGuard<'_, State>, StoreError> {
        let guard = self.lock();
        let (guard, _) = self
            .released
            .wait_timeout_while(guard, self.lock_timeout, |state| !ready(state))
            .unwrap_or_else(PoisonError::into_inner);
        if ready(&guard) {
            Ok(guard)
        } else {
            Err(StoreError::LockTimeout(what.to_owned()))
        }
    }
}

enum Undo {
    Remove(String),
    Restore(SequenceRow),
}

struct MemoryConnection {
    id: u64,
    shared: Arc<Shared>,
    undo: Vec<Undo>,
    open: bool,
}

impl MemoryConnection {
    fn end(&mut self, commit: bool) {
        if !self.open {
            return;
        }
        self.open = false;

        let id = self.id;
        let mut state = self.shared.lock();
        if commit {
            self.undo.clear();
        } else {
            for undo in self.undo.drain(..).rev() {
                match undo {
                    Undo::Remove(name) => {
                        state.rows.remove(&name);
                    }
                    Undo::Restore(row) => {
                        state.rows.insert(row.name.clone(), row);
                    }
                }
            }
        }
        state.row_locks.retain(|_, owner| *owner != id);
        if state.table_lock == Some(id) {
            state.table_lock = None;
        }
        drop(state);
        self.shared.released.notify_all();

        let counter = if commit {
            &self.shared.commits
        } else {
            &self.shared.rollbacks
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Connection for MemoryConnection {
    fn query_row(&mut self, stmt: &Statement<'_>) -> Result<Option<SequenceRow>, StoreError> {
        let Statement::LockedRead { name, .. } = *stmt else {
            return Err(UnsupportedStatement::error(stmt, "query_row"));
        };
        let id = self.id;
        let shared = Arc::clone(&self.shared);
        let mut state = shared.wait_until(name, |s| s.row_free_for(name, id))?;
        let row = state.rows.get(name).cloned();
        if row.is_some() {
            state.row_locks.insert(name.to_owned(), id);
        }
        Ok(row)
    }

    fn execute(&mut self, stmt: &Statement<'_>) -> Result<usize, StoreError> {
        let id = self.id;
        let shared = Arc::clone(&self.shared);
        match *stmt {
            Statement::Advance {
                name,
                expected,
                next,
                ..
            } => {
                let mut state = shared.wait_until(name, |s| s.row_free_for(name, id))?;
                let Some(row) = state.rows.get_mut(name) else {
                    return Ok(0);
                };
                if row.prev_value != expected {
                    return Ok(0);
                }
                self.undo.push(Undo::Restore(row.clone()));
                row.prev_value = next;
                state.row_locks.insert(name.to_owned(), id);
                Ok(1)
            }
            Statement::Bootstrap { row, .. } => {
                let mut state = shared.wait_until(&row.name, |s| s.row_free_for(&row.name, id))?;
                if state.rows.contains_key(&row.name) {
                    return Err(StoreError::DuplicateKey(row.name.clone()));
                }
                state.rows.insert(row.name.clone(), row.clone());
                state.row_locks.insert(row.name.clone(), id);
                self.undo.push(Undo::Remove(row.name.clone()));
                Ok(1)
            }
            Statement::TableLock { .. } => {
                let mut state = shared.wait_until("table", |s| {
                    s.table_free_for(id) && !s.rows_locked_by_others(id)
                })?;
                state.table_lock = Some(id);
                Ok(0)
            }
            Statement::CreateTable { .. } => Ok(0),
            Statement::LockedRead { .. } => Err(UnsupportedStatement::error(stmt, "execute")),
        }
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.end(true);
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.end(false);
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.end(false);
    }
}
