use std::{
    collections::HashSet,
    sync::{Arc, Barrier, Mutex},
    thread::scope,
};

use crate::{
    BatchAllocator, Connection, ConnectionSource, Dialect, Error, GeneratorConfig, IdAllocator,
    IdRange, MAX_CREATE_RACE_ATTEMPTS, MemoryStore, SequenceRow, Statement, StoreError,
};

fn config(dialect: Dialect) -> GeneratorConfig {
    GeneratorConfig::new(dialect)
        .with_fetch_size(10)
        .with_wait_millis_on_create_race(1)
}

fn seed(store: &MemoryStore, name: &str, prev_value: i64, step_size: u32, fetch_size: u32) {
    store.insert_row(SequenceRow {
        name: name.into(),
        prev_value,
        step_size,
        fetch_size,
    });
}

fn run_ranges_are_disjoint_and_increasing(ranges: &[IdRange]) {
    for pair in ranges.windows(2) {
        assert!(
            pair[0].is_disjoint(&pair[1]) && pair[1].start() >= pair[0].end(),
            "{:?} does not follow {:?}",
            pair[1],
            pair[0]
        );
    }
}

fn run_unique_across_threads<G>(allocator: &G, name: &str, threads: usize, per_thread: usize)
where
    G: IdAllocator + Sync,
{
    let seen = Mutex::new(HashSet::with_capacity(threads * per_thread));
    scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                let mut last = None;
                for _ in 0..per_thread {
                    let id = allocator.next_id(name).unwrap();
                    if let Some(last) = last {
                        assert!(id > last, "{id} after {last}");
                    }
                    last = Some(id);
                    assert!(seen.lock().unwrap().insert(id), "duplicate id {id}");
                }
            });
        }
    });
    assert_eq!(seen.lock().unwrap().len(), threads * per_thread);
}

#[test]
fn serves_a_window_with_one_round_trip() {
    let store = MemoryStore::new();
    seed(&store, "x", 0, 1, 10);
    let allocator = BatchAllocator::new(config(Dialect::Postgres), store.clone());

    for expected in 0..10 {
        assert_eq!(allocator.next_id("x").unwrap(), expected);
    }
    assert_eq!(store.stats().connections, 1);

    assert_eq!(allocator.next_id("x").unwrap(), 10);
    assert_eq!(store.stats().connections, 2);
    assert_eq!(store.row("x").unwrap().prev_value, 20);
}

#[test]
fn first_use_creates_the_row_then_advances_it() {
    let store = MemoryStore::new();
    let allocator = BatchAllocator::new(
        config(Dialect::Postgres).with_initial_value(1000),
        store.clone(),
    );

    assert_eq!(allocator.next_id("orders").unwrap(), 1000);
    assert_eq!(
        store.row("orders").unwrap(),
        SequenceRow {
            name: "orders".into(),
            prev_value: 1010,
            step_size: 1,
            fetch_size: 10,
        }
    );
    // one transaction to insert, one to advance
    assert_eq!(store.stats().connections, 2);
    assert_eq!(store.stats().commits, 2);
}

#[test]
fn batch_larger_than_fetch_size_takes_one_round_trip() {
    let store = MemoryStore::new();
    seed(&store, "x", 0, 1, 10);
    let allocator = BatchAllocator::new(config(Dialect::Postgres), store.clone());

    let ids = allocator.next_ids("x", 25).unwrap();
    assert_eq!(ids, (0..25).collect::<Vec<_>>());
    assert_eq!(store.stats().connections, 1);
    assert_eq!(store.row("x").unwrap().prev_value, 25);
    assert_eq!(allocator.peek("x").unwrap(), Some(IdRange::new(25, 0, 1)));
}

#[test]
fn next_ids_drains_the_window_before_refilling() {
    let store = MemoryStore::new();
    seed(&store, "x", 0, 1, 10);
    let allocator = BatchAllocator::new(config(Dialect::Postgres), store.clone());

    allocator.allocate("x", 7).unwrap();
    let ids = allocator.next_ids("x", 5).unwrap();
    assert_eq!(ids, [7, 8, 9, 10, 11]);
    assert_eq!(allocator.peek("x").unwrap(), Some(IdRange::new(12, 8, 1)));
}

#[test]
fn allocate_keeps_ranges_contiguous() {
    let store = MemoryStore::new();
    seed(&store, "x", 0, 1, 10);
    let allocator = BatchAllocator::new(config(Dialect::Postgres), store.clone());

    let first = allocator.allocate("x", 7).unwrap();
    let second = allocator.allocate("x", 5).unwrap();
    assert_eq!(first, IdRange::new(0, 7, 1));
    // 7..10 is abandoned
    assert_eq!(second, IdRange::new(10, 5, 1));
    run_ranges_are_disjoint_and_increasing(&[first, second]);
}

#[test]
fn stored_step_and_fetch_sizes_win_over_config() {
    let store = MemoryStore::new();
    seed(&store, "x", 100, 5, 4);
    let allocator = BatchAllocator::new(
        config(Dialect::Postgres).with_step_size(1).with_fetch_size(1000),
        store.clone(),
    );

    let ids: Vec<_> = (0..5).map(|_| allocator.next_id("x").unwrap()).collect();
    assert_eq!(ids, [100, 105, 110, 115, 120]);
    assert_eq!(store.row("x").unwrap().prev_value, 140);
    assert_eq!(store.stats().connections, 2);
}

#[test]
fn names_are_independent() {
    let store = MemoryStore::new();
    let allocator = BatchAllocator::new(config(Dialect::SqlServer), store.clone());

    assert_eq!(allocator.next_id("a").unwrap(), 0);
    assert_eq!(allocator.next_id("b").unwrap(), 0);
    assert_eq!(allocator.next_id("a").unwrap(), 1);
    assert_eq!(store.rows().len(), 2);
}

#[test]
fn statements_follow_the_configured_layout() {
    let allocator = BatchAllocator::new(
        config(Dialect::Postgres).with_schema("ids").with_table("seq"),
        MemoryStore::new(),
    );
    let statements = allocator.statements();
    assert!(statements.locked_read.contains("FROM ids.seq WHERE"));
    assert_eq!(
        statements.table_lock.as_deref(),
        Some("LOCK TABLE ids.seq IN SHARE ROW EXCLUSIVE MODE")
    );
}

#[test]
fn rejects_empty_names_and_zero_counts() {
    let allocator = BatchAllocator::new(config(Dialect::Postgres), MemoryStore::new());
    assert!(matches!(
        allocator.next_id(""),
        Err(Error::InvalidRequest { .. })
    ));
    assert!(matches!(
        allocator.allocate("x", 0),
        Err(Error::InvalidRequest { .. })
    ));
    assert!(matches!(
        allocator.next_ids("x", 0),
        Err(Error::InvalidRequest { .. })
    ));
}

#[test]
fn oversized_batches_are_refused() {
    let store = MemoryStore::new();
    seed(&store, "x", 0, 1, 10);
    let allocator = BatchAllocator::new(config(Dialect::Postgres), store.clone());
    assert_eq!(allocator.next_id("x").unwrap(), 0);

    // Past the end of the sequence: the store refuses, as for `allocate`.
    for err in [
        allocator.next_ids("x", u64::MAX).unwrap_err(),
        allocator.allocate("x", u64::MAX).unwrap_err(),
    ] {
        assert!(matches!(
            err,
            Error::Allocation {
                source: StoreError::Exhausted(_),
                ..
            }
        ));
    }
    assert_eq!(store.row("x").unwrap().prev_value, 10);
    assert_eq!(allocator.peek("x").unwrap(), Some(IdRange::new(1, 9, 1)));

    // Reservable in the store, but too many to hold in a `Vec`.
    let err = allocator.next_ids("x", 1 << 62).unwrap_err();
    assert!(matches!(err, Error::InvalidRequest { .. }));
    assert_eq!(store.row("x").unwrap().prev_value, 1 + (1 << 62));

    // The new window is kept; what was cached before it is skipped.
    assert_eq!(allocator.next_id("x").unwrap(), 10);
}

#[test]
fn store_failures_surface_with_the_name() {
    let store = MemoryStore::new();
    seed(&store, "x", 0, 1, 2);
    let allocator = BatchAllocator::new(config(Dialect::Postgres), store.clone());
    allocator.allocate("x", 2).unwrap();

    store.set_available(false);
    match allocator.next_id("x") {
        Err(Error::Allocation { name, source }) => {
            assert_eq!(name, "x");
            assert!(matches!(source, StoreError::Backend(_)));
        }
        other => panic!("expected allocation error, got {other:?}"),
    }

    store.set_available(true);
    assert_eq!(allocator.next_id("x").unwrap(), 2);
}

#[test]
fn unique_across_threads_of_one_process() {
    let store = MemoryStore::new();
    let allocator = BatchAllocator::new(config(Dialect::Postgres), store.clone());
    run_unique_across_threads(&allocator, "x", 8, 500);
    // windows of 10 ids, plus the insert
    assert_eq!(store.stats().connections, 401);
}

#[test]
fn unique_across_processes_for_every_dialect() {
    for dialect in Dialect::ALL {
        let store = MemoryStore::new();
        let processes: Vec<_> = (0..4)
            .map(|_| BatchAllocator::new(config(dialect), store.clone()))
            .collect();

        let ranges = Mutex::new(Vec::new());
        scope(|s| {
            for (i, allocator) in processes.iter().enumerate() {
                let ranges = &ranges;
                s.spawn(move || {
                    let mut own = Vec::new();
                    for n in 0..200 {
                        own.push(allocator.allocate("x", 1 + (n + i as u64) % 7).unwrap());
                    }
                    run_ranges_are_disjoint_and_increasing(&own);
                    ranges.lock().unwrap().extend(own);
                });
            }
        });

        let mut ranges = ranges.into_inner().unwrap();
        ranges.sort_by_key(IdRange::start);
        run_ranges_are_disjoint_and_increasing(&ranges);
        assert_eq!(store.rows().len(), 1, "{dialect}");
    }
}

#[test]
fn concurrent_first_use_creates_one_row() {
    const PROCESSES: usize = 8;

    for dialect in Dialect::ALL {
        let store = MemoryStore::new();
        let processes: Vec<_> = (0..PROCESSES)
            .map(|_| BatchAllocator::new(config(dialect), store.clone()))
            .collect();
        let barrier = Barrier::new(PROCESSES);

        let ids = Mutex::new(HashSet::new());
        scope(|s| {
            for allocator in &processes {
                let (barrier, ids) = (&barrier, &ids);
                s.spawn(move || {
                    barrier.wait();
                    let id = allocator.next_id("new-name").unwrap();
                    assert!(ids.lock().unwrap().insert(id));
                });
            }
        });

        assert_eq!(ids.into_inner().unwrap().len(), PROCESSES, "{dialect}");
        assert_eq!(store.rows().len(), 1, "{dialect}");
        assert_eq!(
            store.row("new-name").unwrap().prev_value,
            10 * PROCESSES as i64,
            "{dialect}"
        );
    }
}

#[test]
fn dialects_allocate_identically() {
    let script = |dialect: Dialect| {
        let store = MemoryStore::new();
        seed(&store, "seeded", 500, 3, 4);
        let allocator = BatchAllocator::new(config(dialect).with_step_size(2), store.clone());

        let mut out = Vec::new();
        for name in ["a", "seeded", "a", "b", "seeded"] {
            out.push(allocator.allocate(name, 3).unwrap());
        }
        out.push(allocator.allocate("a", 30).unwrap());
        let spanning = allocator.next_ids("seeded", 6).unwrap();
        out.extend(spanning.into_iter().map(|id| IdRange::new(id, 1, 1)));
        (out, store.rows())
    };

    let expected = script(Dialect::Postgres);
    assert_eq!(expected.0[0], IdRange::new(0, 3, 2));
    assert_eq!(expected.0[1], IdRange::new(500, 3, 3));
    for dialect in [Dialect::SqlServer, Dialect::Sqlite] {
        let actual = script(dialect);
        assert_eq!(actual.0, expected.0, "{dialect}");
        assert_eq!(actual.1, expected.1, "{dialect}");
    }
}

/// A store where the row never becomes visible and every insert collides.
struct AlwaysLosesCreateRace;

impl Connection for AlwaysLosesCreateRace {
    fn query_row(&mut self, _: &Statement<'_>) -> Result<Option<SequenceRow>, StoreError> {
        Ok(None)
    }

    fn execute(&mut self, stmt: &Statement<'_>) -> Result<usize, StoreError> {
        match stmt {
            Statement::Bootstrap { row, .. } => Err(StoreError::DuplicateKey(row.name.clone())),
            _ => Ok(0),
        }
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[test]
fn gives_up_after_repeatedly_losing_the_create_race() {
    let opened = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&opened);
    let source = move || -> Result<Box<dyn Connection>, StoreError> {
        *counter.lock().unwrap() += 1;
        Ok(Box::new(AlwaysLosesCreateRace))
    };
    let allocator = BatchAllocator::new(config(Dialect::SqlServer), source);

    match allocator.next_id("x") {
        Err(Error::BootstrapRaceExceeded { name, attempts }) => {
            assert_eq!(name, "x");
            assert_eq!(attempts, MAX_CREATE_RACE_ATTEMPTS);
        }
        other => panic!("expected bootstrap race error, got {other:?}"),
    }
    assert_eq!(*opened.lock().unwrap(), MAX_CREATE_RACE_ATTEMPTS);
}

/// Wraps a store and makes every advance miss.
struct LosesAdvances(Box<dyn Connection>);

impl Connection for LosesAdvances {
    fn query_row(&mut self, stmt: &Statement<'_>) -> Result<Option<SequenceRow>, StoreError> {
        self.0.query_row(stmt)
    }

    fn execute(&mut self, stmt: &Statement<'_>) -> Result<usize, StoreError> {
        match stmt {
            Statement::Advance { .. } => Ok(0),
            _ => self.0.execute(stmt),
        }
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.0.commit()
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.0.rollback()
    }
}

#[test]
fn advance_that_misses_the_row_is_a_conflict() {
    let store = MemoryStore::new();
    seed(&store, "x", 0, 1, 10);
    let inner = store.clone();
    let source = move || -> Result<Box<dyn Connection>, StoreError> {
        Ok(Box::new(LosesAdvances(inner.open()?)))
    };
    let allocator = BatchAllocator::new(config(Dialect::Postgres), source);

    assert!(matches!(
        allocator.next_id("x"),
        Err(Error::Allocation {
            source: StoreError::Conflict(_),
            ..
        })
    ));
    assert_eq!(store.stats().rollbacks, 1);

    // the failed transaction released its row lock
    let healthy = BatchAllocator::new(config(Dialect::Postgres), store.clone());
    assert_eq!(healthy.next_id("x").unwrap(), 0);
}
