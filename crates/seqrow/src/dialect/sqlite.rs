use super::{Columns, SqlStatements};
use crate::config::TableLayout;

fn placeholder(n: usize) -> String {
    format!("?{n}")
}

pub(super) fn statements(layout: &TableLayout) -> SqlStatements {
    let c = Columns::new(layout);
    SqlStatements {
        // No row locks. The read is only exclusive because the transaction
        // already holds the write lock.
        locked_read: format!(
            "SELECT {}, {}, {} FROM {} WHERE {} = ?1",
            c.prev, c.step, c.fetch, c.table, c.name,
        ),
        advance: c.advance(placeholder),
        bootstrap_insert: c.insert(placeholder),
        // A write that matches nothing still takes the RESERVED lock, for
        // connections that were not opened with `BEGIN IMMEDIATE`.
        table_lock: Some(format!(
            "UPDATE {} SET {prev} = {prev} WHERE 0 = 1",
            c.table,
            prev = c.prev,
        )),
        create_table: format!(
            "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY NOT NULL, {} INTEGER NOT NULL, {} INTEGER NOT NULL, {} INTEGER NOT NULL)",
            c.table, c.name, c.prev, c.step, c.fetch,
        ),
    }
}
