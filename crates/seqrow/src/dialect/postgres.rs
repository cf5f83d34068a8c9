use super::{Columns, SqlStatements};
use crate::config::TableLayout;

fn placeholder(n: usize) -> String {
    format!("${n}")
}

pub(super) fn statements(layout: &TableLayout) -> SqlStatements {
    let c = Columns::new(layout);
    SqlStatements {
        locked_read: format!(
            "SELECT {}, {}, {} FROM {} WHERE {} = $1 FOR UPDATE",
            c.prev, c.step, c.fetch, c.table, c.name,
        ),
        advance: c.advance(placeholder),
        bootstrap_insert: c.insert(placeholder),
        // Conflicts with itself and with the ROW EXCLUSIVE lock taken by
        // `INSERT` and `UPDATE`, but not with plain reads.
        table_lock: Some(format!(
            "LOCK TABLE {} IN SHARE ROW EXCLUSIVE MODE",
            c.table
        )),
        create_table: format!(
            "CREATE TABLE IF NOT EXISTS {} ({} VARCHAR(255) PRIMARY KEY, {} BIGINT NOT NULL, {} INTEGER NOT NULL, {} INTEGER NOT NULL)",
            c.table, c.name, c.prev, c.step, c.fetch,
        ),
    }
}
