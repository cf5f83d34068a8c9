use super::{Columns, SqlStatements};
use crate::config::TableLayout;

fn placeholder(n: usize) -> String {
    format!("@P{n}")
}

pub(super) fn statements(layout: &TableLayout) -> SqlStatements {
    let c = Columns::new(layout);
    SqlStatements {
        locked_read: format!(
            "SELECT {}, {}, {} FROM {} WITH (UPDLOCK, HOLDLOCK, ROWLOCK) WHERE {} = @P1",
            c.prev, c.step, c.fetch, c.table, c.name,
        ),
        advance: c.advance(placeholder),
        bootstrap_insert: c.insert(placeholder),
        table_lock: None,
        create_table: format!(
            "IF OBJECT_ID(N'{table}', N'U') IS NULL CREATE TABLE {table} ({} NVARCHAR(255) NOT NULL PRIMARY KEY, {} BIGINT NOT NULL, {} INT NOT NULL, {} INT NOT NULL)",
            c.name,
            c.prev,
            c.step,
            c.fetch,
            table = c.table,
        ),
    }
}
