//! Statement texts the harness issues through the ad-hoc interface.
//!
//! Builders and [`recognize`] live side by side so a cluster stand-in can
//! answer exactly the statements the harness sends and nothing else.

/// Row count for one `cid` partition.
pub fn count_rows(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {table} WHERE cid=?;")
}

/// Delete every row of one `cid` partition.
pub fn delete_rows(table: &str) -> String {
    format!("DELETE FROM {table} WHERE cid=?;")
}

/// All rows of one `cid` partition, ordered by `rid`.
pub fn select_rows(table: &str) -> String {
    format!("SELECT * FROM {table} WHERE cid=? ORDER BY rid;")
}

/// The whole oracle table for `table`.
pub fn select_expected(table: &str) -> String {
    format!("SELECT * FROM {table}_conflict_expected ORDER BY cid, rid;")
}

/// Logged conflict rows correlated to one expected record by
/// `(cid, rid, extrid)`.
pub fn select_actual(table: &str) -> String {
    format!("SELECT * FROM {table}_conflict_actual WHERE cid=? AND (rid=? OR rid=?) ORDER BY ts;")
}

/// A statement recognized from its text, with the table it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statement<'a> {
    CountRows { table: &'a str },
    DeleteRows { table: &'a str },
    SelectRows { table: &'a str },
    SelectExpected { table: &'a str },
    SelectActual { table: &'a str },
}

/// Recognize a statement produced by one of the builders in this module.
pub fn recognize(sql: &str) -> Option<Statement<'_>> {
    let sql = sql.trim();
    if let Some(table) = between(sql, "SELECT COUNT(*) FROM ", " WHERE cid=?;") {
        return Some(Statement::CountRows { table });
    }
    if let Some(table) = between(sql, "DELETE FROM ", " WHERE cid=?;") {
        return Some(Statement::DeleteRows { table });
    }
    if let Some(table) = between(sql, "SELECT * FROM ", "_conflict_expected ORDER BY cid, rid;") {
        return Some(Statement::SelectExpected { table });
    }
    if let Some(table) = between(
        sql,
        "SELECT * FROM ",
        "_conflict_actual WHERE cid=? AND (rid=? OR rid=?) ORDER BY ts;",
    ) {
        return Some(Statement::SelectActual { table });
    }
    between(sql, "SELECT * FROM ", " WHERE cid=? ORDER BY rid;")
        .map(|table| Statement::SelectRows { table })
}

fn between<'a>(sql: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let table = sql.strip_prefix(prefix)?.strip_suffix(suffix)?;
    let is_identifier =
        !table.is_empty() && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    is_identifier.then_some(table)
}
