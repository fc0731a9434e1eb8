//! Statement builders for the sync workers.
//!
//! Table and column names come from operator configuration, exactly as the
//! rest of this platform treats them: trusted input, interpolated into the
//! statement text. Row values always travel through positional binds.
//!
//! The configured `where` clause is an AND-suffix: it is appended verbatim
//! after the statement's own predicate, so it must start with `and` and
//! must not repeat the `where` keyword.

/// `select max(key) from table`.
pub fn max_key(local_key: &str, local_table: &str) -> String {
    format!("select max({local_key}) from {local_table}")
}

/// The remote incremental fetch, ordered by key, watermark bound at `?`.
pub fn select_increment(
    select_list: &str,
    remote_table: &str,
    remote_key: &str,
    where_suffix: &str,
) -> String {
    let mut sql = format!("select {select_list} from {remote_table} where {remote_key}>?");
    if !where_suffix.is_empty() {
        sql.push(' ');
        sql.push_str(where_suffix);
    }
    sql.push_str(&format!(" order by {remote_key}"));
    sql
}

/// Single-row insert with one placeholder per column.
pub fn insert_row(local_table: &str, local_cols: &[String]) -> String {
    let placeholders = vec!["?"; local_cols.len()].join(",");
    format!(
        "insert into {local_table}({}) values({placeholders})",
        local_cols.join(",")
    )
}

/// The federated batch insert: `insert … select … where key in (?,…)`.
pub fn insert_select_in(
    local_table: &str,
    local_cols: &[String],
    select_list: &str,
    fed_table: &str,
    remote_key: &str,
    batch_len: usize,
) -> String {
    let placeholders = vec!["?"; batch_len].join(",");
    format!(
        "insert into {local_table}({}) select {select_list} from {fed_table} where {remote_key} in ({placeholders})",
        local_cols.join(",")
    )
}

/// Delete a configured slice: `delete from t where 1=1 <and-suffix>`.
pub fn delete_where(local_table: &str, where_suffix: &str) -> String {
    let mut sql = format!("delete from {local_table} where 1=1");
    if !where_suffix.is_empty() {
        sql.push(' ');
        sql.push_str(where_suffix);
    }
    sql
}

/// Delete by key batch.
pub fn delete_keys_in(local_table: &str, local_key: &str, batch_len: usize) -> String {
    let placeholders = vec!["?"; batch_len].join(",");
    format!("delete from {local_table} where {local_key} in ({placeholders})")
}

/// Re-insert a configured slice through the federated table.
pub fn insert_select_where(
    local_table: &str,
    local_cols: &[String],
    select_list: &str,
    fed_table: &str,
    where_suffix: &str,
) -> String {
    let mut sql = format!(
        "insert into {local_table}({}) select {select_list} from {fed_table} where 1=1",
        local_cols.join(",")
    );
    if !where_suffix.is_empty() {
        sql.push(' ');
        sql.push_str(where_suffix);
    }
    sql
}

/// The key scan driving batched refresh.
pub fn select_keys(
    remote_key: &str,
    remote_table: &str,
    where_suffix: &str,
) -> String {
    let mut sql = format!("select {remote_key} from {remote_table} where 1=1");
    if !where_suffix.is_empty() {
        sql.push(' ');
        sql.push_str(where_suffix);
    }
    sql.push_str(&format!(" order by {remote_key}"));
    sql
}
