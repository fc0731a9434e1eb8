//! The interface registry: credential, authorization, and interface
//! lookups against the control tables.
//!
//! Control schema (collaborator, not owned here):
//! - `T_USERINFO(username, passwd, rsts)` — service accounts, `rsts=1`
//!   means enabled;
//! - `T_USERANDINTER(username, intername)` — per-user grants;
//! - `T_INTERCFG(intername, selectsql, colstr, bindin, rsts)` — the query
//!   catalog. `colstr` and `bindin` are comma-separated, order-significant
//!   lists: `colstr` names the output columns, `bindin` the query-string
//!   parameters bound positionally into `selectsql`.

use sqlx::{MySqlConnection, Row};

use quay_core::db::DbError;

/// One loaded interface definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDef {
    pub select_sql: String,
    pub out_cols: Vec<String>,
    pub in_params: Vec<String>,
}

/// `true` when the credentials match an enabled account.
pub async fn check_login(
    conn: &mut MySqlConnection,
    username: &str,
    passwd: &str,
) -> Result<bool, DbError> {
    let count: i64 = sqlx::query_scalar(
        "select count(*) from T_USERINFO where username=? and passwd=? and rsts=1",
    )
    .bind(username)
    .bind(passwd)
    .fetch_one(conn)
    .await?;
    Ok(count > 0)
}

/// `true` when the user is granted the interface and the interface is
/// enabled.
pub async fn check_permission(
    conn: &mut MySqlConnection,
    username: &str,
    intername: &str,
) -> Result<bool, DbError> {
    let count: i64 = sqlx::query_scalar(
        "select count(*) from T_USERANDINTER \
         where username=? and intername=? \
           and intername in (select intername from T_INTERCFG where rsts=1)",
    )
    .bind(username)
    .bind(intername)
    .fetch_one(conn)
    .await?;
    Ok(count == 1)
}

/// Load an enabled interface's definition.
pub async fn load_interface(
    conn: &mut MySqlConnection,
    intername: &str,
) -> Result<Option<InterfaceDef>, DbError> {
    let row = sqlx::query(
        "select selectsql, colstr, bindin from T_INTERCFG where intername=? and rsts=1",
    )
    .bind(intername)
    .fetch_optional(conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(InterfaceDef {
        select_sql: row.try_get::<String, _>(0)?,
        out_cols: split_list(&row.try_get::<String, _>(1)?),
        in_params: split_list(&row.try_get::<String, _>(2)?),
    }))
}

/// Split a comma-separated name list, preserving order.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_trims_and_drops_empties() {
        assert_eq!(
            split_list("obtid, t ,p,,"),
            vec!["obtid".to_string(), "t".into(), "p".into()]
        );
        assert!(split_list("").is_empty());
    }
}
