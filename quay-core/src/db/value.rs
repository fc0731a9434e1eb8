//! Text decoding for dynamic result sets.
//!
//! The interface registry and the sync workers run operator-configured SQL,
//! so column types are only known at runtime. Everything is rendered to
//! text the way the wire formats want it: SQL NULL becomes the empty
//! string, temporal types use `YYYY-MM-DD HH:MM:SS`.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::mysql::MySqlRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use super::driver::Result;

/// Render column `idx` of `row` as text.
pub fn column_text(row: &MySqlRow, idx: usize) -> Result<String> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(String::new());
    }

    let type_name = row.columns()[idx].type_info().name().to_uppercase();
    let text = match type_name.as_str() {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(idx)?.to_string()
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row.try_get::<u64, _>(idx)?.to_string(),
        "FLOAT" => row.try_get::<f32, _>(idx)?.to_string(),
        "DOUBLE" => row.try_get::<f64, _>(idx)?.to_string(),
        "DATE" => row.try_get::<NaiveDate, _>(idx)?.format("%Y-%m-%d").to_string(),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(idx)?
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        "TIME" => row.try_get::<NaiveTime, _>(idx)?.format("%H:%M:%S").to_string(),
        "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" => {
            row.try_get::<String, _>(idx)?
        }
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            String::from_utf8_lossy(&row.try_get::<Vec<u8>, _>(idx)?).into_owned()
        }
        // DECIMAL and anything exotic travel as text on the wire.
        _ => row.try_get_unchecked::<String, _>(idx)?,
    };
    Ok(text)
}

/// Render every column of `row` as text, in column order.
pub fn row_text(row: &MySqlRow) -> Result<Vec<String>> {
    (0..row.len()).map(|idx| column_text(row, idx)).collect()
}

/// Map a sqlx error onto the driver-reported (code, message) pair the bus
/// reports to clients. Non-database failures use code 1.
pub fn driver_error_parts(err: &sqlx::Error) -> (i64, String) {
    match err {
        sqlx::Error::Database(db) => {
            let code = db
                .code()
                .and_then(|c| c.parse::<i64>().ok())
                .unwrap_or(1);
            (code, db.message().to_string())
        }
        other => (1, other.to_string()),
    }
}

/// True when the error is a primary-key / unique-key violation.
pub fn is_duplicate_key(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("1062"))
}
