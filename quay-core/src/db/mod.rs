//! Database layer: the minimal driver contract the pool is built over, the
//! fixed-slot connection pool, and text decoding for dynamic result sets.

pub mod driver;
pub mod pool;
pub mod value;

pub use driver::{DbDriver, DbError, MySqlDriver};
pub use pool::{Pool, PoolConfig, PooledConn};
pub use value::{column_text, driver_error_parts, is_duplicate_key, row_text};
