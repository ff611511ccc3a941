//! Backend dispatch macro.
//!
//! Generates the three-armed match over [`DbConnection`](crate::db::DbConnection)
//! so per-backend code stays linear and readable.

/// Macro for generating database dispatch match arms.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(conn, {
///     MySql(c) => mysql::fetch(c),
///     Postgres(c) => postgres::fetch(c),
///     SQLite(c) => sqlite::fetch(c),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::connection::DbConnection::$variant($c) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
