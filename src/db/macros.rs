//! Database dispatch macros for reducing code duplication.
//!
//! This module provides declarative macros that generate database-specific
//! implementations while maintaining linear readability. The macros expand
//! at compile time with zero runtime overhead.

/// Macro for generating database dispatch match arms.
///
/// This macro generates match arms for `DbPool` variants, reducing the need
/// to manually write repetitive match statements.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => p.size(),
///     SQLite(p) => p.size(),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

/// Build a positional parameter list from heterogeneous values.
///
/// Each value is converted with `QueryParam::from`, so anything with a
/// `From` impl (integers, floats, strings, `Option<T>`, JSON values) works.
///
/// ```
/// use async_datastore::{sql_params, models::QueryParam};
///
/// let params = sql_params![1, "Ada", None::<i64>];
/// assert_eq!(params.len(), 3);
/// assert_eq!(params[2], QueryParam::Null);
/// ```
#[macro_export]
macro_rules! sql_params {
    () => {
        ::std::vec::Vec::<$crate::models::QueryParam>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::QueryParam::from($value)),+]
    };
}

pub use impl_db_dispatch;
pub use sql_params;
