//! Parameter binding utilities for SQL statements.
//!
//! This module binds `QueryParam` values to database-specific query objects and
//! checks, before anything is sent to the server, that a statement has exactly as
//! many `?` placeholders as parameters supplied.

use crate::config::MAX_CACHED_STATEMENT_LEN;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam};
use sqlx::mysql::MySqlArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Sqlite};

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        // SQLite doesn't have native JSON type, store as string
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}

/// Whether a statement is short enough to keep in the prepared-statement cache.
pub(crate) fn is_cacheable(sql: &str) -> bool {
    sql.chars().count() <= MAX_CACHED_STATEMENT_LEN
}

/// Check the placeholder count against the supplied parameters.
pub fn validate_binding(sql: &str, params: &[QueryParam], db_type: DatabaseType) -> DbResult<()> {
    let expected = count_placeholders(sql, db_type);
    if expected != params.len() {
        return Err(DbError::binding(expected, params.len()));
    }
    Ok(())
}

/// Count `?` placeholders, ignoring string literals, quoted identifiers and comments.
///
/// Lexing follows the dialect: backslash escapes inside literals and `#` line
/// comments exist only in MySQL. In SQLite a backslash is an ordinary character.
pub fn count_placeholders(sql: &str, db_type: DatabaseType) -> usize {
    let mysql = db_type == DatabaseType::MySQL;
    let mut count = 0;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '?' => count += 1,
            '\'' | '"' | '`' => {
                // Doubled quote inside a literal is an escaped quote
                while let Some(inner) = chars.next() {
                    if inner == '\\' && mysql && c != '`' {
                        chars.next();
                    } else if inner == c {
                        if chars.peek() == Some(&c) {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => skip_line(&mut chars),
            '#' if mysql => skip_line(&mut chars),
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            _ => {}
        }
    }

    count
}

fn skip_line(chars: &mut impl Iterator<Item = char>) {
    for inner in chars {
        if inner == '\n' {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MYSQL: DatabaseType = DatabaseType::MySQL;
    const SQLITE: DatabaseType = DatabaseType::SQLite;

    #[test]
    fn test_count_simple_placeholders() {
        for db_type in [MYSQL, SQLITE] {
            assert_eq!(count_placeholders("SELECT 1", db_type), 0);
            assert_eq!(
                count_placeholders("INSERT INTO users (id, name) VALUES (?, ?)", db_type),
                2
            );
        }
    }

    #[test]
    fn test_placeholders_in_literals_are_ignored() {
        for db_type in [MYSQL, SQLITE] {
            assert_eq!(
                count_placeholders("SELECT * FROM t WHERE a = '?' AND b = ?", db_type),
                1
            );
            assert_eq!(count_placeholders(r#"SELECT "what?" FROM t"#, db_type), 0);
            assert_eq!(
                count_placeholders("SELECT `col?` FROM t WHERE x = ?", db_type),
                1
            );
            assert_eq!(count_placeholders("SELECT 'it''s ?' , ?", db_type), 1);
        }
    }

    #[test]
    fn test_backslash_escape_is_mysql_only() {
        assert_eq!(count_placeholders(r"SELECT 'a\'?' , ?", MYSQL), 1);

        // In SQLite the literal 'C:\' ends at its second quote
        let sql = r"INSERT INTO t (path, id) VALUES ('C:\', ?)";
        assert_eq!(count_placeholders(sql, SQLITE), 1);
        assert!(validate_binding(sql, &[QueryParam::Int(1)], SQLITE).is_ok());

        // Backticks never take backslash escapes
        assert_eq!(count_placeholders(r"SELECT `a\` FROM t WHERE x = ?", MYSQL), 1);
    }

    #[test]
    fn test_placeholders_in_comments_are_ignored() {
        for db_type in [MYSQL, SQLITE] {
            assert_eq!(count_placeholders("SELECT ? -- why?\n, ?", db_type), 2);
            assert_eq!(count_placeholders("SELECT /* ? */ ?", db_type), 1);
        }
        assert_eq!(count_placeholders("SELECT ? # trailing?", MYSQL), 1);
    }

    #[test]
    fn test_hash_is_not_a_comment_in_sqlite() {
        // `#` starts no comment in SQLite
        assert_eq!(count_placeholders("SELECT ? # trailing?", SQLITE), 2);
        assert_eq!(
            count_placeholders("SELECT * FROM t WHERE tag = '#a' AND id = ?", SQLITE),
            1
        );
    }

    #[test]
    fn test_validate_binding_mismatch() {
        let params = vec![QueryParam::Int(1)];
        let err = validate_binding("SELECT ? , ?", &params, SQLITE).unwrap_err();
        assert!(matches!(
            err,
            DbError::Binding {
                expected: 2,
                actual: 1
            }
        ));
        assert!(validate_binding("SELECT ?", &params, MYSQL).is_ok());
    }

    #[test]
    fn test_is_cacheable() {
        assert!(is_cacheable("SELECT 1"));
        let long = format!("SELECT '{}'", "x".repeat(MAX_CACHED_STATEMENT_LEN));
        assert!(!is_cacheable(&long));
    }
}
