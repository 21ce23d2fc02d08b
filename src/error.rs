//! Error types for the data-access layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants follow the failure points of a backend call: before connecting, while
//! acquiring a connection, while binding parameters, during execution, and inside
//! the pub/sub listen loop.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Not connected: {backend} has not been connected")]
    NotConnected { backend: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Parameter binding failed: statement has {expected} placeholder(s), {actual} parameter(s) supplied")]
    Binding { expected: usize, actual: usize },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23000" for an integrity constraint violation
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Listen error on channel '{channel}': {message}")]
    Listen { channel: String, message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a not-connected error for the named backend.
    pub fn not_connected(backend: impl Into<String>) -> Self {
        Self::NotConnected {
            backend: backend.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a binding error from the placeholder and parameter counts.
    pub fn binding(expected: usize, actual: usize) -> Self {
        Self::Binding { expected, actual }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a listen error for a pub/sub channel.
    pub fn listen(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Listen {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::NotConnected { .. } => Some("Call connect() before issuing operations"),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Check if this error was raised while obtaining a connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::NotConnected { .. } | Self::Connection { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection settings and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "All sessions are in use; reduce concurrency or raise max_connections",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::database(
                format!("Column not found: {}", col),
                None,
                "Check the column names used by the row mapper",
            ),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::database(
                format!("Column index {} out of bounds (len: {})", index, len),
                None,
                "Check the column indexes used by the row mapper",
            ),
            sqlx::Error::ColumnDecode { index, source } => DbError::database(
                format!("Failed to decode column {}: {}", index, source),
                None,
                "Check the Rust type requested for this column",
            ),
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Convert key-value store errors to DbError.
impl From<redis::RedisError> for DbError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            return DbError::connection(
                format!("Key-value store I/O error: {}", err),
                "Check that the key-value server is running and reachable",
            );
        }
        if err.kind() == redis::ErrorKind::AuthenticationFailed {
            return DbError::connection(
                format!("Key-value store authentication failed: {}", err),
                "Verify the configured password",
            );
        }
        DbError::database(
            err.to_string(),
            err.code().map(String::from),
            "Check the command arguments and key types",
        )
    }
}

/// Convert pool checkout failures to DbError.
impl From<r2d2::Error> for DbError {
    fn from(err: r2d2::Error) -> Self {
        DbError::connection(
            format!("Failed to acquire key-value connection: {}", err),
            "The pool may be exhausted or the server unreachable",
        )
    }
}

/// Convert document store errors to DbError.
impl From<mongodb::error::Error> for DbError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        match err.kind.as_ref() {
            ErrorKind::InvalidArgument { message, .. } => DbError::invalid_input(message.clone()),
            ErrorKind::Authentication { message, .. } => DbError::connection(
                format!("Document store authentication failed: {}", message),
                "Verify the credentials in the connection URI",
            ),
            ErrorKind::ServerSelection { message, .. } => DbError::connection(
                format!("No document store server available: {}", message),
                "Check that the server in the connection URI is reachable",
            ),
            ErrorKind::Io(io_err) => DbError::connection(
                format!("Document store I/O error: {}", io_err),
                "Check network connectivity and server status",
            ),
            ErrorKind::Shutdown => DbError::connection(
                "Document store client has been shut down",
                "Reconnect before issuing operations",
            ),
            ErrorKind::Command(command) => DbError::database(
                command.message.clone(),
                Some(command.code.to_string()),
                "Check the document, filter and collection name",
            ),
            _ => DbError::database(
                err.to_string(),
                None,
                "Check the document, filter and collection name",
            ),
        }
    }
}

impl From<mongodb::bson::ser::Error> for DbError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        DbError::invalid_input(format!("Failed to serialize document: {}", err))
    }
}

impl From<mongodb::bson::de::Error> for DbError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        DbError::database(
            format!("Failed to deserialize document: {}", err),
            None,
            "Check that the stored document matches the requested type",
        )
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_binding_error_display() {
        let err = DbError::binding(2, 3);
        let message = err.to_string();
        assert!(message.contains("2 placeholder"));
        assert!(message.contains("3 parameter"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42000".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert!(DbError::not_connected("sql").suggestion().is_some());
        assert!(DbError::binding(1, 0).suggestion().is_none());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::not_connected("redis").is_retryable());
        assert!(!DbError::binding(1, 2).is_retryable());
    }

    #[test]
    fn test_connection_error_class() {
        assert!(DbError::not_connected("sql").is_connection_error());
        assert!(DbError::connection("closed", "reconnect").is_connection_error());
        assert!(!DbError::listen("chat", "dropped").is_connection_error());
    }

    #[test]
    fn test_pool_timeout_maps_to_connection() {
        let err = DbError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, DbError::Connection { .. }));
        let err = DbError::from(sqlx::Error::PoolClosed);
        assert!(matches!(err, DbError::Connection { .. }));
    }

    #[test]
    fn test_redis_io_error_maps_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = DbError::from(redis::RedisError::from(io));
        assert!(matches!(err, DbError::Connection { .. }));
    }

    #[test]
    fn test_redis_response_error_maps_to_database() {
        let err = DbError::from(redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "WRONGTYPE",
        )));
        assert!(matches!(err, DbError::Database { .. }));
    }
}
