//! Connection-related data models.
//!
//! This module defines the relational dialects and helpers for logging connection
//! strings without leaking credentials.

use serde::{Deserialize, Serialize};

/// Supported relational database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Get a display-safe version of a connection string (password masked).
pub fn mask_credentials(connection_string: &str) -> String {
    // Only the authority section (before the first '/' after the scheme) may hold a password
    let Some(scheme_end) = connection_string.find("://").map(|i| i + 3) else {
        return connection_string.to_string();
    };
    let authority_end = connection_string[scheme_end..]
        .find('/')
        .map_or(connection_string.len(), |i| scheme_end + i);
    let authority = &connection_string[scheme_end..authority_end];

    if let Some(at_pos) = authority.rfind('@') {
        if let Some(colon_pos) = authority[..at_pos].find(':') {
            let prefix = &connection_string[..scheme_end + colon_pos + 1];
            let suffix = &connection_string[scheme_end + at_pos..];
            return format!("{}****{}", prefix, suffix);
        }
    }
    connection_string.to_string()
}
