use thiserror::Error;

/// Main error type for Nautex operations
#[derive(Error, Debug)]
pub enum NautexError {
    #[error("Database corrupt: {0}")]
    DatabaseCorrupt(String),

    #[error("Database I/O error: {0}")]
    DatabaseIo(#[from] std::io::Error),

    #[error("Database locked: {0}")]
    DatabaseLocked(String),

    #[error("Failed to create database: {0}")]
    DatabaseCreate(String),

    #[error("Database has been closed")]
    DatabaseClosed,

    #[error("Database modified: revision {revision} has been reclaimed")]
    DatabaseModified { revision: u64 },

    #[error("Document {0} not found")]
    DocNotFound(u32),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Query parse error at offset {offset}: {message}")]
    QueryParse { message: String, offset: usize },

    #[error("Value out of range: {0}")]
    Range(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unimplemented: {0}")]
    Unimplemented(String),
}

/// Result type alias for Nautex operations
pub type Result<T> = std::result::Result<T, NautexError>;

impl NautexError {
    /// Errors which leave the handle unusable: the writer must discard its
    /// dirty buffer and the database must be reopened.
    pub fn is_fatal_to_handle(&self) -> bool {
        matches!(
            self,
            NautexError::DatabaseCorrupt(_) | NautexError::DatabaseIo(_)
        )
    }

    /// A corruption error carrying a description of what failed to decode.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        NautexError::DatabaseCorrupt(msg.into())
    }
}

impl From<bincode::Error> for NautexError {
    // bincode only appears when decoding base descriptors, so a decode
    // failure there is on-disk corruption, not a serialization bug.
    fn from(e: bincode::Error) -> Self {
        NautexError::DatabaseCorrupt(format!("base descriptor: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NautexError::DocNotFound(42);
        assert_eq!(err.to_string(), "Document 42 not found");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(NautexError::corrupt("bad chunk").is_fatal_to_handle());
        assert!(!NautexError::DatabaseClosed.is_fatal_to_handle());
        assert!(!NautexError::DatabaseLocked("held".into()).is_fatal_to_handle());
    }

    #[test]
    fn test_parse_error_carries_offset() {
        let err = NautexError::QueryParse {
            message: "unmatched bracket".into(),
            offset: 7,
        };
        assert!(err.to_string().contains("offset 7"));
    }
}
