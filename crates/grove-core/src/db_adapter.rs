//! Adapter layer for grove-db.
//!
//! This module bridges grove-db with grove-core's error type. Every storage
//! call in the engine goes through [`IntoGroveResult`] so that the mapping of
//! storage failures lives in one place.
//!
//! ## Architecture
//!
//! ```text
//! grove-core domain code (outliner, ingestion)
//!        ↓
//!   db_adapter (this module) - error conversion
//!        ↓
//!     grove-db implementations (MemoryStore, LogStore)
//! ```

use crate::errors::GroveError;

// ============================================================================
// Error Conversion
// ============================================================================

/// Convert a grove-db error to a grove-core error.
pub fn from_db_error(err: grove_db::DbError) -> GroveError {
    use grove_db::DbError;

    match err {
        DbError::Io(io_err) => GroveError::Io(io_err),

        DbError::Json(json_err) => GroveError::Json(json_err),

        DbError::UniqueViolation { attr, value, .. } => GroveError::Storage {
            message: format!("{} {} is already taken", attr, value),
            unique_violation: true,
        },

        DbError::UnresolvedEntity { reference } => GroveError::Storage {
            message: format!("unresolved reference {}", reference),
            unique_violation: false,
        },

        DbError::Config { message } => GroveError::InvalidConfiguration {
            message,
            hint: "Check the `store` section of your config".to_string(),
        },

        other => GroveError::Storage {
            message: other.to_string(),
            unique_violation: false,
        },
    }
}

/// Extension trait to convert DbResult to Result<T, GroveError>.
pub trait IntoGroveResult<T> {
    /// Convert a DbResult to a GroveError result.
    fn into_grove_result(self) -> Result<T, GroveError>;
}

impl<T> IntoGroveResult<T> for grove_db::DbResult<T> {
    fn into_grove_result(self) -> Result<T, GroveError> {
        self.map_err(from_db_error)
    }
}
