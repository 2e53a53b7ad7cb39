use thiserror::Error;

/// SQLSTATE codes the stores react to.
const UNIQUE_VIOLATION: &str = "23505";
const LOCK_NOT_AVAILABLE: &str = "55P03";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Timed out waiting for lock on {resource}")]
    LockTimeout { resource: String },

    #[error("Row not found: {0}")]
    NotFound(String),

    /// A write touched a row outside the set of rows locked by the
    /// transaction.
    #[error("Row not locked by transaction: {0}")]
    NotLocked(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl DatabaseError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DatabaseError::UniqueViolation { .. })
    }

    /// Rewrites a lock timeout so it names the locked resource instead of
    /// the server message.
    pub fn on_resource(self, resource: impl Into<String>) -> Self {
        match self {
            DatabaseError::LockTimeout { .. } => DatabaseError::LockTimeout {
                resource: resource.into(),
            },
            other => other,
        }
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => DatabaseError::NotFound(e.to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(UNIQUE_VIOLATION) => DatabaseError::UniqueViolation {
                    constraint: db.constraint().unwrap_or_default().to_string(),
                },
                Some(LOCK_NOT_AVAILABLE) => DatabaseError::LockTimeout {
                    resource: db.message().to_string(),
                },
                _ => DatabaseError::Storage(e.to_string()),
            },
            _ => DatabaseError::Storage(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn missing_row_maps_to_not_found() {
        assert_matches!(DatabaseError::from(sqlx::Error::RowNotFound), DatabaseError::NotFound(_));
    }

    #[test]
    fn pool_exhaustion_is_a_storage_error() {
        assert_matches!(DatabaseError::from(sqlx::Error::PoolTimedOut), DatabaseError::Storage(_));
    }

    #[test]
    fn lock_timeouts_are_renamed_to_the_resource() {
        let err = DatabaseError::LockTimeout {
            resource: "canceling statement due to lock timeout".to_string(),
        }
        .on_resource("doctor-day");
        assert_eq!(
            err,
            DatabaseError::LockTimeout {
                resource: "doctor-day".to_string()
            }
        );

        let other = DatabaseError::Storage("x".to_string()).on_resource("doctor-day");
        assert_matches!(other, DatabaseError::Storage(_));
    }
}
