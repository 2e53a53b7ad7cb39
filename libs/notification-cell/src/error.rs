use thiserror::Error;

use shared_database::DatabaseError;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Notification already exists for this appointment event")]
    Duplicate,

    #[error("Notification not found")]
    NotFound,

    #[error("{0} channel is not configured")]
    NotConfigured(&'static str),

    #[error("Invalid phone number: {0:?}")]
    InvalidPhone(String),

    #[error("Email provider error: {0}")]
    EmailProvider(String),

    #[error("SMS gateway error: {message} (code={code})")]
    SmsGateway { code: i64, message: String },

    #[error("SMS gateway unexpected response: {0:?}")]
    SmsUnexpectedResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(DatabaseError),
}

impl From<DatabaseError> for NotificationError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::UniqueViolation { .. } => NotificationError::Duplicate,
            DatabaseError::NotFound(_) => NotificationError::NotFound,
            other => NotificationError::Storage(other),
        }
    }
}
