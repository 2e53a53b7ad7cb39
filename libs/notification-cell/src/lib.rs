pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::NotificationError;
pub use handlers::NotificationCellState;
pub use models::{
    AppointmentNotification, AppointmentSnapshot, ChannelSet, DispatchReport, NotificationEventType,
    NotificationRequest, Recipient,
};
pub use router::notification_routes;
pub use services::{
    InMemoryNotificationRepository, NotificationDispatcher, NotificationRepository, PgNotificationRepository,
};
