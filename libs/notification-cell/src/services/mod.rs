pub mod dispatcher;
pub mod email;
pub mod messages;
pub mod postgres;
pub mod sms;
pub mod store;

pub use dispatcher::NotificationDispatcher;
pub use email::{EmailSender, HttpEmailSender};
pub use messages::build_message;
pub use postgres::PgNotificationRepository;
pub use sms::{normalize_phone, SmsSender, TweetSmsSender};
pub use store::{InMemoryNotificationRepository, NotificationRepository};
