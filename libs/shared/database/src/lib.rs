pub mod error;
pub mod locks;
pub mod postgres;
pub mod table;

pub use error::DatabaseError;
pub use locks::{RowLockGuard, RowLockManager};
pub use postgres::{begin_with_lock_timeout, connect, connect_for_tests, migrate};
pub use table::UniqueIndex;
