pub mod booking;
pub mod calendar;
pub mod directory;
pub mod lifecycle;
pub mod listing;
pub mod postgres;

pub use booking::BookingService;
pub use calendar::{CalendarStore, CalendarTransaction, DoctorCalendar, InMemoryCalendarStore};
pub use directory::{DirectoryRepository, InMemoryDirectoryRepository, StaffDirectory};
pub use lifecycle::{AppointmentLifecycle, BookingPolicy, LifecycleOutcome};
pub use listing::AppointmentQueries;
pub use postgres::{PgCalendarStore, PgDirectoryRepository};
