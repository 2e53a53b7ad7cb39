pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use handlers::AppointmentCellState;
pub use models::{
    Appointment, AppointmentError, AppointmentStatus, AppointmentView, CalendarKey, Clinic,
    ClinicStaff, PolicyViolation, StaffRole, UserProfile,
};
pub use router::appointment_routes;
pub use services::{
    AppointmentLifecycle, AppointmentQueries, BookingPolicy, BookingService, CalendarStore,
    DirectoryRepository, InMemoryCalendarStore, InMemoryDirectoryRepository, PgCalendarStore,
    PgDirectoryRepository, StaffDirectory,
};
