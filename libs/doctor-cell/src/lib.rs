pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use handlers::DoctorCellState;
pub use models::{
    day_of_week, AppointmentType, AvailabilityBlock, AvailabilityError, BookedInterval, TimeSlot,
};
pub use router::doctor_routes;
pub use services::{
    find_slot, generate_slots, AvailabilityService, ClinicAccess, InMemoryScheduleRepository,
    PgScheduleRepository, ScheduleRepository, ScheduleTransaction,
};
