pub mod access;
pub mod availability;
pub mod postgres;
pub mod slots;
pub mod store;

pub use access::ClinicAccess;
pub use availability::AvailabilityService;
pub use postgres::PgScheduleRepository;
pub use slots::{find_slot, generate_slots};
pub use store::{InMemoryScheduleRepository, ScheduleRepository, ScheduleTransaction};
