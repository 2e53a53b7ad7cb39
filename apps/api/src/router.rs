use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};

use appointment_cell::handlers::AppointmentCellState;
use appointment_cell::router::appointment_routes;
use appointment_cell::services::{
    AppointmentLifecycle, AppointmentQueries, BookingPolicy, BookingService, CalendarStore,
    DirectoryRepository, PgCalendarStore, PgDirectoryRepository, StaffDirectory,
};
use doctor_cell::handlers::DoctorCellState;
use doctor_cell::router::doctor_routes;
use doctor_cell::services::{AvailabilityService, PgScheduleRepository, ScheduleRepository};
use notification_cell::handlers::NotificationCellState;
use notification_cell::router::notification_routes;
use notification_cell::services::{
    NotificationDispatcher, NotificationRepository, PgNotificationRepository,
};
use shared_config::AppConfig;
use shared_utils::Clock;
use sqlx::PgPool;

/// The persistence behind every cell.
pub struct Stores {
    pub schedule: Arc<dyn ScheduleRepository>,
    pub directory: Arc<dyn DirectoryRepository>,
    pub calendar: Arc<dyn CalendarStore>,
    pub notifications: Arc<dyn NotificationRepository>,
}

impl Stores {
    pub fn postgres(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            schedule: Arc::new(PgScheduleRepository::new(pool.clone(), lock_timeout)),
            directory: Arc::new(PgDirectoryRepository::new(pool.clone())),
            calendar: Arc::new(PgCalendarStore::new(pool.clone(), lock_timeout)),
            notifications: Arc::new(PgNotificationRepository::new(pool)),
        }
    }

    /// Process-local stores. Their locks do not reach other processes.
    #[cfg(test)]
    pub fn in_memory(lock_timeout: Duration) -> Self {
        use appointment_cell::services::{InMemoryCalendarStore, InMemoryDirectoryRepository};
        use doctor_cell::services::InMemoryScheduleRepository;
        use notification_cell::services::InMemoryNotificationRepository;

        Self {
            schedule: Arc::new(InMemoryScheduleRepository::with_lock_timeout(lock_timeout)),
            directory: Arc::new(InMemoryDirectoryRepository::new()),
            calendar: Arc::new(InMemoryCalendarStore::new(lock_timeout)),
            notifications: Arc::new(InMemoryNotificationRepository::new()),
        }
    }
}

/// Every store and service the cells share, built once at start-up.
pub struct AppServices {
    pub config: Arc<AppConfig>,
    pub availability: Arc<AvailabilityService>,
    pub directory: Arc<StaffDirectory>,
    pub booking: Arc<BookingService>,
    pub lifecycle: Arc<AppointmentLifecycle>,
    pub queries: Arc<AppointmentQueries>,
    pub notifications: Arc<dyn NotificationRepository>,
}

impl AppServices {
    pub fn new(config: Arc<AppConfig>, clock: Arc<dyn Clock>, stores: Stores) -> Self {
        let policy = BookingPolicy::from_config(&config);

        let availability = Arc::new(AvailabilityService::new(stores.schedule));
        let directory = Arc::new(StaffDirectory::new(stores.directory));
        let notifications = stores.notifications;
        let dispatcher = Arc::new(NotificationDispatcher::from_config(
            &config,
            notifications.clone(),
        ));

        let booking = Arc::new(BookingService::new(
            stores.calendar.clone(),
            availability.clone(),
            directory.clone(),
            clock.clone(),
        ));
        let lifecycle = Arc::new(AppointmentLifecycle::new(
            booking.clone(),
            directory.clone(),
            dispatcher,
            policy,
        ));
        let queries = Arc::new(AppointmentQueries::new(
            stores.calendar,
            availability.clone(),
            directory.clone(),
            clock,
            policy,
        ));

        Self {
            config,
            availability,
            directory,
            booking,
            lifecycle,
            queries,
            notifications,
        }
    }
}

pub fn create_router(services: &AppServices) -> Router {
    let doctors = DoctorCellState {
        config: services.config.clone(),
        availability: services.availability.clone(),
        access: services.directory.clone(),
    };
    let appointments = AppointmentCellState {
        config: services.config.clone(),
        booking: services.booking.clone(),
        lifecycle: services.lifecycle.clone(),
        queries: services.queries.clone(),
    };
    let notifications = NotificationCellState {
        config: services.config.clone(),
        store: services.notifications.clone(),
    };

    Router::new()
        .route("/", get(|| async { "Clinic booking API is running!" }))
        .nest("/doctors", doctor_routes(doctors))
        .nest("/appointments", appointment_routes(appointments))
        .nest("/notifications", notification_routes(notifications))
}
