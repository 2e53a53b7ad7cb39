#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

use appointment_cell::handlers::AppointmentCellState;
use appointment_cell::models::{
    Appointment, AppointmentError, AppointmentStatus, BookAppointmentRequest, ChangeScheduleRequest,
    Clinic, ClinicStaff, StaffRole, UserProfile,
};
use appointment_cell::services::{
    AppointmentLifecycle, AppointmentQueries, BookingPolicy, BookingService, CalendarStore,
    DirectoryRepository, InMemoryCalendarStore, InMemoryDirectoryRepository, PgCalendarStore,
    PgDirectoryRepository, StaffDirectory,
};
use doctor_cell::models::{CreateAppointmentTypeRequest, CreateAvailabilityRequest};
use doctor_cell::{
    AppointmentType, AvailabilityService, InMemoryScheduleRepository, PgScheduleRepository,
    ScheduleRepository,
};
use notification_cell::services::PgNotificationRepository;
use notification_cell::{InMemoryNotificationRepository, NotificationDispatcher, NotificationRepository};
use shared_database::connect_for_tests;
use shared_utils::test_utils::TestConfig;
use shared_utils::FixedClock;

pub fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// 2030-01-07 is a Monday.
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
}

pub fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
    date.and_time(t(h, m))
}

/// The four stores a harness runs on.
pub struct Stores {
    pub schedule: Arc<dyn ScheduleRepository>,
    pub directory: Arc<dyn DirectoryRepository>,
    pub calendar: Arc<dyn CalendarStore>,
    pub notifications: Arc<dyn NotificationRepository>,
}

impl Stores {
    pub fn in_memory(lock_timeout: Duration) -> Self {
        Self {
            schedule: Arc::new(InMemoryScheduleRepository::with_lock_timeout(lock_timeout)),
            directory: Arc::new(InMemoryDirectoryRepository::new()),
            calendar: Arc::new(InMemoryCalendarStore::new(lock_timeout)),
            notifications: Arc::new(InMemoryNotificationRepository::new()),
        }
    }

    /// Stores on the database named by `TEST_DATABASE_URL`, each call with
    /// its own pool. `None` when the variable is unset.
    pub async fn postgres(lock_timeout: Duration) -> Option<Self> {
        let pool = connect_for_tests().await?;
        Some(Self {
            schedule: Arc::new(PgScheduleRepository::new(pool.clone(), lock_timeout)),
            directory: Arc::new(PgDirectoryRepository::new(pool.clone())),
            calendar: Arc::new(PgCalendarStore::new(pool.clone(), lock_timeout)),
            notifications: Arc::new(PgNotificationRepository::new(pool)),
        })
    }
}

/// A doctor working Monday mornings (09:00-12:00) at clinic A and Monday
/// afternoons (14:00-17:00) at clinic B, one secretary at A, and two
/// patients. The clock starts on the Sunday before, at 08:00.
pub struct Harness {
    pub config: TestConfig,
    pub clock: FixedClock,
    pub availability: Arc<AvailabilityService>,
    pub directory_repo: Arc<dyn DirectoryRepository>,
    pub directory: Arc<StaffDirectory>,
    pub calendar: Arc<dyn CalendarStore>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub booking: Arc<BookingService>,
    pub lifecycle: Arc<AppointmentLifecycle>,
    pub queries: Arc<AppointmentQueries>,
    pub doctor: Uuid,
    pub clinic_a: Uuid,
    pub clinic_b: Uuid,
    pub secretary: Uuid,
    pub patient: Uuid,
    pub other_patient: Uuid,
    pub consult_a: AppointmentType,
    pub consult_b: AppointmentType,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(config: TestConfig) -> Self {
        let lock_timeout = Duration::from_millis(config.lock_timeout_ms);
        Self::with_stores(config, Stores::in_memory(lock_timeout)).await
    }

    /// The same scenario persisted in Postgres, or `None` when no test
    /// database is configured.
    pub async fn on_postgres() -> Option<Self> {
        let config = TestConfig::default();
        let stores = Stores::postgres(Duration::from_millis(config.lock_timeout_ms)).await?;
        Some(Self::with_stores(config, stores).await)
    }

    pub async fn with_stores(config: TestConfig, stores: Stores) -> Self {
        let app_config = config.to_app_config();
        let clock = FixedClock::new(at(monday().pred_opt().unwrap(), 8, 0));

        let availability = Arc::new(AvailabilityService::new(stores.schedule));
        let directory_repo = stores.directory;
        let directory = Arc::new(StaffDirectory::new(directory_repo.clone()));
        let calendar = stores.calendar;
        let notifications = stores.notifications;
        let dispatcher = Arc::new(NotificationDispatcher::new(
            notifications.clone(),
            None,
            None,
            "970",
        ));
        let policy = BookingPolicy::from_config(&app_config);

        let booking = Arc::new(BookingService::new(
            calendar.clone(),
            availability.clone(),
            directory.clone(),
            Arc::new(clock.clone()),
        ));
        let lifecycle = Arc::new(AppointmentLifecycle::new(
            booking.clone(),
            directory.clone(),
            dispatcher,
            policy,
        ));
        let queries = Arc::new(AppointmentQueries::new(
            calendar.clone(),
            availability.clone(),
            directory.clone(),
            Arc::new(clock.clone()),
            policy,
        ));

        let doctor = Uuid::new_v4();
        let clinic_a = Uuid::new_v4();
        let clinic_b = Uuid::new_v4();
        let secretary = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let other_patient = Uuid::new_v4();

        for (id, name) in [(clinic_a, "Old City Clinic"), (clinic_b, "Hillside Clinic")] {
            directory_repo
                .insert_clinic(Clinic {
                    id,
                    name: name.to_string(),
                    address: Some(format!("{} street", name)),
                    is_active: true,
                })
                .await
                .unwrap();
        }
        for (id, name) in [
            (doctor, "Sara Haddad"),
            (secretary, "Lina Nasser"),
            (patient, "Omar Khalil"),
            (other_patient, "Maya Saleh"),
        ] {
            directory_repo
                .upsert_user(UserProfile {
                    id,
                    name: name.to_string(),
                    email: Some(format!("{}@example.com", id)),
                    email_verified: true,
                    phone: Some("0591234567".to_string()),
                })
                .await
                .unwrap();
        }
        for (clinic_id, user_id, role) in [
            (clinic_a, doctor, StaffRole::Doctor),
            (clinic_b, doctor, StaffRole::Doctor),
            (clinic_a, secretary, StaffRole::Secretary),
        ] {
            directory_repo
                .insert_staff(ClinicStaff {
                    id: Uuid::new_v4(),
                    clinic_id,
                    user_id,
                    role,
                    is_active: true,
                })
                .await
                .unwrap();
        }

        for (clinic_id, start, end) in [(clinic_a, t(9, 0), t(12, 0)), (clinic_b, t(14, 0), t(17, 0))] {
            availability
                .create_block(
                    doctor,
                    CreateAvailabilityRequest {
                        clinic_id,
                        day_of_week: 0,
                        start_time: start,
                        end_time: end,
                    },
                )
                .await
                .unwrap();
        }

        let mut types = Vec::new();
        for clinic_id in [clinic_a, clinic_b] {
            types.push(
                availability
                    .create_appointment_type(
                        doctor,
                        CreateAppointmentTypeRequest {
                            clinic_id,
                            name: "Consultation".to_string(),
                            duration_minutes: 30,
                            price: 50.0,
                            description: None,
                        },
                    )
                    .await
                    .unwrap(),
            );
        }
        let consult_b = types.pop().unwrap();
        let consult_a = types.pop().unwrap();

        Self {
            config,
            clock,
            availability,
            directory_repo,
            directory,
            calendar,
            notifications,
            booking,
            lifecycle,
            queries,
            doctor,
            clinic_a,
            clinic_b,
            secretary,
            patient,
            other_patient,
            consult_a,
            consult_b,
        }
    }

    pub fn request_a(&self, date: NaiveDate, time: NaiveTime) -> BookAppointmentRequest {
        BookAppointmentRequest {
            doctor_id: self.doctor,
            clinic_id: self.clinic_a,
            appointment_type_id: self.consult_a.id,
            date,
            time,
            reason: Some("Checkup".to_string()),
        }
    }

    pub fn request_b(&self, date: NaiveDate, time: NaiveTime) -> BookAppointmentRequest {
        BookAppointmentRequest {
            clinic_id: self.clinic_b,
            appointment_type_id: self.consult_b.id,
            ..self.request_a(date, time)
        }
    }

    pub async fn book_a(&self, patient: Uuid, time: NaiveTime) -> Result<Appointment, AppointmentError> {
        self.booking.book(patient, self.request_a(monday(), time)).await
    }

    pub fn change(&self, date: NaiveDate, time: NaiveTime) -> ChangeScheduleRequest {
        ChangeScheduleRequest {
            date,
            time,
            appointment_type_id: None,
            reason: None,
        }
    }

    /// Writes a row straight into the store, bypassing every booking rule.
    pub async fn insert_raw(&self, clinic_id: Uuid, date: NaiveDate, time: NaiveTime) -> Appointment {
        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: self.other_patient,
            clinic_id,
            doctor_id: Some(self.doctor),
            appointment_type_id: None,
            duration_minutes: Some(30),
            date,
            time,
            status: AppointmentStatus::Confirmed,
            reason: None,
            patient_edit_count: 0,
            revision: 1,
            created_by: self.other_patient,
            created_at: now,
            updated_at: now,
        };
        let mut tx = self.calendar.begin(vec![appointment.calendar_key()]).await.unwrap();
        tx.insert(appointment.clone()).await.unwrap();
        tx.commit().await.unwrap();
        appointment
    }

    pub fn state(&self) -> AppointmentCellState {
        AppointmentCellState {
            config: self.config.to_arc(),
            booking: self.booking.clone(),
            lifecycle: self.lifecycle.clone(),
            queries: self.queries.clone(),
        }
    }
}
