use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use appointment_cell::models::{Clinic, ClinicStaff, StaffRole, UserProfile};
use appointment_cell::services::directory::CLINIC_STAFF_CONSTRAINT;
use appointment_cell::services::DirectoryRepository;
use doctor_cell::models::{AvailabilityError, CreateAppointmentTypeRequest, CreateAvailabilityRequest};
use shared_database::DatabaseError;

use crate::router::AppServices;

/// Contents of the JSON file named by `SEED_DATA_PATH`. Every section is
/// optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub clinics: Vec<Clinic>,
    pub users: Vec<UserProfile>,
    pub staff: Vec<SeedStaff>,
    pub availability: Vec<SeedBlock>,
    pub appointment_types: Vec<SeedAppointmentType>,
}

#[derive(Debug, Deserialize)]
pub struct SeedStaff {
    pub clinic_id: Uuid,
    pub user_id: Uuid,
    pub role: StaffRole,
    #[serde(default = "active")]
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct SeedBlock {
    pub doctor_id: Uuid,
    #[serde(flatten)]
    pub block: CreateAvailabilityRequest,
}

#[derive(Debug, Deserialize)]
pub struct SeedAppointmentType {
    pub doctor_id: Uuid,
    #[serde(flatten)]
    pub appointment_type: CreateAppointmentTypeRequest,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub clinics: usize,
    pub users: usize,
    pub staff: usize,
    pub blocks: usize,
    pub appointment_types: usize,
    /// Staff, blocks and types already present from an earlier run.
    pub existing: usize,
}

fn active() -> bool {
    true
}

pub async fn load_seed_file(path: &Path, services: &AppServices) -> Result<SeedSummary> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading seed file {}", path.display()))?;
    let seed: SeedData = serde_json::from_str(&raw)
        .with_context(|| format!("parsing seed file {}", path.display()))?;

    let summary = apply_seed(seed, services).await?;
    info!(
        "Seeded {} clinics, {} users, {} staff, {} availability blocks, {} appointment types ({} already present)",
        summary.clinics,
        summary.users,
        summary.staff,
        summary.blocks,
        summary.appointment_types,
        summary.existing
    );
    Ok(summary)
}

/// Directory rows are written as given; availability and appointment types
/// go through the doctor-cell validation. Safe to rerun against a database
/// that already holds the same seed.
pub async fn apply_seed(seed: SeedData, services: &AppServices) -> Result<SeedSummary> {
    let directory = services.directory.repository();
    let mut summary = SeedSummary::default();

    for clinic in seed.clinics {
        let id = clinic.id;
        directory
            .insert_clinic(clinic)
            .await
            .with_context(|| format!("seeding clinic {}", id))?;
        summary.clinics += 1;
    }

    for user in seed.users {
        let id = user.id;
        directory
            .upsert_user(user)
            .await
            .with_context(|| format!("seeding user {}", id))?;
        summary.users += 1;
    }

    for member in seed.staff {
        let inserted = directory
            .insert_staff(ClinicStaff {
                id: Uuid::new_v4(),
                clinic_id: member.clinic_id,
                user_id: member.user_id,
                role: member.role,
                is_active: member.is_active,
            })
            .await;
        match inserted {
            Ok(_) => summary.staff += 1,
            Err(DatabaseError::UniqueViolation { ref constraint }) if constraint == CLINIC_STAFF_CONSTRAINT => {
                summary.existing += 1
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("seeding staff {} at clinic {}", member.user_id, member.clinic_id)
                })
            }
        }
    }

    for entry in seed.availability {
        let context = || format!("seeding availability for doctor {}", entry.doctor_id);
        let request = &entry.block;
        let present = services
            .availability
            .list_blocks(entry.doctor_id, Some(request.clinic_id))
            .await
            .with_context(context)?
            .iter()
            .any(|b| {
                b.day_of_week == request.day_of_week
                    && b.start_time == request.start_time
                    && b.end_time == request.end_time
            });
        if present {
            summary.existing += 1;
            continue;
        }

        services
            .availability
            .create_block(entry.doctor_id, entry.block.clone())
            .await
            .with_context(context)?;
        summary.blocks += 1;
    }

    for entry in seed.appointment_types {
        match services
            .availability
            .create_appointment_type(entry.doctor_id, entry.appointment_type)
            .await
        {
            Ok(_) => summary.appointment_types += 1,
            Err(AvailabilityError::DuplicateAppointmentType) => summary.existing += 1,
            Err(e) => {
                return Err(e).with_context(|| format!("seeding appointment type for doctor {}", entry.doctor_id))
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use shared_config::AppConfig;
    use shared_utils::FixedClock;
    use tempfile::NamedTempFile;

    use crate::router::Stores;

    fn services() -> AppServices {
        let sunday = "2030-01-06T08:00:00".parse().unwrap();
        let config = Arc::new(AppConfig::default());
        let stores = Stores::in_memory(Duration::from_millis(config.lock_timeout_ms));
        AppServices::new(config, Arc::new(FixedClock::new(sunday)), stores)
    }

    fn write_seed(value: serde_json::Value) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(value.to_string().as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn seeded_doctor_has_bookable_slots() {
        let clinic = Uuid::new_v4();
        let doctor = Uuid::new_v4();
        let file = write_seed(json!({
            "clinics": [{ "id": clinic, "name": "Old City Clinic", "address": null }],
            "users": [{ "id": doctor, "name": "Sara Haddad", "email": "sara@example.com", "phone": null }],
            "staff": [{ "clinic_id": clinic, "user_id": doctor, "role": "DOCTOR" }],
            "availability": [{
                "doctor_id": doctor, "clinic_id": clinic,
                "day_of_week": 0, "start_time": "09:00", "end_time": "10:00"
            }],
            "appointment_types": [{
                "doctor_id": doctor, "clinic_id": clinic,
                "name": "Consultation", "duration_minutes": 20, "price": 40.0
            }]
        }));
        let services = services();

        let summary = load_seed_file(file.path(), &services).await.unwrap();
        assert_eq!(
            summary,
            SeedSummary {
                clinics: 1,
                users: 1,
                staff: 1,
                blocks: 1,
                appointment_types: 1,
                existing: 0,
            }
        );

        let types = services.availability.list_appointment_types(doctor, clinic).await.unwrap();
        let monday = "2030-01-07".parse().unwrap();
        let slots = services
            .booking
            .slots(doctor, clinic, monday, types[0].id)
            .await
            .unwrap();
        assert_eq!(slots.results.len(), 3);
    }

    #[tokio::test]
    async fn reloading_the_same_seed_adds_nothing() {
        let clinic = Uuid::new_v4();
        let doctor = Uuid::new_v4();
        let file = write_seed(json!({
            "clinics": [{ "id": clinic, "name": "Old City Clinic", "address": null }],
            "users": [{ "id": doctor, "name": "Sara Haddad", "email": null, "phone": null }],
            "staff": [{ "clinic_id": clinic, "user_id": doctor, "role": "DOCTOR" }],
            "availability": [{
                "doctor_id": doctor, "clinic_id": clinic,
                "day_of_week": 0, "start_time": "09:00", "end_time": "10:00"
            }],
            "appointment_types": [{
                "doctor_id": doctor, "clinic_id": clinic,
                "name": "Consultation", "duration_minutes": 20, "price": 40.0
            }]
        }));
        let services = services();

        load_seed_file(file.path(), &services).await.unwrap();
        let again = load_seed_file(file.path(), &services).await.unwrap();

        assert_eq!((again.staff, again.blocks, again.appointment_types), (0, 0, 0));
        assert_eq!(again.existing, 3);
        assert_eq!(services.availability.list_blocks(doctor, None).await.unwrap().len(), 1);
        assert_eq!(
            services.availability.list_appointment_types(doctor, clinic).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn invalid_block_fails_with_context() {
        let file = write_seed(json!({
            "availability": [{
                "doctor_id": Uuid::new_v4(), "clinic_id": Uuid::new_v4(),
                "day_of_week": 0, "start_time": "12:00", "end_time": "09:00"
            }]
        }));

        let err = load_seed_file(file.path(), &services()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("seeding availability"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = load_seed_file(Path::new("/nonexistent/seed.json"), &services())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("reading seed file"));
    }
}
