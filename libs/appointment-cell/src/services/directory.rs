use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use doctor_cell::ClinicAccess;
use notification_cell::Recipient;
use shared_database::{DatabaseError, UniqueIndex};

use crate::models::{Clinic, ClinicStaff, StaffRole, UserProfile};

pub const CLINIC_STAFF_CONSTRAINT: &str = "unique_clinic_staff_member";

/// Clinics, user contact details and clinic staff memberships.
#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    async fn insert_clinic(&self, clinic: Clinic) -> Result<Clinic, DatabaseError>;

    async fn get_clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>, DatabaseError>;

    async fn upsert_user(&self, user: UserProfile) -> Result<UserProfile, DatabaseError>;

    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, DatabaseError>;

    /// One membership per (clinic, user).
    async fn insert_staff(&self, staff: ClinicStaff) -> Result<ClinicStaff, DatabaseError>;

    async fn clinic_staff(&self, clinic_id: Uuid) -> Result<Vec<ClinicStaff>, DatabaseError>;
}

struct DirectoryTables {
    clinics: HashMap<Uuid, Clinic>,
    users: HashMap<Uuid, UserProfile>,
    staff: Vec<ClinicStaff>,
    memberships: UniqueIndex<(Uuid, Uuid)>,
}

/// Process-local directory for tests and tooling.
pub struct InMemoryDirectoryRepository {
    tables: RwLock<DirectoryTables>,
}

impl Default for InMemoryDirectoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectoryRepository {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(DirectoryTables {
                clinics: HashMap::new(),
                users: HashMap::new(),
                staff: Vec::new(),
                memberships: UniqueIndex::new(CLINIC_STAFF_CONSTRAINT),
            }),
        }
    }
}

#[async_trait]
impl DirectoryRepository for InMemoryDirectoryRepository {
    async fn insert_clinic(&self, clinic: Clinic) -> Result<Clinic, DatabaseError> {
        let mut tables = self.tables.write().await;
        tables.clinics.insert(clinic.id, clinic.clone());
        Ok(clinic)
    }

    async fn get_clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>, DatabaseError> {
        Ok(self.tables.read().await.clinics.get(&clinic_id).cloned())
    }

    async fn upsert_user(&self, user: UserProfile) -> Result<UserProfile, DatabaseError> {
        let mut tables = self.tables.write().await;
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, DatabaseError> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn insert_staff(&self, staff: ClinicStaff) -> Result<ClinicStaff, DatabaseError> {
        let mut tables = self.tables.write().await;
        tables.memberships.insert((staff.clinic_id, staff.user_id))?;
        tables.staff.push(staff.clone());
        Ok(staff)
    }

    async fn clinic_staff(&self, clinic_id: Uuid) -> Result<Vec<ClinicStaff>, DatabaseError> {
        let tables = self.tables.read().await;
        Ok(tables
            .staff
            .iter()
            .filter(|s| s.clinic_id == clinic_id)
            .cloned()
            .collect())
    }
}

/// Read-side helpers over the directory used by the booking and lifecycle
/// services.
pub struct StaffDirectory {
    repository: Arc<dyn DirectoryRepository>,
}

impl StaffDirectory {
    pub fn new(repository: Arc<dyn DirectoryRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn DirectoryRepository> {
        &self.repository
    }

    pub async fn clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>, DatabaseError> {
        self.repository.get_clinic(clinic_id).await
    }

    pub async fn active_clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>, DatabaseError> {
        Ok(self.clinic(clinic_id).await?.filter(|c| c.is_active))
    }

    pub async fn user(&self, user_id: Uuid) -> Result<Option<UserProfile>, DatabaseError> {
        self.repository.get_user(user_id).await
    }

    /// Active membership of `user_id` in the clinic's staff, if any.
    pub async fn membership(&self, clinic_id: Uuid, user_id: Uuid) -> Result<Option<ClinicStaff>, DatabaseError> {
        Ok(self
            .repository
            .clinic_staff(clinic_id)
            .await?
            .into_iter()
            .find(|s| s.user_id == user_id && s.is_active))
    }

    pub async fn active_staff(&self, clinic_id: Uuid, role: StaffRole) -> Result<Vec<ClinicStaff>, DatabaseError> {
        let mut staff = self.repository.clinic_staff(clinic_id).await?;
        staff.retain(|s| s.is_active && s.role == role);
        Ok(staff)
    }

    /// Contact details for a notification. Users missing from the directory
    /// still get an in-app notification.
    pub async fn recipient(&self, user_id: Uuid) -> Result<Recipient, DatabaseError> {
        let recipient = match self.user(user_id).await? {
            Some(profile) => Recipient {
                user_id,
                name: profile.name,
                email: profile.email,
                email_verified: profile.email_verified,
                phone: profile.phone,
            },
            None => {
                warn!("No directory profile for user {}; in-app delivery only", user_id);
                Recipient {
                    user_id,
                    name: String::new(),
                    email: None,
                    email_verified: false,
                    phone: None,
                }
            }
        };
        Ok(recipient)
    }

    /// The assigned doctor followed by every active secretary of the clinic.
    pub async fn care_team(&self, clinic_id: Uuid, doctor_id: Option<Uuid>) -> Result<Vec<Recipient>, DatabaseError> {
        let mut user_ids: Vec<Uuid> = doctor_id.into_iter().collect();
        for secretary in self.active_staff(clinic_id, StaffRole::Secretary).await? {
            if !user_ids.contains(&secretary.user_id) {
                user_ids.push(secretary.user_id);
            }
        }

        let mut recipients = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            recipients.push(self.recipient(user_id).await?);
        }
        Ok(recipients)
    }

    pub async fn display_name(&self, user_id: Uuid) -> Option<String> {
        match self.user(user_id).await {
            Ok(profile) => profile.map(|p| p.name).filter(|n| !n.is_empty()),
            Err(e) => {
                warn!("Directory lookup for {} failed: {}", user_id, e);
                None
            }
        }
    }
}

#[async_trait]
impl ClinicAccess for StaffDirectory {
    async fn is_clinic_staff(&self, clinic_id: Uuid, user_id: Uuid) -> bool {
        match self.membership(clinic_id, user_id).await {
            Ok(membership) => membership.is_some(),
            Err(e) => {
                warn!("Staff lookup for clinic {} failed: {}", clinic_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn staff(clinic_id: Uuid, user_id: Uuid, role: StaffRole, is_active: bool) -> ClinicStaff {
        ClinicStaff {
            id: Uuid::new_v4(),
            clinic_id,
            user_id,
            role,
            is_active,
        }
    }

    #[tokio::test]
    async fn membership_is_unique_per_clinic() {
        let repo = InMemoryDirectoryRepository::new();
        let clinic = Uuid::new_v4();
        let user = Uuid::new_v4();

        repo.insert_staff(staff(clinic, user, StaffRole::Doctor, true)).await.unwrap();
        assert_matches!(
            repo.insert_staff(staff(clinic, user, StaffRole::Secretary, true)).await,
            Err(DatabaseError::UniqueViolation { .. })
        );
        // The same doctor may work at another clinic.
        assert!(repo
            .insert_staff(staff(Uuid::new_v4(), user, StaffRole::Doctor, true))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn inactive_members_are_not_staff() {
        let repo = Arc::new(InMemoryDirectoryRepository::new());
        let clinic = Uuid::new_v4();
        let former = Uuid::new_v4();
        let current = Uuid::new_v4();
        repo.insert_staff(staff(clinic, former, StaffRole::Secretary, false)).await.unwrap();
        repo.insert_staff(staff(clinic, current, StaffRole::Secretary, true)).await.unwrap();

        let directory = StaffDirectory::new(repo);
        assert!(!directory.is_clinic_staff(clinic, former).await);
        assert!(directory.is_clinic_staff(clinic, current).await);
        assert!(!directory.is_clinic_staff(Uuid::new_v4(), current).await);
    }

    #[tokio::test]
    async fn care_team_lists_doctor_then_active_secretaries() {
        let repo = Arc::new(InMemoryDirectoryRepository::new());
        let clinic = Uuid::new_v4();
        let doctor = Uuid::new_v4();
        let secretary = Uuid::new_v4();
        repo.insert_staff(staff(clinic, doctor, StaffRole::Doctor, true)).await.unwrap();
        repo.insert_staff(staff(clinic, secretary, StaffRole::Secretary, true)).await.unwrap();
        repo.insert_staff(staff(clinic, Uuid::new_v4(), StaffRole::Secretary, false)).await.unwrap();
        repo.upsert_user(UserProfile {
            id: secretary,
            name: "Lina".to_string(),
            email: Some("lina@clinic.test".to_string()),
            email_verified: true,
            phone: None,
        })
        .await
        .unwrap();

        let directory = StaffDirectory::new(repo);
        let team = directory.care_team(clinic, Some(doctor)).await.unwrap();

        assert_eq!(team.len(), 2);
        assert_eq!(team[0].user_id, doctor);
        assert_eq!(team[1].name, "Lina");
        assert_eq!(team[1].verified_email(), Some("lina@clinic.test"));
    }
}
