use async_trait::async_trait;
use uuid::Uuid;

/// Answers whether a user currently works at a clinic. Implemented by the
/// clinic directory.
#[async_trait]
pub trait ClinicAccess: Send + Sync {
    async fn is_clinic_staff(&self, clinic_id: Uuid, user_id: Uuid) -> bool;
}

/// Schedule writes are allowed for the doctor themself or for active staff
/// of the clinic the block belongs to.
pub async fn can_manage_schedule(
    access: &dyn ClinicAccess,
    actor_id: Uuid,
    doctor_id: Uuid,
    clinic_id: Uuid,
) -> bool {
    actor_id == doctor_id || access.is_clinic_staff(clinic_id, actor_id).await
}
