use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared_database::{DatabaseError, RowLockGuard, RowLockManager, UniqueIndex};

use crate::models::{AppointmentType, AvailabilityBlock};

pub const BLOCK_START_CONSTRAINT: &str = "unique_doctor_clinic_day_start";
pub const TYPE_NAME_CONSTRAINT: &str = "unique_doctor_clinic_type_name";

const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Storage for availability blocks and appointment types.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Opens a write transaction holding the doctor's schedule lock. Block
    /// writes only happen inside one.
    async fn lock_doctor(&self, doctor_id: Uuid) -> Result<Box<dyn ScheduleTransaction>, DatabaseError>;

    async fn get_block(&self, block_id: Uuid) -> Result<Option<AvailabilityBlock>, DatabaseError>;

    /// All blocks of a doctor at every clinic, ordered by (day_of_week, start_time).
    async fn doctor_blocks(&self, doctor_id: Uuid) -> Result<Vec<AvailabilityBlock>, DatabaseError>;

    async fn insert_type(&self, appointment_type: AppointmentType) -> Result<AppointmentType, DatabaseError>;

    async fn get_type(&self, type_id: Uuid) -> Result<Option<AppointmentType>, DatabaseError>;

    async fn doctor_types(&self, doctor_id: Uuid, clinic_id: Uuid) -> Result<Vec<AppointmentType>, DatabaseError>;
}

/// One doctor's schedule under lock. Writes become visible on `commit`;
/// dropping the transaction discards them.
#[async_trait]
pub trait ScheduleTransaction: Send + Sync {
    fn doctor_id(&self) -> Uuid;

    /// The locked doctor's blocks, including staged writes.
    async fn blocks(&self) -> Result<Vec<AvailabilityBlock>, DatabaseError>;

    async fn insert_block(&mut self, block: AvailabilityBlock) -> Result<AvailabilityBlock, DatabaseError>;

    async fn update_block(&mut self, block: AvailabilityBlock) -> Result<AvailabilityBlock, DatabaseError>;

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;
}

pub(crate) fn not_locked(doctor_id: Uuid, block: &AvailabilityBlock) -> DatabaseError {
    DatabaseError::NotLocked(format!(
        "block {} of doctor {} in a transaction for doctor {}",
        block.id, block.doctor_id, doctor_id
    ))
}

type BlockKey = (Uuid, Uuid, u8, NaiveTime);
type TypeKey = (Uuid, Uuid, String);

fn block_key(block: &AvailabilityBlock) -> BlockKey {
    (block.doctor_id, block.clinic_id, block.day_of_week, block.start_time)
}

fn sorted_blocks<'a>(doctor_id: Uuid, rows: impl Iterator<Item = &'a AvailabilityBlock>) -> Vec<AvailabilityBlock> {
    let mut blocks: Vec<AvailabilityBlock> = rows.filter(|b| b.doctor_id == doctor_id).cloned().collect();
    blocks.sort_by_key(|b| (b.day_of_week, b.start_time));
    blocks
}

struct ScheduleTables {
    blocks: HashMap<Uuid, AvailabilityBlock>,
    block_starts: UniqueIndex<BlockKey>,
    types: HashMap<Uuid, AppointmentType>,
    type_names: UniqueIndex<TypeKey>,
}

impl ScheduleTables {
    fn put_block(&mut self, block: AvailabilityBlock) -> Result<(), DatabaseError> {
        let new_key = block_key(&block);
        match self.blocks.get(&block.id).map(block_key) {
            Some(old_key) if old_key == new_key => {}
            Some(old_key) => {
                self.block_starts.check(&new_key)?;
                self.block_starts.remove(&old_key);
                self.block_starts.insert(new_key)?;
            }
            None => self.block_starts.insert(new_key)?,
        }
        self.blocks.insert(block.id, block);
        Ok(())
    }
}

/// Process-local schedule storage for tests and tooling.
pub struct InMemoryScheduleRepository {
    tables: Arc<RwLock<ScheduleTables>>,
    doctor_locks: RowLockManager<Uuid>,
}

impl Default for InMemoryScheduleRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_WAIT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(RwLock::new(ScheduleTables {
                blocks: HashMap::new(),
                block_starts: UniqueIndex::new(BLOCK_START_CONSTRAINT),
                types: HashMap::new(),
                type_names: UniqueIndex::new(TYPE_NAME_CONSTRAINT),
            })),
            doctor_locks: RowLockManager::new(lock_timeout),
        }
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn lock_doctor(&self, doctor_id: Uuid) -> Result<Box<dyn ScheduleTransaction>, DatabaseError> {
        let guard = self.doctor_locks.acquire(doctor_id).await?;
        Ok(Box::new(InMemoryScheduleTransaction {
            tables: Arc::clone(&self.tables),
            _guard: guard,
            doctor_id,
            staged: Vec::new(),
        }))
    }

    async fn get_block(&self, block_id: Uuid) -> Result<Option<AvailabilityBlock>, DatabaseError> {
        Ok(self.tables.read().await.blocks.get(&block_id).cloned())
    }

    async fn doctor_blocks(&self, doctor_id: Uuid) -> Result<Vec<AvailabilityBlock>, DatabaseError> {
        let tables = self.tables.read().await;
        Ok(sorted_blocks(doctor_id, tables.blocks.values()))
    }

    async fn insert_type(&self, appointment_type: AppointmentType) -> Result<AppointmentType, DatabaseError> {
        let mut tables = self.tables.write().await;
        tables.type_names.insert((
            appointment_type.doctor_id,
            appointment_type.clinic_id,
            appointment_type.name.to_lowercase(),
        ))?;
        tables.types.insert(appointment_type.id, appointment_type.clone());
        Ok(appointment_type)
    }

    async fn get_type(&self, type_id: Uuid) -> Result<Option<AppointmentType>, DatabaseError> {
        Ok(self.tables.read().await.types.get(&type_id).cloned())
    }

    async fn doctor_types(&self, doctor_id: Uuid, clinic_id: Uuid) -> Result<Vec<AppointmentType>, DatabaseError> {
        let tables = self.tables.read().await;
        let mut types: Vec<AppointmentType> = tables
            .types
            .values()
            .filter(|t| t.doctor_id == doctor_id && t.clinic_id == clinic_id)
            .cloned()
            .collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }
}

struct InMemoryScheduleTransaction {
    tables: Arc<RwLock<ScheduleTables>>,
    _guard: RowLockGuard<Uuid>,
    doctor_id: Uuid,
    staged: Vec<AvailabilityBlock>,
}

impl InMemoryScheduleTransaction {
    /// The doctor lock keeps other writers off this doctor's rows, so
    /// checking against this doctor's blocks is enough.
    async fn stage(&mut self, block: AvailabilityBlock, must_exist: bool) -> Result<AvailabilityBlock, DatabaseError> {
        if block.doctor_id != self.doctor_id {
            return Err(not_locked(self.doctor_id, &block));
        }

        let current = self.blocks().await?;
        let exists = current.iter().any(|b| b.id == block.id);
        if must_exist && !exists {
            return Err(DatabaseError::NotFound(format!("availability block {}", block.id)));
        }
        if !must_exist && exists {
            return Err(DatabaseError::UniqueViolation {
                constraint: "availability_blocks_pkey".to_string(),
            });
        }

        let key = block_key(&block);
        if current.iter().any(|b| b.id != block.id && block_key(b) == key) {
            return Err(DatabaseError::UniqueViolation {
                constraint: BLOCK_START_CONSTRAINT.to_string(),
            });
        }

        self.staged.retain(|b| b.id != block.id);
        self.staged.push(block.clone());
        Ok(block)
    }
}

#[async_trait]
impl ScheduleTransaction for InMemoryScheduleTransaction {
    fn doctor_id(&self) -> Uuid {
        self.doctor_id
    }

    async fn blocks(&self) -> Result<Vec<AvailabilityBlock>, DatabaseError> {
        let tables = self.tables.read().await;
        let mut merged = tables.blocks.clone();
        for staged in &self.staged {
            merged.insert(staged.id, staged.clone());
        }
        Ok(sorted_blocks(self.doctor_id, merged.values()))
    }

    async fn insert_block(&mut self, block: AvailabilityBlock) -> Result<AvailabilityBlock, DatabaseError> {
        self.stage(block, false).await
    }

    async fn update_block(&mut self, block: AvailabilityBlock) -> Result<AvailabilityBlock, DatabaseError> {
        self.stage(block, true).await
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let InMemoryScheduleTransaction { tables, _guard, staged, .. } = *self;
        let mut tables = tables.write().await;
        for block in staged {
            tables.put_block(block)?;
        }
        Ok(())
    }
}
