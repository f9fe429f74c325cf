//! 内存实现（回放模式与测试）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{GuardError, Result};
use crate::model::{NewPunishment, PunishmentRecord, RoomId, RoomSettings, UserId};
use crate::repository::{Directory, PunishmentRepository, RoomConfigStore};

// ============================================================================
// 处罚登记
// ============================================================================

#[derive(Default)]
pub struct InMemoryPunishmentRepository {
    records: Mutex<Vec<PunishmentRecord>>,
    fail_writes: AtomicBool,
}

impl InMemoryPunishmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟持久化故障
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 全部登记（含已撤销）
    pub fn all(&self) -> Vec<PunishmentRecord> {
        self.records.lock().clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GuardError::Persistence("模拟写入失败".to_string()));
        }
        Ok(())
    }

    fn with_record<T>(&self, id: i64, f: impl FnOnce(&mut PunishmentRecord) -> T) -> Result<T> {
        let mut records = self.records.lock();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| GuardError::Persistence(format!("处罚登记 {} 不存在", id)))?;
        Ok(f(record))
    }
}

#[async_trait]
impl PunishmentRepository for InMemoryPunishmentRepository {
    async fn create(&self, new: &NewPunishment) -> Result<PunishmentRecord> {
        self.check_writable()?;
        let mut records = self.records.lock();
        let record = PunishmentRecord {
            id: records.len() as i64 + 1,
            subject_id: new.subject_id,
            origin_room_id: new.origin_room_id,
            kind: new.kind,
            issuer_id: new.issuer_id,
            reason: new.reason,
            expires_at: new.expires_at,
            active: true,
            propagated_rooms: BTreeSet::new(),
            created_at: Utc::now(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn find_active_by_subject(
        &self,
        subject_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PunishmentRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.subject_id == subject_id && r.is_in_force(now))
            .cloned()
            .collect())
    }

    async fn add_rooms(&self, punishment_id: i64, rooms: &[RoomId]) -> Result<()> {
        self.check_writable()?;
        self.with_record(punishment_id, |r| r.propagated_rooms.extend(rooms.iter().copied()))
    }

    async fn remove_room(&self, punishment_id: i64, room_id: RoomId) -> Result<()> {
        self.check_writable()?;
        self.with_record(punishment_id, |r| {
            r.propagated_rooms.remove(&room_id);
        })
    }

    async fn deactivate(&self, punishment_id: i64) -> Result<bool> {
        self.check_writable()?;
        self.with_record(punishment_id, |r| std::mem::replace(&mut r.active, false))
    }
}

// ============================================================================
// 群设置
// ============================================================================

#[derive(Default)]
pub struct InMemoryRoomConfigStore {
    rooms: DashMap<RoomId, RoomSettings>,
}

impl InMemoryRoomConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, room_id: RoomId, settings: RoomSettings) {
        self.rooms.insert(room_id, settings);
    }

    pub fn remove(&self, room_id: RoomId) {
        self.rooms.remove(&room_id);
    }
}

#[async_trait]
impl RoomConfigStore for InMemoryRoomConfigStore {
    async fn load(&self, room_id: RoomId) -> Result<Option<RoomSettings>> {
        Ok(self.rooms.get(&room_id).map(|s| *s.value()))
    }
}

// ============================================================================
// 管理员目录
// ============================================================================

#[derive(Default)]
pub struct InMemoryDirectory {
    admins: DashMap<UserId, BTreeSet<RoomId>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, room_id: RoomId, user_id: UserId) {
        self.admins.entry(user_id).or_default().insert(room_id);
    }

    pub fn revoke(&self, room_id: RoomId, user_id: UserId) {
        if let Some(mut rooms) = self.admins.get_mut(&user_id) {
            rooms.remove(&room_id);
        }
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn is_admin(&self, room_id: RoomId, user_id: UserId) -> Result<bool> {
        Ok(self
            .admins
            .get(&user_id)
            .is_some_and(|rooms| rooms.contains(&room_id)))
    }

    async fn privileged_rooms(&self, user_id: UserId) -> Result<Vec<RoomId>> {
        Ok(self
            .admins
            .get(&user_id)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PunishmentKind, RestrictReason};

    #[tokio::test]
    async fn test_punishment_lifecycle() {
        let repo = InMemoryPunishmentRepository::new();
        let record = repo
            .create(&NewPunishment {
                subject_id: 5,
                origin_room_id: -1,
                kind: PunishmentKind::PermanentBan,
                issuer_id: 1,
                reason: RestrictReason::Manual,
                expires_at: None,
            })
            .await
            .unwrap();

        repo.add_rooms(record.id, &[-1, -2, -3]).await.unwrap();
        repo.remove_room(record.id, -2).await.unwrap();
        let active = repo.find_active_by_subject(5, Utc::now()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(
            active[0].propagated_rooms.iter().copied().collect::<Vec<_>>(),
            vec![-3, -1]
        );

        assert!(repo.deactivate(record.id).await.unwrap());
        assert!(!repo.deactivate(record.id).await.unwrap());
        assert!(repo.find_active_by_subject(5, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directory_grants() {
        let dir = InMemoryDirectory::new();
        dir.grant(-1, 9);
        dir.grant(-2, 9);
        assert!(dir.is_admin(-1, 9).await.unwrap());
        assert!(!dir.is_admin(-1, 8).await.unwrap());
        dir.revoke(-1, 9);
        assert_eq!(dir.privileged_rooms(9).await.unwrap(), vec![-2]);
    }
}
