//! 跨群处罚登记 - PostgreSQL 实现

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{GuardError, Result};
use crate::model::{
    NewPunishment, PunishmentKind, PunishmentRecord, RestrictReason, RoomId, UserId,
};

/// 处罚登记仓库 trait
#[async_trait]
pub trait PunishmentRepository: Send + Sync {
    /// 写入一条生效的登记，传播群集合为空
    async fn create(&self, new: &NewPunishment) -> Result<PunishmentRecord>;

    /// 某用户当前生效且未过期的登记
    async fn find_active_by_subject(
        &self,
        subject_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PunishmentRecord>>;

    /// 记录已成功传播到的群
    async fn add_rooms(&self, punishment_id: i64, rooms: &[RoomId]) -> Result<()>;

    /// 群已不存在等永久失败时移出传播集合
    async fn remove_room(&self, punishment_id: i64, room_id: RoomId) -> Result<()>;

    /// 撤销登记，返回是否确实从生效变为失效
    async fn deactivate(&self, punishment_id: i64) -> Result<bool>;
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// 处罚登记仓库 (PostgreSQL 实现)
#[derive(Clone)]
pub struct PgPunishmentRepository {
    pool: Arc<PgPool>,
}

impl PgPunishmentRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PunishmentRepository for PgPunishmentRepository {
    async fn create(&self, new: &NewPunishment) -> Result<PunishmentRecord> {
        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO punishments
                (subject_id, origin_room_id, kind, issuer_id, reason, expires_at, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $7)
            RETURNING id
            "#,
        )
        .bind(new.subject_id)
        .bind(new.origin_room_id)
        .bind(new.kind.to_i16())
        .bind(new.issuer_id)
        .bind(new.reason.as_str())
        .bind(new.expires_at.map(|at| at.timestamp_millis()))
        .bind(now.timestamp_millis())
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| GuardError::Persistence(format!("写入处罚登记失败: {}", e)))?;

        Ok(PunishmentRecord {
            id,
            subject_id: new.subject_id,
            origin_room_id: new.origin_room_id,
            kind: new.kind,
            issuer_id: new.issuer_id,
            reason: new.reason,
            expires_at: new.expires_at,
            active: true,
            propagated_rooms: BTreeSet::new(),
            created_at: millis_to_datetime(now.timestamp_millis()),
        })
    }

    async fn find_active_by_subject(
        &self,
        subject_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PunishmentRecord>> {
        #[derive(sqlx::FromRow)]
        struct PunishmentRow {
            id: i64,
            subject_id: i64,
            origin_room_id: i64,
            kind: i16,
            issuer_id: i64,
            reason: String,
            expires_at: Option<i64>,
            active: bool,
            created_at: i64,
            rooms: Vec<i64>,
        }

        let rows = sqlx::query_as::<_, PunishmentRow>(
            r#"
            SELECT p.id, p.subject_id, p.origin_room_id, p.kind, p.issuer_id, p.reason,
                   p.expires_at, p.active, p.created_at,
                   COALESCE(array_agg(r.room_id) FILTER (WHERE r.room_id IS NOT NULL), '{}') AS rooms
            FROM punishments p
            LEFT JOIN punishment_rooms r ON r.punishment_id = p.id
            WHERE p.subject_id = $1
              AND p.active
              AND (p.expires_at IS NULL OR p.expires_at > $2)
            GROUP BY p.id
            ORDER BY p.id
            "#,
        )
        .bind(subject_id)
        .bind(now.timestamp_millis())
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|e| GuardError::Persistence(format!("查询处罚登记失败: {}", e)))?;

        let records = rows
            .into_iter()
            .filter_map(|row| {
                let kind = PunishmentKind::from_i16(row.kind)?;
                let reason = RestrictReason::parse(&row.reason).unwrap_or(RestrictReason::Manual);
                Some(PunishmentRecord {
                    id: row.id,
                    subject_id: row.subject_id,
                    origin_room_id: row.origin_room_id,
                    kind,
                    issuer_id: row.issuer_id,
                    reason,
                    expires_at: row.expires_at.map(millis_to_datetime),
                    active: row.active,
                    propagated_rooms: row.rooms.into_iter().collect(),
                    created_at: millis_to_datetime(row.created_at),
                })
            })
            .collect();
        Ok(records)
    }

    async fn add_rooms(&self, punishment_id: i64, rooms: &[RoomId]) -> Result<()> {
        if rooms.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO punishment_rooms (punishment_id, room_id, applied_at)
            SELECT $1, room_id, $3 FROM UNNEST($2::BIGINT[]) AS room_id
            ON CONFLICT (punishment_id, room_id) DO NOTHING
            "#,
        )
        .bind(punishment_id)
        .bind(rooms)
        .bind(Utc::now().timestamp_millis())
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| GuardError::Persistence(format!("记录传播群失败: {}", e)))?;
        Ok(())
    }

    async fn remove_room(&self, punishment_id: i64, room_id: RoomId) -> Result<()> {
        sqlx::query("DELETE FROM punishment_rooms WHERE punishment_id = $1 AND room_id = $2")
            .bind(punishment_id)
            .bind(room_id)
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| GuardError::Persistence(format!("清理传播群失败: {}", e)))?;
        Ok(())
    }

    async fn deactivate(&self, punishment_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE punishments SET active = FALSE, updated_at = $2 WHERE id = $1 AND active",
        )
        .bind(punishment_id)
        .bind(Utc::now().timestamp_millis())
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| GuardError::Persistence(format!("撤销处罚登记失败: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }
}
