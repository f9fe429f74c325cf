//! 账号年龄估算
//!
//! 平台不下发注册时间，只能用 ID → 注册时间的校准点做线性插值估算。
//! 校准点来自风险模型数据文件，按 ID 排序；超出两端时取端点值。

use chrono::{DateTime, Utc};

use crate::model::UserId;

const SECS_PER_DAY: i64 = 86_400;

/// ID → 注册时间估算器
#[derive(Debug, Clone)]
pub struct AccountAgeEstimator {
    /// (user_id, unix 秒)，按 user_id 升序
    anchors: Vec<(i64, i64)>,
    /// 估算的注册时间晚于当前时间时使用的年龄
    future_age_days: i64,
}

impl AccountAgeEstimator {
    pub fn new(mut anchors: Vec<(i64, i64)>, future_age_days: i64) -> Self {
        anchors.sort_by_key(|(id, _)| *id);
        anchors.dedup_by_key(|(id, _)| *id);
        Self {
            anchors,
            future_age_days,
        }
    }

    /// 估算注册时间（unix 秒）；没有校准点时返回 None
    pub fn creation_timestamp(&self, user_id: UserId) -> Option<i64> {
        let first = self.anchors.first()?;
        let last = self.anchors.last()?;
        if user_id <= first.0 {
            return Some(first.1);
        }
        if user_id >= last.0 {
            return Some(last.1);
        }

        // 第一个 id 大于 user_id 的校准点，前一个必然 <= user_id
        let upper = self.anchors.partition_point(|(id, _)| *id <= user_id);
        let (id0, ts0) = self.anchors[upper - 1];
        let (id1, ts1) = self.anchors[upper];
        if id1 == id0 {
            return Some(ts0);
        }
        let offset = (user_id - id0) as i128 * (ts1 - ts0) as i128 / (id1 - id0) as i128;
        Some(ts0 + offset as i64)
    }

    /// 估算年龄（整天）
    pub fn age_days(&self, user_id: UserId, now: DateTime<Utc>) -> i64 {
        let Some(created) = self.creation_timestamp(user_id) else {
            return self.future_age_days;
        };
        let now = now.timestamp();
        if created > now {
            return self.future_age_days;
        }
        (now - created) / SECS_PER_DAY
    }
}
