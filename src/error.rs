//! 错误类型
//!
//! 所有核心组件统一返回 [`GuardError`]。分类决定调用方的处理方式：
//! - `ConfigMissing`：群未配置，对应功能视为关闭
//! - `PlatformTransient`：有限次指数退避重试
//! - `PlatformPermanent`：不重试，触发处罚登记清理
//! - `CacheUnavailable`：放行（fail-open），记录降级日志
//! - `Persistence`：上抛给调用方，本次决策不执行

use thiserror::Error;

use crate::model::RoomId;

/// 网关错误类型
#[derive(Debug, Clone, Error)]
pub enum GuardError {
    /// 群没有设置记录
    #[error("群 {0} 没有设置记录")]
    ConfigMissing(RoomId),

    /// 平台临时错误（超时、限流）
    #[error("平台调用 {op} 临时失败: {reason}")]
    PlatformTransient { op: String, reason: String },

    /// 平台永久错误（群或用户已不存在）
    #[error("平台调用 {op} 永久失败: {reason}")]
    PlatformPermanent { op: String, reason: String },

    /// 共享缓存不可用
    #[error("共享缓存不可用: {0}")]
    CacheUnavailable(String),

    /// 持久化写入失败
    #[error("持久化失败: {0}")]
    Persistence(String),

    /// 输入校验失败
    #[error("校验失败: {0}")]
    Validation(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl GuardError {
    /// 可降级为放行的错误（评分、计数器、缓存等非关键路径）
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            GuardError::CacheUnavailable(_)
                | GuardError::Internal(_)
                | GuardError::Serialization(_)
                | GuardError::ConfigMissing(_)
        )
    }

    /// 是否值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, GuardError::PlatformTransient { .. })
    }

    /// 群或用户已不存在
    pub fn is_permanent_platform(&self) -> bool {
        matches!(self, GuardError::PlatformPermanent { .. })
    }

    /// 指标标签
    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::ConfigMissing(_) => "config_missing",
            GuardError::PlatformTransient { .. } => "platform_transient",
            GuardError::PlatformPermanent { .. } => "platform_permanent",
            GuardError::CacheUnavailable(_) => "cache_unavailable",
            GuardError::Persistence(_) => "persistence",
            GuardError::Validation(_) => "validation",
            GuardError::Serialization(_) => "serialization",
            GuardError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        GuardError::Serialization(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for GuardError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        GuardError::CacheUnavailable(format!("操作超时: {}", err))
    }
}

impl From<sqlx::Error> for GuardError {
    fn from(err: sqlx::Error) -> Self {
        GuardError::Persistence(err.to_string())
    }
}

impl From<redis::RedisError> for GuardError {
    fn from(err: redis::RedisError) -> Self {
        GuardError::CacheUnavailable(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transient = GuardError::PlatformTransient {
            op: "restrict".into(),
            reason: "429".into(),
        };
        assert!(transient.is_retryable());
        assert!(!transient.is_degradable());

        let cache = GuardError::CacheUnavailable("down".into());
        assert!(cache.is_degradable());
        assert!(!cache.is_retryable());

        let persistence = GuardError::Persistence("disk full".into());
        assert!(!persistence.is_degradable());
        assert_eq!(persistence.kind(), "persistence");
    }
}
