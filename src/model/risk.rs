use serde::{Deserialize, Serialize};

use super::membership::UserId;

/// 风险档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Pass,
    /// 需要二次验证
    Challenge,
    Medium,
    High,
}

impl RiskTier {
    /// 中高风险入群即静默限制
    pub fn restricts(self) -> bool {
        matches!(self, RiskTier::Medium | RiskTier::High)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskTier::Pass => "pass",
            RiskTier::Challenge => "challenge",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }
}

/// 档位阈值（外部数据，不在代码里调参）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskTiers {
    pub high: u8,
    pub medium: u8,
    pub challenge: u8,
}

impl RiskTiers {
    pub fn tier_for(&self, score: u8) -> RiskTier {
        if score >= self.high {
            RiskTier::High
        } else if score >= self.medium {
            RiskTier::Medium
        } else if score >= self.challenge {
            RiskTier::Challenge
        } else {
            RiskTier::Pass
        }
    }
}

/// 单个加分项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub tag: String,
    pub points: i32,
}

/// 一次评分结果，只在调用方内部使用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub subject_id: UserId,
    /// 0..=100
    pub score: u8,
    pub tier: RiskTier,
    pub factors: Vec<RiskFactor>,
    /// 估算的账号年龄（天）
    pub account_age_days: i64,
}

impl RiskAssessment {
    pub fn factor_tags(&self) -> Vec<&str> {
        self.factors.iter().map(|f| f.tag.as_str()).collect()
    }
}
