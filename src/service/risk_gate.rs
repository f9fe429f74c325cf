//! 风险评分门
//!
//! 纯函数：资料快照 + 当前时间 → 0..=100 分和加分项。没有内部可变状态，
//! 同样的输入和时钟总是得到同样的结果。
//!
//! 所有阈值、权重、校准点、关键词都来自风险模型数据（默认内置
//! `config/risk_model.json`，可以用配置指定外部文件），代码里不调参。

use chrono::{DateTime, Utc};
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GuardError, Result};
use crate::model::{ProfileSignals, RiskAssessment, RiskFactor, RiskTiers};
use crate::service::account_age::AccountAgeEstimator;
use crate::service::text_normalizer;

/// 内置风险模型
pub const DEFAULT_RISK_MODEL: &str = include_str!("../../config/risk_model.json");

const MAX_SCORE: i32 = 100;

/// 评分策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPolicy {
    /// 只看账号年龄：年轻账号满分，其余 0 分
    AgeOnly,
    /// 年龄分档 + 资料文本 + 完整度
    #[default]
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeBand {
    /// 年龄小于该天数时命中
    pub max_days: i64,
    pub points: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeModel {
    pub young_account_days: i64,
    pub young_account_points: i32,
    /// 按 max_days 升序，命中第一个
    pub graded: Vec<AgeBand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub automated_account: i32,
    pub missing_username: i32,
    pub missing_first_name: i32,
    pub long_bio: i32,
    pub long_bio_chars: usize,
    pub many_line_breaks: i32,
    pub line_break_limit: usize,
    /// 连续相同字符达到该长度视为可疑
    pub repeated_chars_run: usize,
    pub premium_bonus: i32,
}

/// 头像全部是新传的
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoModel {
    /// 每张头像都比这个天数新时命中
    pub young_photo_days: i64,
    pub all_young_points: i32,
}

impl Default for PhotoModel {
    fn default() -> Self {
        Self {
            young_photo_days: 15,
            all_young_points: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPatterns {
    pub tag: String,
    pub points: i32,
    pub patterns: Vec<String>,
}

/// 风险模型数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskModel {
    #[serde(default)]
    pub policy: ScoringPolicy,
    /// (user_id, 注册时间 unix 秒)
    pub anchors: Vec<(i64, i64)>,
    pub future_creation_age_days: i64,
    pub tiers: RiskTiers,
    pub age: AgeModel,
    pub weights: RiskWeights,
    #[serde(default)]
    pub photos: PhotoModel,
    pub categories: Vec<CategoryPatterns>,
}

impl RiskModel {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_json(DEFAULT_RISK_MODEL)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GuardError::Validation(format!("读取风险模型 {} 失败: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }
}

struct CompiledCategory {
    tag: String,
    points: i32,
    patterns: RegexSet,
}

/// 风险评分门
pub struct RiskGate {
    model: RiskModel,
    estimator: AccountAgeEstimator,
    categories: Vec<CompiledCategory>,
}

impl RiskGate {
    pub fn new(model: RiskModel) -> Result<Self> {
        let categories = model
            .categories
            .iter()
            .map(|c| {
                let patterns = RegexSet::new(c.patterns.iter().map(|p| format!("(?i){}", p)))
                    .map_err(|e| {
                        GuardError::Validation(format!("风险模型分类 {} 规则无效: {}", c.tag, e))
                    })?;
                Ok(CompiledCategory {
                    tag: c.tag.clone(),
                    points: c.points,
                    patterns,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let estimator =
            AccountAgeEstimator::new(model.anchors.clone(), model.future_creation_age_days);

        tracing::debug!(
            policy = ?model.policy,
            anchors = model.anchors.len(),
            categories = categories.len(),
            "风险模型已加载"
        );

        Ok(Self {
            model,
            estimator,
            categories,
        })
    }

    /// 内置模型
    pub fn with_builtin_model() -> Result<Self> {
        Self::new(RiskModel::builtin()?)
    }

    /// 配置了外部文件就用外部文件，否则用内置模型
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::new(RiskModel::from_file(path)?),
            None => Self::with_builtin_model(),
        }
    }

    pub fn model(&self) -> &RiskModel {
        &self.model
    }

    pub fn estimator(&self) -> &AccountAgeEstimator {
        &self.estimator
    }

    /// 评分
    pub fn assess(&self, profile: &ProfileSignals, now: DateTime<Utc>) -> RiskAssessment {
        let age_days = self.estimator.age_days(profile.subject_id, now);
        let weights = &self.model.weights;
        let mut factors = Vec::new();

        if profile.is_bot {
            factors.push(factor("automated_account", weights.automated_account));
            return self.finish(profile, MAX_SCORE, factors, age_days);
        }

        match self.model.policy {
            ScoringPolicy::AgeOnly => {
                let age = &self.model.age;
                if (0..=age.young_account_days).contains(&age_days) {
                    factors.push(factor("young_account", age.young_account_points));
                }
                self.photo_factor(profile, now, &mut factors);
            }
            ScoringPolicy::Composite => {
                if let Some(band) = self.model.age.graded.iter().find(|b| age_days < b.max_days) {
                    factors.push(factor("young_account", band.points));
                }
                self.photo_factor(profile, now, &mut factors);
                self.text_factors(profile, &mut factors);
                if !profile.has_username() {
                    factors.push(factor("missing_username", weights.missing_username));
                }
                if !profile.has_first_name() {
                    factors.push(factor("missing_first_name", weights.missing_first_name));
                }
            }
        }

        let mut score: i32 = factors.iter().map(|f| f.points).sum();
        if profile.is_premium && score > 0 {
            factors.push(factor("premium", -weights.premium_bonus));
            score = (score - weights.premium_bonus).max(0);
        }
        self.finish(profile, score, factors, age_days)
    }

    /// 没有头像不算；有一张旧头像也不算
    fn photo_factor(&self, profile: &ProfileSignals, now: DateTime<Utc>, factors: &mut Vec<RiskFactor>) {
        let photos = &self.model.photos;
        if profile.photo_dates.is_empty() {
            return;
        }
        let all_young = profile
            .photo_dates
            .iter()
            .all(|uploaded| (now - *uploaded).num_days() < photos.young_photo_days);
        if all_young {
            factors.push(factor("fresh_photos", photos.all_young_points));
        }
    }

    fn text_factors(&self, profile: &ProfileSignals, factors: &mut Vec<RiskFactor>) {
        let weights = &self.model.weights;
        let text = profile.searchable_text();

        if !text.is_empty() {
            let repeated = has_repeated_run(&text, weights.repeated_chars_run);
            let candidates = text_normalizer::match_candidates(&text, &profile.display_name());
            for category in &self.categories {
                let hit = candidates.iter().any(|c| category.patterns.is_match(c))
                    || (repeated && category.tag == "generic_suspicious");
                if hit {
                    factors.push(factor(&category.tag, category.points));
                }
            }
        }

        if let Some(bio) = profile.bio.as_deref() {
            if bio.chars().count() > weights.long_bio_chars {
                factors.push(factor("long_bio", weights.long_bio));
            }
            if bio.matches('\n').count() > weights.line_break_limit {
                factors.push(factor("many_line_breaks", weights.many_line_breaks));
            }
        }
    }

    fn finish(
        &self,
        profile: &ProfileSignals,
        score: i32,
        factors: Vec<RiskFactor>,
        account_age_days: i64,
    ) -> RiskAssessment {
        let score = score.clamp(0, MAX_SCORE) as u8;
        RiskAssessment {
            subject_id: profile.subject_id,
            score,
            tier: self.model.tiers.tier_for(score),
            factors,
            account_age_days,
        }
    }
}

fn factor(tag: &str, points: i32) -> RiskFactor {
    RiskFactor {
        tag: tag.to_string(),
        points,
    }
}

/// 是否存在长度 >= `run` 的连续相同非空白字符
fn has_repeated_run(text: &str, run: usize) -> bool {
    if run < 2 {
        return false;
    }
    let mut prev = None;
    let mut len = 0;
    for c in text.chars() {
        if Some(c) == prev && !c.is_whitespace() {
            len += 1;
            if len >= run {
                return true;
            }
        } else {
            prev = Some(c);
            len = 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RiskTier;
    use chrono::TimeZone;

    /// 2024-01-01 注册的账号
    const ANCHORED_ID: i64 = 4_000_000_000;

    fn at(day_offset: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_704_067_200 + day_offset * 86_400, 0).unwrap()
    }

    fn complete_profile() -> ProfileSignals {
        ProfileSignals {
            subject_id: ANCHORED_ID,
            first_name: Some("Anna".into()),
            username: Some("anna".into()),
            ..Default::default()
        }
    }

    fn gate(policy: ScoringPolicy) -> RiskGate {
        let mut model = RiskModel::builtin().unwrap();
        model.policy = policy;
        RiskGate::new(model).unwrap()
    }

    #[test]
    fn test_builtin_model_parses() {
        let gate = RiskGate::with_builtin_model().unwrap();
        assert_eq!(gate.model().tiers.high, 80);
        assert_eq!(gate.model().categories.len(), 4);
    }

    #[test]
    fn test_age_only_policy() {
        let gate = gate(ScoringPolicy::AgeOnly);
        let profile = ProfileSignals::bare(ANCHORED_ID);

        for day in [0, 15, 30] {
            let a = gate.assess(&profile, at(day));
            assert_eq!(a.score, 100, "day {}", day);
            assert_eq!(a.tier, RiskTier::High);
        }
        let older = gate.assess(&profile, at(31));
        assert_eq!(older.score, 0);
        assert_eq!(older.tier, RiskTier::Pass);
    }

    #[test]
    fn test_composite_grades_age() {
        let gate = gate(ScoringPolicy::Composite);
        let profile = complete_profile();
        assert_eq!(gate.assess(&profile, at(0)).score, 90);
        assert_eq!(gate.assess(&profile, at(3)).score, 80);
        assert_eq!(gate.assess(&profile, at(20)).score, 60);
        assert_eq!(gate.assess(&profile, at(100)).score, 30);
        assert_eq!(gate.assess(&profile, at(400)).score, 0);
    }

    #[test]
    fn test_composite_text_and_completeness() {
        let gate = gate(ScoringPolicy::Composite);
        let mut profile = ProfileSignals::bare(ANCHORED_ID);
        profile.bio = Some("Easy money, dm me".into());

        let a = gate.assess(&profile, at(400));
        let tags = a.factor_tags();
        assert!(tags.contains(&"financial_fraud"));
        assert!(tags.contains(&"generic_suspicious"));
        assert!(tags.contains(&"missing_username"));
        assert!(tags.contains(&"missing_first_name"));
        assert_eq!(a.score, 30 + 20 + 15 + 20);
        assert_eq!(a.tier, RiskTier::High);
    }

    #[test]
    fn test_repeated_chars_and_premium_floor() {
        let gate = gate(ScoringPolicy::Composite);
        let mut profile = complete_profile();
        profile.first_name = Some("Aaaaaa".into());
        let a = gate.assess(&profile, at(400));
        assert_eq!(a.score, 20);

        profile.first_name = Some("Anna".into());
        profile.is_premium = true;
        assert_eq!(gate.assess(&profile, at(400)).score, 0);

        let mut young = complete_profile();
        young.is_premium = true;
        assert_eq!(gate.assess(&young, at(100)).score, 25);
    }

    #[test]
    fn test_bot_short_circuits_and_is_deterministic() {
        let gate = gate(ScoringPolicy::Composite);
        let mut profile = complete_profile();
        profile.is_bot = true;
        let a = gate.assess(&profile, at(400));
        assert_eq!(a.score, 100);
        assert_eq!(a.factor_tags(), vec!["automated_account"]);

        let p = complete_profile();
        assert_eq!(gate.assess(&p, at(10)), gate.assess(&p, at(10)));
    }

    #[test]
    fn test_obfuscated_name_and_username_are_matched() {
        let gate = gate(ScoringPolicy::Composite);
        let mut profile = complete_profile();
        profile.first_name = Some("Э.с.k.о.р.т".into());
        let a = gate.assess(&profile, at(400));
        assert_eq!(a.factor_tags(), vec!["adult_services"]);
        assert_eq!(a.score, 40);

        let mut profile = complete_profile();
        profile.username = Some("lsd_shop".into());
        assert!(gate
            .assess(&profile, at(400))
            .factor_tags()
            .contains(&"prohibited_goods"));
    }

    #[test]
    fn test_all_fresh_photos_score_full() {
        let gate = gate(ScoringPolicy::AgeOnly);
        let mut profile = complete_profile();
        profile.photo_dates = vec![at(390), at(395)];
        let a = gate.assess(&profile, at(400));
        assert_eq!(a.score, 100);
        assert_eq!(a.factor_tags(), vec!["fresh_photos"]);

        // 只要有一张旧头像就不算
        profile.photo_dates.push(at(100));
        assert_eq!(gate.assess(&profile, at(400)).score, 0);

        profile.photo_dates.clear();
        assert_eq!(gate.assess(&profile, at(400)).score, 0);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut model = RiskModel::builtin().unwrap();
        model.categories[0].patterns.push("(unclosed".into());
        assert!(RiskGate::new(model).is_err());
    }
}
