use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::membership::UserId;

/// 平台随事件下发的用户资料快照，风险评分的唯一输入
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSignals {
    pub subject_id: UserId,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub language_code: Option<String>,
    /// 各张头像的上传时间，平台拿不到时为空
    #[serde(default)]
    pub photo_dates: Vec<DateTime<Utc>>,
}

impl ProfileSignals {
    /// 只有 ID 的最小快照
    pub fn bare(subject_id: UserId) -> Self {
        Self {
            subject_id,
            ..Default::default()
        }
    }

    /// 参与文本规则匹配的字段（名字、用户名、简介），小写
    ///
    /// 用户名里的下划线当作空格，分词规则才能命中其中的单词。
    pub fn searchable_text(&self) -> String {
        let username = self.username.as_deref().map(|u| u.replace('_', " "));
        [
            self.first_name.as_deref(),
            self.last_name.as_deref(),
            username.as_deref(),
            self.bio.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase()
    }

    /// 名 + 姓
    pub fn display_name(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }

    pub fn has_username(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.trim().is_empty())
    }

    pub fn has_first_name(&self) -> bool {
        self.first_name.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}
