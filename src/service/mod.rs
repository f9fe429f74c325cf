// 业务服务层模块
//
// 事件分类 → 滥用计数 → 风险评分 / 入群验证 → 裁决 → 处罚执行

pub mod abuse_window;
pub mod account_age;
pub mod admission_service;
pub mod challenge;
pub mod dedup_service;
pub mod event_classifier;
pub mod join_request_tracker;
pub mod remediation_service;
pub mod risk_gate;
pub mod text_normalizer;

pub use abuse_window::{AbuseKind, AbuseMonitor, AbuseWindowTracker, MassJoinOutcome, WindowOutcome};
pub use account_age::AccountAgeEstimator;
pub use admission_service::{AdmissionEngine, AdmissionEngineParts};
pub use challenge::{
    AnswerOutcome, ChallengeGenerator, ChallengeOrchestrator, ChallengeTimings, ExitOutcome,
    FixedChallengeGenerator, IssueOutcome, IssueRequest, TextChallengeGenerator,
};
pub use dedup_service::{Claim, UpdateDedupService};
pub use join_request_tracker::JoinRequestTracker;
pub use remediation_service::{RemediationExecutor, RemediationReport, ReversalReport};
pub use risk_gate::{RiskGate, RiskModel, ScoringPolicy};
