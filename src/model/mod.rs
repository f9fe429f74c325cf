//! 数据模型模块
//!
//! 只有值对象，没有对象图；调用方传入显式 ID，拿回值。

pub mod challenge;
pub mod decision;
pub mod event;
pub mod membership;
pub mod profile;
pub mod punishment;
pub mod risk;
pub mod room_config;

pub use challenge::{ChallengePayload, ChallengeSession, ChallengeState, EntryPoint};
pub use decision::{AdmissionDecision, Sanction};
pub use event::{InboundEvent, ManualAction, RawEvent};
pub use membership::{
    ArrivalChannel, JoinKind, MemberStatus, MembershipEvent, MessageId, RoomId, UpdateId, UserId,
};
pub use profile::ProfileSignals;
pub use punishment::{NewPunishment, PunishmentKind, PunishmentRecord, RestrictReason};
pub use risk::{RiskAssessment, RiskFactor, RiskTier, RiskTiers};
pub use room_config::{
    AbuseRule, DeliverySurface, EntryPointPolicy, ExhaustionPolicy, FloodAction, MassJoinRule,
    RoomConfig, RoomPolicy, RoomSettings,
};
