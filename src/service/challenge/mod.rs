// 入群验证：题目生成 + 验证状态机

pub mod generator;
pub mod orchestrator;

pub use generator::{ChallengeGenerator, FixedChallengeGenerator, TextChallengeGenerator};
pub use orchestrator::{
    AnswerOutcome, ChallengeOrchestrator, ChallengeTimings, ExitOutcome, IssueOutcome,
    IssueRequest,
};
