//! 分发前的有序守卫
//!
//! 每个守卫只看解码后的事件，返回继续或跳过；第一个跳过即终止。

use crate::model::{InboundEvent, UserId};

/// 守卫结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Skip(&'static str),
}

/// 事件守卫
pub trait EventGuard: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, event: &InboundEvent) -> Verdict;
}

/// 跳过与服务自身账号有关的事件（机器人入群、退群等）
pub struct OwnAccountGuard {
    service_account: UserId,
}

impl OwnAccountGuard {
    pub fn new(service_account: UserId) -> Self {
        Self { service_account }
    }
}

impl EventGuard for OwnAccountGuard {
    fn name(&self) -> &'static str {
        "own_account"
    }

    fn check(&self, event: &InboundEvent) -> Verdict {
        if event.subject_id() == self.service_account {
            Verdict::Skip("service_account_subject")
        } else {
            Verdict::Continue
        }
    }
}

/// 跳过状态没有变化的成员事件（例如管理员改头衔）
pub struct UnchangedStatusGuard;

impl EventGuard for UnchangedStatusGuard {
    fn name(&self) -> &'static str {
        "unchanged_status"
    }

    fn check(&self, event: &InboundEvent) -> Verdict {
        match event {
            InboundEvent::Membership { event, .. } if event.old_status == event.new_status => {
                Verdict::Skip("status_unchanged")
            }
            _ => Verdict::Continue,
        }
    }
}

/// 跳过服务自身账号提交的答案（机器人自己发出的按钮回调回显）
pub struct OwnAnswerGuard {
    service_account: UserId,
}

impl OwnAnswerGuard {
    pub fn new(service_account: UserId) -> Self {
        Self { service_account }
    }
}

impl EventGuard for OwnAnswerGuard {
    fn name(&self) -> &'static str {
        "own_answer"
    }

    fn check(&self, event: &InboundEvent) -> Verdict {
        match event {
            InboundEvent::ChallengeAnswer { submitter_id, .. }
                if *submitter_id == self.service_account =>
            {
                Verdict::Skip("answer_from_service_account")
            }
            _ => Verdict::Continue,
        }
    }
}

/// 默认守卫链
pub fn default_guards(service_account: UserId) -> Vec<Box<dyn EventGuard>> {
    vec![
        Box::new(OwnAccountGuard::new(service_account)),
        Box::new(UnchangedStatusGuard),
        Box::new(OwnAnswerGuard::new(service_account)),
    ]
}

/// 依次执行守卫，返回第一个跳过原因
pub fn evaluate(guards: &[Box<dyn EventGuard>], event: &InboundEvent) -> Verdict {
    for guard in guards {
        if let Verdict::Skip(reason) = guard.check(event) {
            tracing::debug!(guard = guard.name(), reason, "⏭ 事件被守卫跳过");
            return Verdict::Skip(reason);
        }
    }
    Verdict::Continue
}
