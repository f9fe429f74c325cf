//! 成员变更成因分类（纯函数）

use crate::model::{ArrivalChannel, EntryPoint, JoinKind, MembershipEvent, UserId};

/// 判断一次成员变更的成因
///
/// 规则按顺序匹配：
/// 1. 来自申请通道 → JoinRequest
/// 2. 不是 absent → present → Other
/// 3. 之前有待处理的入群申请 → SelfJoin（管理员批准申请不算邀请，不论批准人是谁）
/// 4. 触发者存在且不是本人 → Invite
/// 5. 其余 → SelfJoin
pub fn classify(event: &MembershipEvent, had_pending_request: bool) -> JoinKind {
    if event.channel == ArrivalChannel::Request {
        return JoinKind::JoinRequest;
    }
    if !event.is_arrival() {
        return JoinKind::Other;
    }
    if had_pending_request {
        return JoinKind::SelfJoin;
    }
    if event.foreign_actor().is_some() {
        return JoinKind::Invite;
    }
    JoinKind::SelfJoin
}

/// 分类结果对应的验证入口
///
/// 有待处理申请且由他人（非服务账号）批准的加入视为手动批准入口。
/// 申请通道上的 absent → present 是申请被批准，按同样规则处理。
pub fn entry_point(
    kind: JoinKind,
    event: &MembershipEvent,
    had_pending_request: bool,
    service_account: UserId,
) -> Option<EntryPoint> {
    match kind {
        JoinKind::JoinRequest if !event.is_arrival() => Some(EntryPoint::JoinRequest),
        JoinKind::Invite => Some(EntryPoint::InvitedJoin),
        JoinKind::JoinRequest | JoinKind::SelfJoin => {
            let pending = had_pending_request || kind == JoinKind::JoinRequest;
            let approved_by_admin = event
                .foreign_actor()
                .is_some_and(|actor| actor != service_account);
            if pending && approved_by_admin {
                Some(EntryPoint::ManualApproval)
            } else {
                Some(EntryPoint::SelfJoin)
            }
        }
        JoinKind::Other => None,
    }
}
