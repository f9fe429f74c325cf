//! 入群验证全流程：装配好的分发器 + 内存存储 + 空跑平台

mod common;

use std::time::Duration;

use common::{automated, join_request_challenge, regular, self_join_challenge, Harness, ANSWER, BOT};
use privchat_gatekeeper::{
    model::{
        AdmissionDecision, NewPunishment, PunishmentKind, RestrictReason, RoomSettings,
    },
    platform::PlatformCommand,
    repository::PunishmentRepository,
    DispatchOutcome,
};

const ROOM: i64 = -100_001;
const ALICE: i64 = 10_001;
const MALLORY: i64 = 10_002;

fn decided(outcome: DispatchOutcome) -> AdmissionDecision {
    match outcome {
        DispatchOutcome::Decided(decision) => decision,
        other => panic!("expected a decision, got {:?}", other),
    }
}

#[tokio::test]
async fn test_self_join_challenge_solved_lifts_restriction() {
    let mut h = Harness::new();
    h.rooms.put(ROOM, self_join_challenge());

    let outcome = h.dispatcher.dispatch(h.join(ROOM, regular(ALICE))).await.unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Challenge);
    assert_eq!(
        h.ops("restrict_member"),
        vec![PlatformCommand::RestrictMember {
            room_id: ROOM,
            user_id: ALICE,
            until: None,
        }]
    );
    assert_eq!(h.ops("send_message").len(), 1);

    // 答错一次：换题，次数未用完
    let outcome = h.dispatcher.dispatch(h.answer(ROOM, ALICE, "7")).await.unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Challenge);
    assert_eq!(h.ops("send_message").len(), 2);

    let outcome = h.dispatcher.dispatch(h.answer(ROOM, ALICE, ANSWER)).await.unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Allow);
    assert_eq!(
        h.ops("lift_restriction"),
        vec![PlatformCommand::LiftRestriction {
            room_id: ROOM,
            user_id: ALICE,
        }]
    );
    // 题目和换题消息都被清理
    assert_eq!(h.ops("delete_message").len(), 2);

    let names = h.audit_names();
    for expected in ["challenge_issued", "challenge_reissued", "challenge_solved"] {
        assert!(names.contains(&expected), "missing {} in {:?}", expected, names);
    }
}

#[tokio::test]
async fn test_verified_member_is_not_challenged_until_they_leave() {
    let h = Harness::new();
    h.rooms.put(ROOM, self_join_challenge());

    h.dispatcher.dispatch(h.join(ROOM, regular(ALICE))).await.unwrap();
    h.dispatcher.dispatch(h.answer(ROOM, ALICE, ANSWER)).await.unwrap();

    // 已验证：再次到达直接放行
    let outcome = h.dispatcher.dispatch(h.join(ROOM, regular(ALICE))).await.unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Allow);
    assert_eq!(h.ops("restrict_member").len(), 1);

    // 离群清除已验证标记，重新加入要重新验证
    let outcome = h.dispatcher.dispatch(h.leave(ROOM, ALICE)).await.unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Allow);

    let outcome = h.dispatcher.dispatch(h.join(ROOM, regular(ALICE))).await.unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Challenge);
    assert_eq!(h.ops("restrict_member").len(), 2);
}

#[tokio::test]
async fn test_leaving_mid_challenge_destroys_session() {
    let h = Harness::new();
    h.rooms.put(ROOM, self_join_challenge());

    h.dispatcher.dispatch(h.join(ROOM, regular(ALICE))).await.unwrap();
    h.dispatcher.dispatch(h.leave(ROOM, ALICE)).await.unwrap();
    assert_eq!(h.ops("delete_message").len(), 1);

    // 会话已销毁，迟到的答案不会放行
    let outcome = h.dispatcher.dispatch(h.answer(ROOM, ALICE, ANSWER)).await.unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Allow);
    assert!(h.ops("lift_restriction").is_empty());
}

#[tokio::test]
async fn test_exhausted_attempts_remove_member() {
    let mut h = Harness::new();
    h.rooms.put(ROOM, self_join_challenge());

    h.dispatcher.dispatch(h.join(ROOM, regular(ALICE))).await.unwrap();
    for _ in 0..2 {
        let outcome = h.dispatcher.dispatch(h.answer(ROOM, ALICE, "wrong")).await.unwrap();
        assert_eq!(decided(outcome), AdmissionDecision::Challenge);
    }
    let outcome = h.dispatcher.dispatch(h.answer(ROOM, ALICE, "wrong")).await.unwrap();
    assert_eq!(
        decided(outcome),
        AdmissionDecision::Restrict(RestrictReason::ChallengeFailed)
    );
    assert_eq!(
        h.ops("remove_member"),
        vec![PlatformCommand::RemoveMember {
            room_id: ROOM,
            user_id: ALICE,
        }]
    );
    assert!(h.ops("lift_restriction").is_empty());
    assert!(h.audit_names().contains(&"challenge_failed"));

    // 会话已结束，之后的正确答案无效
    let outcome = h.dispatcher.dispatch(h.answer(ROOM, ALICE, ANSWER)).await.unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Allow);
    assert!(h.ops("lift_restriction").is_empty());
}

#[tokio::test]
async fn test_answer_from_someone_else_is_ignored() {
    let h = Harness::new();
    h.rooms.put(ROOM, self_join_challenge());

    h.dispatcher.dispatch(h.join(ROOM, regular(ALICE))).await.unwrap();
    let outcome = h
        .dispatcher
        .dispatch(h.answer_from(ROOM, ALICE, MALLORY, ANSWER))
        .await
        .unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Allow);
    assert!(h.ops("lift_restriction").is_empty());

    let outcome = h.dispatcher.dispatch(h.answer(ROOM, ALICE, ANSWER)).await.unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Allow);
    assert_eq!(h.ops("lift_restriction").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_challenge_times_out() {
    let mut h = Harness::new();
    h.rooms.put(ROOM, self_join_challenge());

    h.dispatcher.dispatch(h.join(ROOM, regular(ALICE))).await.unwrap();

    tokio::time::sleep(Duration::from_secs(301)).await;
    tokio::task::yield_now().await;

    // 出题 + 两次提醒
    assert_eq!(h.ops("send_message").len(), 3);
    assert_eq!(h.ops("remove_member").len(), 1);
    assert!(h.audit_names().contains(&"challenge_expired"));

    let outcome = h.dispatcher.dispatch(h.answer(ROOM, ALICE, ANSWER)).await.unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Allow);
    assert!(h.ops("lift_restriction").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_arrivals_issue_one_challenge() {
    let h = Harness::new();
    h.rooms.put(ROOM, self_join_challenge());

    let (first, second) = tokio::join!(
        h.dispatcher.dispatch(h.join(ROOM, regular(ALICE))),
        h.dispatcher.dispatch(h.join(ROOM, regular(ALICE))),
    );
    assert_eq!(decided(first.unwrap()), AdmissionDecision::Challenge);
    assert_eq!(decided(second.unwrap()), AdmissionDecision::Challenge);
    assert_eq!(h.ops("restrict_member").len(), 1);
    assert_eq!(h.ops("send_message").len(), 1);
}

#[tokio::test]
async fn test_duplicate_update_is_dropped() {
    let h = Harness::new();
    h.rooms.put(ROOM, self_join_challenge());

    let event = h.join(ROOM, regular(ALICE));
    let first = h.dispatcher.dispatch(event.clone()).await.unwrap();
    assert_eq!(decided(first), AdmissionDecision::Challenge);
    assert_eq!(
        h.dispatcher.dispatch(event).await.unwrap(),
        DispatchOutcome::Duplicate
    );
    assert_eq!(h.ops("restrict_member").len(), 1);
}

#[tokio::test]
async fn test_service_account_events_are_skipped() {
    let h = Harness::new();
    h.rooms.put(ROOM, self_join_challenge());

    let outcome = h.dispatcher.dispatch(h.join(ROOM, regular(BOT))).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Skipped("service_account_subject"));
    assert!(h.platform.commands().is_empty());
}

#[tokio::test]
async fn test_unconfigured_room_allows_everything() {
    let h = Harness::new();

    let outcome = h.dispatcher.dispatch(h.join(ROOM, automated(ALICE))).await.unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Allow);
    assert!(h.platform.commands().is_empty());
}

#[tokio::test]
async fn test_automated_profile_restricted_by_risk_gate() {
    let mut h = Harness::new();
    let mut settings = RoomSettings::default();
    settings.risk_gate.enabled = Some(true);
    h.rooms.put(ROOM, settings);

    let outcome = h.dispatcher.dispatch(h.join(ROOM, automated(ALICE))).await.unwrap();
    assert_eq!(
        decided(outcome),
        AdmissionDecision::Restrict(RestrictReason::RiskGate)
    );
    assert_eq!(
        h.ops("restrict_member"),
        vec![PlatformCommand::RestrictMember {
            room_id: ROOM,
            user_id: ALICE,
            until: None,
        }]
    );
    assert!(h.audit_names().contains(&"subject_restricted"));

    let outcome = h.dispatcher.dispatch(h.join(ROOM, regular(MALLORY))).await.unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Allow);
    assert_eq!(h.ops("restrict_member").len(), 1);
}

#[tokio::test]
async fn test_registry_hit_bans_and_records_room() {
    let h = Harness::new();
    h.rooms.put(ROOM, RoomSettings::default());
    let record = h
        .punishments
        .create(&NewPunishment {
            subject_id: MALLORY,
            origin_room_id: -200_000,
            kind: PunishmentKind::PermanentBan,
            issuer_id: 50,
            reason: RestrictReason::Manual,
            expires_at: None,
        })
        .await
        .unwrap();

    let outcome = h.dispatcher.dispatch(h.join(ROOM, regular(MALLORY))).await.unwrap();
    assert_eq!(
        decided(outcome),
        AdmissionDecision::Restrict(RestrictReason::Registry)
    );
    assert_eq!(
        h.ops("ban_member"),
        vec![PlatformCommand::BanMember {
            room_id: ROOM,
            user_id: MALLORY,
            until: None,
        }]
    );

    let stored = h.punishments.all();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, record.id);
    assert!(stored[0].propagated_rooms.contains(&ROOM));
}

#[tokio::test]
async fn test_registry_checked_after_challenge_is_solved() {
    let h = Harness::new();
    h.rooms.put(ROOM, self_join_challenge());

    h.dispatcher.dispatch(h.join(ROOM, regular(MALLORY))).await.unwrap();

    // 作答期间在别的群被登记封禁
    h.punishments
        .create(&NewPunishment {
            subject_id: MALLORY,
            origin_room_id: -200_000,
            kind: PunishmentKind::PermanentBan,
            issuer_id: 50,
            reason: RestrictReason::Manual,
            expires_at: None,
        })
        .await
        .unwrap();

    let outcome = h.dispatcher.dispatch(h.answer(ROOM, MALLORY, ANSWER)).await.unwrap();
    assert_eq!(
        decided(outcome),
        AdmissionDecision::Restrict(RestrictReason::Registry)
    );
    assert!(h.ops("lift_restriction").is_empty());
    assert_eq!(h.ops("ban_member").len(), 1);
}

#[tokio::test]
async fn test_join_request_challenge_approves_on_solve() {
    let h = Harness::new();
    h.rooms.put(ROOM, join_request_challenge());

    let outcome = h
        .dispatcher
        .dispatch(h.join_request(ROOM, regular(ALICE)))
        .await
        .unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Challenge);
    // 申请阶段不在群内：私聊出题，不限制
    assert!(h.ops("restrict_member").is_empty());
    match h.ops("send_message").as_slice() {
        [PlatformCommand::SendMessage { chat_id, .. }] => assert_eq!(*chat_id, ALICE),
        other => panic!("unexpected commands: {:?}", other),
    }

    let outcome = h.dispatcher.dispatch(h.answer(ROOM, ALICE, ANSWER)).await.unwrap();
    assert_eq!(decided(outcome), AdmissionDecision::Allow);
    assert_eq!(
        h.ops("approve_join_request"),
        vec![PlatformCommand::ApproveJoinRequest {
            room_id: ROOM,
            user_id: ALICE,
        }]
    );
    assert!(h.ops("lift_restriction").is_empty());
}

#[tokio::test]
async fn test_join_request_from_registered_subject_is_declined() {
    let h = Harness::new();
    h.rooms.put(ROOM, RoomSettings::default());
    h.punishments
        .create(&NewPunishment {
            subject_id: MALLORY,
            origin_room_id: -200_000,
            kind: PunishmentKind::PermanentBan,
            issuer_id: 50,
            reason: RestrictReason::Manual,
            expires_at: None,
        })
        .await
        .unwrap();

    let outcome = h
        .dispatcher
        .dispatch(h.join_request(ROOM, regular(MALLORY)))
        .await
        .unwrap();
    assert_eq!(
        decided(outcome),
        AdmissionDecision::Restrict(RestrictReason::Registry)
    );
    assert_eq!(
        h.ops("decline_join_request"),
        vec![PlatformCommand::DeclineJoinRequest {
            room_id: ROOM,
            user_id: MALLORY,
        }]
    );
    assert!(h.ops("ban_member").is_empty());
}
