//! Group pipeline: membership gate, per-recipient block filtering, delivery
//! status, and push fan-out to offline members.

mod common;

use chat_core::models::MessageStatus;
use chat_core::ChatError;
use common::{attach, env};
use server::pipeline::SendInput;

fn text(content: &str) -> SendInput {
    SendInput {
        content: Some(content.to_owned()),
        ..SendInput::default()
    }
}

#[tokio::test]
async fn non_members_cannot_send() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let outsider = env.repo.add_user("outsider", None);
    let group = env.repo.add_group(&[a, b]);

    assert!(matches!(
        env.state.pipeline.send_group(outsider, group, text("hi")).await,
        Err(ChatError::Forbidden(_))
    ));
}

#[tokio::test]
async fn member_who_blocked_the_sender_is_skipped_entirely() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let c = env.repo.add_user("c", None);
    let group = env.repo.add_group(&[a, b, c]);
    // C blocked A: no frame, no push, even though C is offline.
    env.repo.add_block(c, a);

    let mut conn_b = attach(&env.state, b).await;

    let msg = env.state.pipeline.send_group(a, group, text("hi")).await.unwrap();

    assert_eq!(msg.status, MessageStatus::Delivered, "B was online");
    assert_eq!(conn_b.drain().len(), 1);
    assert_eq!(env.push.count(), 0, "no push to the blocking member");
}

#[tokio::test]
async fn status_stays_sent_when_every_recipient_is_offline() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let c = env.repo.add_user("c", None);
    let group = env.repo.add_group(&[a, b, c]);

    let msg = env.state.pipeline.send_group(a, group, text("hi")).await.unwrap();

    assert_eq!(msg.status, MessageStatus::Sent);
    let pushes = env.push.take();
    assert_eq!(pushes.len(), 2);
    let mut pushed: Vec<_> = pushes.iter().map(|p| p.recipient_id).collect();
    pushed.sort();
    let mut expected = vec![b, c];
    expected.sort();
    assert_eq!(pushed, expected);
}

#[tokio::test]
async fn one_online_member_marks_delivered_and_offline_members_get_pushes() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let c = env.repo.add_user("c", None);
    let group = env.repo.add_group(&[a, b, c]);
    let mut conn_b = attach(&env.state, b).await;

    let msg = env.state.pipeline.send_group(a, group, text("hi")).await.unwrap();

    assert_eq!(msg.status, MessageStatus::Delivered);
    assert_eq!(conn_b.drain().len(), 1);
    let pushes = env.push.take();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].recipient_id, c);
}

#[tokio::test]
async fn sender_echo_reaches_other_devices_but_not_origin() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let group = env.repo.add_group(&[a, b]);
    let mut a_phone = attach(&env.state, a).await;
    let mut a_laptop = attach(&env.state, a).await;
    let mut conn_b = attach(&env.state, b).await;

    let input = SendInput {
        content: Some("hi".to_owned()),
        origin_conn: Some(a_phone.conn_id),
        ..SendInput::default()
    };
    env.state.pipeline.send_group(a, group, input).await.unwrap();

    assert_eq!(conn_b.drain().len(), 1);
    assert_eq!(a_laptop.drain().len(), 1);
    assert!(a_phone.drain().is_empty());
}

#[tokio::test]
async fn typing_fans_out_to_members_except_the_typist() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let outsider = env.repo.add_user("outsider", None);
    let group = env.repo.add_group(&[a, b]);

    let mut conn_a = attach(&env.state, a).await;
    let mut conn_b = attach(&env.state, b).await;

    env.state
        .pipeline
        .typing(a, None, Some(group))
        .await
        .unwrap();
    assert_eq!(conn_b.drain().len(), 1);
    assert!(conn_a.drain().is_empty(), "the typist hears nothing back");

    // non-members are dropped silently, nothing reaches the group
    env.state
        .pipeline
        .typing(outsider, None, Some(group))
        .await
        .unwrap();
    assert!(conn_a.drain().is_empty());
    assert!(conn_b.drain().is_empty());
}

#[tokio::test]
async fn group_history_requires_membership() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let outsider = env.repo.add_user("outsider", None);
    let group = env.repo.add_group(&[a, b]);

    let msg = env.state.pipeline.send_group(a, group, text("hi")).await.unwrap();

    let history = env.state.pipeline.history_group(b, group, 50).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, msg.id);

    assert!(matches!(
        env.state.pipeline.history_group(outsider, group, 50).await,
        Err(ChatError::Forbidden(_))
    ));
}
