//! Direct-message pipeline: persistence, status transitions, offline push
//! fallback, and the multi-device echo.

mod common;

use chat_core::models::{Conversation, MessageStatus};
use chat_core::{ChatError, Repository};
use chat_protocol::ServerEvent;
use common::{attach, env};
use server::pipeline::SendInput;

fn text(content: &str) -> SendInput {
    SendInput {
        content: Some(content.to_owned()),
        ..SendInput::default()
    }
}

#[tokio::test]
async fn offline_recipient_gets_a_push_and_status_stays_sent() {
    let env = env();
    let a = env.repo.add_user("a", Some("Ada Lovelace"));
    let b = env.repo.add_user("b", None);
    env.repo
        .add_token(b, "fcm-token-1", chat_core::models::Platform::Android);

    let msg = env
        .state
        .pipeline
        .send_dm(a, b, text("hi"))
        .await
        .expect("send should succeed despite offline recipient");

    assert_eq!(msg.status, MessageStatus::Sent);
    assert_eq!(env.repo.message(msg.id).unwrap().status, MessageStatus::Sent);

    let pushes = env.push.take();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].recipient_id, b);
    assert_eq!(pushes[0].title, "Ada Lovelace");
    assert_eq!(pushes[0].body, "hi");
}

#[tokio::test]
async fn online_recipient_gets_the_frame_and_status_advances() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let mut conn_b = attach(&env.state, b).await;

    let msg = env.state.pipeline.send_dm(a, b, text("hi")).await.unwrap();

    assert_eq!(msg.status, MessageStatus::Delivered);
    assert_eq!(
        env.repo.message(msg.id).unwrap().status,
        MessageStatus::Delivered
    );
    assert_eq!(env.push.count(), 0);

    match conn_b.next_event().await {
        ServerEvent::Message(delivery) => {
            assert_eq!(delivery.id, msg.id);
            assert_eq!(delivery.from, a);
            assert_eq!(delivery.to, Some(b));
            assert_eq!(delivery.content.as_deref(), Some("hi"));
        }
        other => panic!("expected message frame, got {other:?}"),
    }
}

#[tokio::test]
async fn media_only_message_pushes_attachment_preview() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let media = uuid::Uuid::new_v4();
    env.repo.approve_media(media);

    let input = SendInput {
        media_id: Some(media),
        ..SendInput::default()
    };
    env.state.pipeline.send_dm(a, b, input).await.unwrap();

    let pushes = env.push.take();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].body, "Sent an attachment");
}

#[tokio::test]
async fn every_recipient_device_receives_and_sender_echo_skips_origin() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let mut a_phone = attach(&env.state, a).await;
    let mut a_laptop = attach(&env.state, a).await;
    let mut b_one = attach(&env.state, b).await;
    let mut b_two = attach(&env.state, b).await;
    let mut b_three = attach(&env.state, b).await;

    let input = SendInput {
        content: Some("hi".to_owned()),
        origin_conn: Some(a_phone.conn_id),
        ..SendInput::default()
    };
    env.state.pipeline.send_dm(a, b, input).await.unwrap();

    for conn in [&mut b_one, &mut b_two, &mut b_three] {
        assert_eq!(conn.drain().len(), 1, "all recipient devices get the frame");
    }
    assert_eq!(a_laptop.drain().len(), 1, "other sender device gets the echo");
    assert!(a_phone.drain().is_empty(), "origin device gets no echo");
}

#[tokio::test]
async fn rejects_self_messages_empty_payloads_and_blocked_pairs() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);

    assert!(matches!(
        env.state.pipeline.send_dm(a, a, text("hi")).await,
        Err(ChatError::BadRequest(_))
    ));
    assert!(matches!(
        env.state.pipeline.send_dm(a, b, SendInput::default()).await,
        Err(ChatError::BadRequest(_))
    ));
    assert!(matches!(
        env.state
            .pipeline
            .send_dm(a, b, text("   "))
            .await,
        Err(ChatError::BadRequest(_))
    ));

    env.repo.add_block(b, a);
    assert!(matches!(
        env.state.pipeline.send_dm(a, b, text("hi")).await,
        Err(ChatError::Blocked)
    ));
    // nothing persisted, nothing pushed
    assert_eq!(env.push.count(), 0);
}

#[tokio::test]
async fn unapproved_media_is_refused() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);

    let input = SendInput {
        media_id: Some(uuid::Uuid::new_v4()),
        ..SendInput::default()
    };
    assert!(matches!(
        env.state.pipeline.send_dm(a, b, input).await,
        Err(ChatError::Forbidden(_))
    ));
}

#[tokio::test]
async fn disappearing_timer_stamps_expiry_at_create_time() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    env.repo.set_disappearing(Conversation::Dm(a, b), 86_400);

    let msg = env.state.pipeline.send_dm(a, b, text("vanishing")).await.unwrap();
    let expires_at = msg.expires_at.expect("expiry should be set");
    assert_eq!((expires_at - msg.created_at).num_seconds(), 86_400);

    // Turning the timer off later does not retro-apply.
    env.repo.set_disappearing(Conversation::Dm(b, a), 0);
    let plain = env.state.pipeline.send_dm(a, b, text("staying")).await.unwrap();
    assert!(plain.expires_at.is_none());
    assert!(env.repo.message(msg.id).unwrap().expires_at.is_some());
}

#[tokio::test]
async fn dm_history_round_trip_excludes_deleted() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);

    let first = env.state.pipeline.send_dm(a, b, text("one")).await.unwrap();
    let second = env.state.pipeline.send_dm(b, a, text("two")).await.unwrap();

    let history = env.state.pipeline.history_dm(b, a, 50).await.unwrap();
    let ids: Vec<_> = history.iter().map(|m| m.id).collect();
    assert!(ids.contains(&first.id));
    assert!(ids.contains(&second.id));

    env.repo
        .soft_delete_message(first.id, chrono::Utc::now())
        .await
        .unwrap();
    let history = env.state.pipeline.history_dm(a, b, 50).await.unwrap();
    assert!(!history.iter().any(|m| m.id == first.id));
}
