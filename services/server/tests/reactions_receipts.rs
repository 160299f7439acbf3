//! Reactions (upsert semantics + broadcasts) and the read cascade.

mod common;

use chat_core::models::MessageStatus;
use chat_core::{ChatError, Repository};
use chat_protocol::{ReactionAction, ServerEvent};
use common::{attach, env};
use server::pipeline::SendInput;

fn text(content: &str) -> SendInput {
    SendInput {
        content: Some(content.to_owned()),
        ..SendInput::default()
    }
}

#[tokio::test]
async fn reacting_twice_replaces_and_broadcasts_the_full_set() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let msg = env.state.pipeline.send_dm(a, b, text("hi")).await.unwrap();

    let mut conn_a = attach(&env.state, a).await;

    env.state.pipeline.react(b, msg.id, "👍").await.unwrap();
    env.state.pipeline.react(b, msg.id, "❤️").await.unwrap();

    let reactions = env.repo.list_reactions(msg.id).await.unwrap();
    assert_eq!(reactions.len(), 1, "upsert replaces, never accumulates");
    assert_eq!(reactions[0].emoji, "❤️");

    let events = conn_a.drain();
    assert_eq!(events.len(), 2, "both participants hear each change");
    match &events[1] {
        ServerEvent::Reaction(broadcast) => {
            assert_eq!(broadcast.action, ReactionAction::Added);
            assert_eq!(broadcast.emoji, "❤️");
            assert_eq!(broadcast.reactions.len(), 1);
        }
        other => panic!("expected reaction frame, got {other:?}"),
    }
}

#[tokio::test]
async fn unreact_round_trip_restores_the_empty_set() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let msg = env.state.pipeline.send_dm(a, b, text("hi")).await.unwrap();

    env.state.pipeline.react(b, msg.id, "👍").await.unwrap();
    env.state.pipeline.unreact(b, msg.id).await.unwrap();

    assert!(env.repo.list_reactions(msg.id).await.unwrap().is_empty());

    // removing again is NotFound — there is nothing left to remove
    assert!(matches!(
        env.state.pipeline.unreact(b, msg.id).await,
        Err(ChatError::NotFound(_))
    ));
}

#[tokio::test]
async fn outsiders_cannot_react() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let outsider = env.repo.add_user("outsider", None);
    let msg = env.state.pipeline.send_dm(a, b, text("hi")).await.unwrap();

    assert!(matches!(
        env.state.pipeline.react(outsider, msg.id, "👍").await,
        Err(ChatError::Forbidden(_))
    ));
    assert!(matches!(
        env.state.pipeline.react(b, msg.id, "  ").await,
        Err(ChatError::BadRequest(_))
    ));
}

#[tokio::test]
async fn group_read_cascade_reaches_sender_and_peers_once() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let c = env.repo.add_user("c", None);
    let group = env.repo.add_group(&[a, b, c]);

    let msg = env.state.pipeline.send_group(a, group, text("m")).await.unwrap();

    let mut conn_a = attach(&env.state, a).await;
    let mut conn_c = attach(&env.state, c).await;

    env.state
        .pipeline
        .mark_read(b, &[msg.id], Some(group))
        .await
        .unwrap();

    // receipt exists exactly once, status advanced
    let receipts = env.repo.list_read_receipts(msg.id).await.unwrap();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].reader_id, b);
    assert_eq!(env.repo.message(msg.id).unwrap().status, MessageStatus::Read);

    for conn in [&mut conn_a, &mut conn_c] {
        match conn.next_event().await {
            ServerEvent::MessagesRead(read) => {
                assert_eq!(read.reader_id, b);
                assert_eq!(read.message_ids, vec![msg.id]);
                assert_eq!(read.group_id, Some(group));
            }
            other => panic!("expected messages_read, got {other:?}"),
        }
    }

    // second mark is a no-op on the receipt row but still broadcasts
    env.state
        .pipeline
        .mark_read(b, &[msg.id], Some(group))
        .await
        .unwrap();
    assert_eq!(env.repo.list_read_receipts(msg.id).await.unwrap().len(), 1);
    assert_eq!(conn_a.drain().len(), 1);
}

#[tokio::test]
async fn dm_read_notifies_the_sender_once_from_any_device() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let msg = env.state.pipeline.send_dm(a, b, text("hi")).await.unwrap();

    let mut conn_a = attach(&env.state, a).await;
    let _b_one = attach(&env.state, b).await;
    let _b_two = attach(&env.state, b).await;

    env.state.pipeline.mark_read(b, &[msg.id], None).await.unwrap();

    assert_eq!(env.repo.message(msg.id).unwrap().status, MessageStatus::Read);
    let events = conn_a.drain();
    assert_eq!(events.len(), 1, "one broadcast regardless of reader devices");
    assert!(matches!(events[0], ServerEvent::MessagesRead(_)));
}

#[tokio::test]
async fn inaccessible_ids_are_skipped_without_receipts() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let outsider = env.repo.add_user("outsider", None);
    let msg = env.state.pipeline.send_dm(a, b, text("hi")).await.unwrap();

    env.state
        .pipeline
        .mark_read(outsider, &[msg.id, uuid::Uuid::new_v4()], None)
        .await
        .unwrap();

    assert!(env.repo.list_read_receipts(msg.id).await.unwrap().is_empty());
    assert_eq!(env.repo.message(msg.id).unwrap().status, MessageStatus::Sent);
}

#[tokio::test]
async fn sender_marking_own_message_does_not_advance_status() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let msg = env.state.pipeline.send_dm(a, b, text("hi")).await.unwrap();

    env.state.pipeline.mark_read(a, &[msg.id], None).await.unwrap();
    assert_eq!(env.repo.message(msg.id).unwrap().status, MessageStatus::Sent);
}
