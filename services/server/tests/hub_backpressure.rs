//! Hub contract: multi-device fan-out, presence, and the slow-consumer
//! eviction path.

mod common;

use axum::extract::ws::Message;
use chat_protocol::ServerEvent;
use common::{attach, attach_with_capacity, env};

fn frame(n: usize) -> Message {
    Message::Text(format!(
        r#"{{"type":"typing","from":"00000000-0000-0000-0000-{n:012}"}}"#
    ))
}

#[tokio::test]
async fn send_to_user_reaches_every_connection() {
    let env = env();
    let user = env.repo.add_user("ada", None);
    let mut first = attach(&env.state, user).await;
    let mut second = attach(&env.state, user).await;
    let mut third = attach(&env.state, user).await;

    assert!(env.state.hub.send_to_user(user, &frame(1)).await);

    for conn in [&mut first, &mut second, &mut third] {
        assert!(matches!(conn.next_event().await, ServerEvent::Typing(_)));
    }
}

#[tokio::test]
async fn send_to_missing_user_reports_undelivered() {
    let env = env();
    let user = env.repo.add_user("ada", None);
    assert!(!env.state.hub.send_to_user(user, &frame(1)).await);
}

#[tokio::test]
async fn presence_follows_last_connection_out() {
    let env = env();
    let user = env.repo.add_user("ada", None);

    assert!(!env.state.hub.is_online(user).await);
    let first = attach(&env.state, user).await;
    let second = attach(&env.state, user).await;
    assert!(env.state.hub.is_online(user).await);
    assert_eq!(env.state.hub.active_connection_count().await, 2);

    env.state.hub.unregister(user, first.conn_id).await;
    assert!(env.state.hub.is_online(user).await);
    assert!(env.repo.user(user).unwrap().last_seen.is_none());

    env.state.hub.unregister(user, second.conn_id).await;
    assert!(!env.state.hub.is_online(user).await);
    assert_eq!(env.state.hub.active_connection_count().await, 0);
    // last one out stamps last_seen
    assert!(env.repo.user(user).unwrap().last_seen.is_some());

    // idempotent
    env.state.hub.unregister(user, second.conn_id).await;
    assert!(!env.state.hub.is_online(user).await);
}

#[tokio::test]
async fn slow_consumer_is_evicted_while_healthy_peers_get_everything() {
    let env = env();
    let user = env.repo.add_user("ada", None);
    // The slow connection never drains; 256 frames fill it, the 257th evicts.
    let slow = attach_with_capacity(&env.state, user, 256).await;
    let mut healthy = attach_with_capacity(&env.state, user, 512).await;

    for n in 0..300 {
        env.state.hub.send_to_user(user, &frame(n)).await;
    }

    assert!(slow.closed(), "slow consumer should receive the close signal");
    assert_eq!(env.state.hub.active_connection_count().await, 1);
    assert_eq!(env.state.metrics.snapshot().slow_evictions, 1);

    // The healthy connection saw all 300 frames, in order.
    let mut seen = 0;
    let mut healthy_frames = Vec::new();
    while let Ok(f) = healthy.frames.try_recv() {
        healthy_frames.push(f);
        seen += 1;
    }
    assert_eq!(seen, 300);
    for (n, f) in healthy_frames.iter().enumerate() {
        assert_eq!(f, &frame(n), "frames must arrive in FIFO order");
    }
}

#[tokio::test]
async fn eviction_of_the_only_connection_flips_presence() {
    let env = env();
    let user = env.repo.add_user("ada", None);
    let slow = attach_with_capacity(&env.state, user, 1).await;

    env.state.hub.send_to_user(user, &frame(0)).await;
    assert!(!slow.closed());
    env.state.hub.send_to_user(user, &frame(1)).await;

    assert!(slow.closed());
    assert!(!env.state.hub.is_online(user).await);
    assert!(env.repo.user(user).unwrap().last_seen.is_some());
}

#[tokio::test]
async fn group_fanout_excludes_one_user_and_counts_reached_users() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let c = env.repo.add_user("c", None);
    let offline = env.repo.add_user("offline", None);
    let group = env.repo.add_group(&[a, b, c, offline]);

    let mut conn_a = attach(&env.state, a).await;
    let mut conn_b = attach(&env.state, b).await;
    let mut conn_c1 = attach(&env.state, c).await;
    let mut conn_c2 = attach(&env.state, c).await;

    let reached = env
        .state
        .hub
        .send_to_group(group, Some(a), &frame(7))
        .await
        .expect("membership resolves");

    // b and c reached (c on both devices); a excluded; offline not counted.
    assert_eq!(reached, 2);
    assert!(conn_a.drain().is_empty());
    assert_eq!(conn_b.drain().len(), 1);
    assert_eq!(conn_c1.drain().len(), 1);
    assert_eq!(conn_c2.drain().len(), 1);

    let missing = env
        .state
        .hub
        .offline_group_members(group, Some(a))
        .await
        .unwrap();
    assert_eq!(missing, vec![offline]);
}

#[tokio::test]
async fn shutdown_signals_every_connection() {
    let env = env();
    let a = env.repo.add_user("a", None);
    let b = env.repo.add_user("b", None);
    let conn_a = attach(&env.state, a).await;
    let conn_b = attach(&env.state, b).await;

    let hub = env.state.hub.clone();
    let shutdown = tokio::spawn(async move {
        hub.shutdown(std::time::Duration::from_millis(300)).await;
    });

    // Both close signals fire; the registrations linger (no write pump is
    // running to deregister), so shutdown returns when the window elapses.
    shutdown.await.expect("shutdown task");
    assert!(conn_a.closed());
    assert!(conn_b.closed());
}
