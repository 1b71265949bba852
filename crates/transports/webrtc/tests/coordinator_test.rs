//! Coordinator integration tests
//!
//! Drive the dispatcher, registries and relay through the fake engine the
//! way a teacher and several students would.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p audiolms-webrtc --test coordinator_test
//! ```

mod harness;

use audiolms_webrtc::signaling::{LeaveRequest, SessionDescription, SessionRequest};
use audiolms_webrtc::{
    ClientMessage, HandleEvent, IceCandidate, IceConfig, LiveConfig, MediaAttachment,
    NegotiationState, ServerMessage, TransportState,
};
use harness::{opus_track, rtp, settle, LiveHarness, OFFER_SDP};
use std::sync::Arc;
use std::time::Duration;

fn offer() -> ClientMessage {
    ClientMessage::Offer(SessionDescription::offer(OFFER_SDP))
}

fn start(session_id: &str) -> ClientMessage {
    ClientMessage::StartLiveSession(SessionRequest {
        session_id: session_id.to_string(),
        role: Some("teacher".to_string()),
    })
}

fn join(session_id: &str) -> ClientMessage {
    ClientMessage::JoinLiveSession(SessionRequest {
        session_id: session_id.to_string(),
        role: Some("student".to_string()),
    })
}

fn joined(session_id: &str, teacher_id: &str) -> ServerMessage {
    ServerMessage::LiveSessionJoined {
        session_id: session_id.to_string(),
        teacher_id: teacher_id.to_string(),
    }
}

// ============================================================================
// Registry properties
// ============================================================================

#[tokio::test]
async fn test_ensure_twice_yields_one_handle() {
    let harness = LiveHarness::new();
    let registry = harness.dispatcher.connections();
    let ice = IceConfig::default();

    let a = registry.ensure("t1", &ice).await.unwrap();
    let b = registry.ensure("t1", &ice).await.unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(harness.engine.created(), 1);
    assert_eq!(harness.handle("t1").ice, ice);
}

#[tokio::test]
async fn test_concurrent_ensure_keeps_one_handle() {
    let harness = LiveHarness::new();
    let registry = Arc::clone(harness.dispatcher.connections());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            registry.ensure("t1", &IceConfig::default()).await.unwrap()
        }));
    }

    let mut connections = Vec::new();
    for task in tasks {
        connections.push(task.await.unwrap());
    }

    assert!(connections.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(registry.connection_count().await, 1);
    assert!(!connections[0].is_closed());
}

#[tokio::test]
async fn test_first_activation_wins() {
    let harness = LiveHarness::new();
    let sessions = harness.dispatcher.sessions();

    sessions.activate("class101", "t1");
    sessions.activate("class101", "t2");

    assert_eq!(sessions.get_publisher("class101").as_deref(), Some("t1"));
}

#[tokio::test]
async fn test_track_absent_until_published() {
    let harness = LiveHarness::new();
    let sessions = harness.dispatcher.sessions();
    sessions.activate("class101", "t1");

    assert!(sessions.get_published_track("t1").is_none());

    let track_a = opus_track("t1");
    sessions.set_published_track("t1", track_a.clone());
    assert!(sessions.get_published_track("t1").unwrap().same_source(&track_a));
}

#[tokio::test]
async fn test_remove_publisher_ends_session() {
    let harness = LiveHarness::new();
    let mut t1 = harness.connect("t1").await;

    harness.send(&t1, start("class101")).await;
    assert!(matches!(t1.next().await, ServerMessage::LiveSessionStarted { .. }));

    harness.dispatcher.connections().remove("t1").await;

    assert!(harness.dispatcher.sessions().get_publisher("class101").is_none());
    assert_eq!(harness.handle("t1").close_calls(), 1);

    // A fresh activation is needed to bring the id back.
    let mut t2 = harness.connect("t2").await;
    harness.send(&t2, start("class101")).await;
    assert!(matches!(t2.next().await, ServerMessage::LiveSessionStarted { .. }));
    assert_eq!(
        harness.dispatcher.sessions().get_publisher("class101").as_deref(),
        Some("t2")
    );
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let harness = LiveHarness::new();
    harness.connect("t1").await;

    let registry = Arc::clone(harness.dispatcher.connections());
    let (a, b) = tokio::join!(registry.remove("t1"), registry.remove("t1"));

    assert!(a ^ b);
    assert_eq!(harness.handle("t1").close_calls(), 1);
    harness.dispatcher.disconnect("t1").await;
    assert_eq!(harness.handle("t1").close_calls(), 1);
}

// ============================================================================
// Join flow
// ============================================================================

#[tokio::test]
async fn test_join_before_track_succeeds_without_media() {
    let harness = LiveHarness::new();
    let mut t1 = harness.connect("t1").await;
    let mut s1 = harness.connect("s1").await;

    harness.send(&t1, start("class101")).await;
    t1.next().await;

    harness.send(&s1, join("class101")).await;

    assert_eq!(s1.next().await, joined("class101", "t1"));
    assert_eq!(harness.handle("s1").relay_count(), 0);
    assert!(s1.try_next().is_none());

    // No retroactive attach when the track shows up later.
    harness.send(&t1, offer()).await;
    t1.next().await;
    harness
        .engine
        .emit("t1", HandleEvent::Track(opus_track("t1")))
        .await;
    settle().await;
    assert_eq!(harness.handle("s1").relay_count(), 0);
}

#[tokio::test]
async fn test_join_outcome_reports_attachment() {
    let harness = LiveHarness::new();
    harness.connect("t1").await;
    harness.connect("s1").await;
    let sessions = harness.dispatcher.sessions();
    sessions.activate("class101", "t1");

    let relay = audiolms_webrtc::RelayCoordinator::new(
        Arc::clone(sessions),
        Arc::clone(harness.dispatcher.connections()),
    );

    let outcome = relay.join("class101", "s1").await.unwrap();
    assert_eq!(outcome.media, MediaAttachment::Unavailable);

    sessions.set_published_track("t1", opus_track("t1"));
    let outcome = relay.join("class101", "s1").await.unwrap();
    assert_eq!(outcome.publisher_id, "t1");
    assert_eq!(outcome.media, MediaAttachment::Attached);
}

#[tokio::test]
async fn test_independent_subscriptions_survive_removal() {
    let harness = LiveHarness::new();
    let mut t1 = harness.connect("t1").await;
    let mut s1 = harness.connect("s1").await;
    let mut s2 = harness.connect("s2").await;

    harness.send(&t1, start("class101")).await;
    harness.send(&t1, offer()).await;
    t1.next().await;
    t1.next().await;

    let track = opus_track("t1");
    harness
        .engine
        .emit("t1", HandleEvent::Track(track.clone()))
        .await;
    settle().await;

    harness.send(&s1, join("class101")).await;
    harness.send(&s2, join("class101")).await;
    assert_eq!(s1.next().await, joined("class101", "t1"));
    assert_eq!(s2.next().await, joined("class101", "t1"));
    assert_eq!(track.subscriber_count(), 2);

    track.publish(rtp(1));
    settle().await;

    harness.dispatcher.disconnect("s1").await;
    settle().await;
    assert_eq!(track.subscriber_count(), 1);

    track.publish(rtp(2));
    settle().await;

    let s1_seen: Vec<u16> = harness
        .handle("s1")
        .received()
        .into_iter()
        .map(|(_, seq)| seq)
        .collect();
    let s2_seen: Vec<u16> = harness
        .handle("s2")
        .received()
        .into_iter()
        .map(|(_, seq)| seq)
        .collect();
    assert_eq!(s1_seen, vec![1]);
    assert_eq!(s2_seen, vec![1, 2]);

    // Publisher untouched.
    let publisher = harness.dispatcher.connections().get("t1").await.unwrap();
    assert!(!publisher.is_closed());
    assert_eq!(
        harness.dispatcher.sessions().get_publisher("class101").as_deref(),
        Some("t1")
    );
}

#[tokio::test]
async fn test_full_scenario() {
    let harness = LiveHarness::new();
    let mut t1 = harness.connect("t1").await;

    harness.send(&t1, start("class101")).await;
    assert_eq!(
        t1.next().await,
        ServerMessage::LiveSessionStarted {
            session_id: "class101".to_string(),
            status: "success".to_string(),
        }
    );

    harness.send(&t1, offer()).await;
    assert!(matches!(t1.next().await, ServerMessage::Answer(_)));
    let teacher = harness.dispatcher.connections().get("t1").await.unwrap();
    assert_eq!(teacher.state(), NegotiationState::Negotiating);

    harness
        .engine
        .emit("t1", HandleEvent::Track(opus_track("t1")))
        .await;
    settle().await;
    assert!(harness
        .dispatcher
        .sessions()
        .get_published_track("t1")
        .is_some());

    let mut s2 = harness.connect("s2").await;
    harness.send(&s2, offer()).await;
    assert!(matches!(s2.next().await, ServerMessage::Answer(_)));

    harness.send(&s2, join("class101")).await;
    assert_eq!(s2.next().await, joined("class101", "t1"));
    assert_eq!(harness.handle("s2").relay_count(), 1);

    // Media was attached after negotiation, so the student gets a server offer.
    assert!(matches!(s2.next().await, ServerMessage::Offer(_)));
    harness
        .send(
            &s2,
            ClientMessage::Answer(SessionDescription::answer("v=0\r\ns=student\r\n")),
        )
        .await;
    assert!(s2.try_next().is_none());

    harness
        .engine
        .emit("s2", HandleEvent::Transport(TransportState::Connected))
        .await;
    settle().await;
    let student = harness.dispatcher.connections().get("s2").await.unwrap();
    assert_eq!(student.state(), NegotiationState::Connected);
}

#[tokio::test]
async fn test_join_before_offer_attaches_without_renegotiation() {
    let harness = LiveHarness::new();
    let mut t1 = harness.connect("t1").await;
    let mut s1 = harness.connect("s1").await;

    harness.send(&t1, offer()).await;
    t1.next().await;
    harness
        .engine
        .emit("t1", HandleEvent::Track(opus_track("t1")))
        .await;
    settle().await;
    harness.send(&t1, start("class101")).await;
    t1.next().await;

    harness.send(&s1, join("class101")).await;
    assert_eq!(s1.next().await, joined("class101", "t1"));
    assert!(s1.try_next().is_none());
    assert_eq!(harness.handle("s1").relay_count(), 1);

    harness.send(&s1, offer()).await;
    assert!(matches!(s1.next().await, ServerMessage::Answer(_)));
    assert_eq!(harness.handle("s1").offers_created(), 0);
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn test_publisher_failure_isolated_from_other_sessions() {
    let harness = LiveHarness::new();
    let mut t1 = harness.connect("t1").await;
    let mut t2 = harness.connect("t2").await;

    harness.send(&t1, start("class101")).await;
    harness.send(&t2, start("class202")).await;
    harness.send(&t1, offer()).await;
    t1.next().await;
    t1.next().await;
    t2.next().await;

    harness
        .engine
        .emit("t1", HandleEvent::Transport(TransportState::Failed))
        .await;
    settle().await;

    let sessions = harness.dispatcher.sessions();
    assert!(sessions.get_publisher("class101").is_none());
    assert_eq!(sessions.get_publisher("class202").as_deref(), Some("t2"));
    assert!(harness.dispatcher.connections().get("t2").await.is_some());

    // Later messages from the failed connection are dropped, not answered.
    harness.send(&t1, offer()).await;
    assert!(t1.try_next().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failure_cleanup_with_full_event_queue() {
    let harness = LiveHarness::with_config(LiveConfig {
        event_buffer: 1,
        ..LiveConfig::default()
    });
    harness.engine.set_latency(Duration::from_millis(50));
    let mut t1 = harness.connect("t1").await;

    harness.send(&t1, start("class101")).await;
    harness.send(&t1, offer()).await;
    t1.next().await;
    t1.next().await;

    harness
        .engine
        .emit("t1", HandleEvent::Transport(TransportState::Failed))
        .await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    // Fills the queue while the handle is still closing.
    harness
        .engine
        .emit(
            "t1",
            HandleEvent::IceCandidate(IceCandidate {
                candidate: "candidate:2 1 udp 1 10.0.0.9 4000 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            }),
        )
        .await;

    let dispatcher = &harness.dispatcher;
    tokio::time::timeout(Duration::from_secs(2), async {
        while dispatcher.connections().get("t1").await.is_some()
            || dispatcher.sessions().get_publisher("class101").is_some()
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("failed connection should be removed with its session");

    assert_eq!(harness.handle("t1").close_calls(), 1);
}

#[tokio::test]
async fn test_leave_session_always_succeeds() {
    let harness = LiveHarness::new();
    let mut s1 = harness.connect("s1").await;

    harness
        .send(
            &s1,
            ClientMessage::LeaveSession(LeaveRequest {
                session_id: "nowhere".to_string(),
            }),
        )
        .await;

    assert_eq!(
        s1.next().await,
        ServerMessage::SessionLeft {
            session_id: "nowhere".to_string(),
            status: "success".to_string(),
        }
    );
}
