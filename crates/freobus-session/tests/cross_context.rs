//! Session managers in separate contexts coordinating over one channel.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use assert_matches::assert_matches;
use freobus_core::{
    BroadcastTransport, Ed25519MessageVerifier, NonceConfig, Origin, PhysicalClock,
    SessionConfig, SessionRevalidator, TokioClock,
};
use freobus_session::{
    LocalBroadcastHub, MessageType, SessionError, SessionEvent, SessionManager, SessionValidator,
};
use freobus_testkit::{sample_session, test_signer};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const CHANNEL: &str = "freobus_session_channel";
const MINUTE: Duration = Duration::from_secs(60);

async fn authenticated(
    hub: &LocalBroadcastHub,
    origin: &str,
    seed: u8,
    clock: TokioClock,
    config: SessionConfig,
) -> SessionManager {
    let clock: Arc<dyn PhysicalClock> = Arc::new(clock);
    let validator = Arc::new(SessionValidator::new(
        &NonceConfig::default(),
        Arc::new(Ed25519MessageVerifier),
        clock.clone(),
    ));
    SessionManager::authenticated(
        origin,
        Arc::new(hub.open(CHANNEL)),
        Arc::new(test_signer(seed)),
        validator,
    )
    .clock(clock)
    .config(config)
    .build()
    .await
    .unwrap()
}

async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    within: Duration,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(within, async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test(start_paused = true)]
async fn contexts_reconcile_through_signed_broadcasts() {
    let clock = TokioClock::anchored_at(1_700_000_000_000);
    let hub = LocalBroadcastHub::new();
    let session = sample_session(clock.now_ms());

    let a = authenticated(&hub, "https://wallet-a.app", 1, clock, SessionConfig::default()).await;
    a.register_dapp("https://dapp1.com", session.clone()).await.unwrap();
    let mut a_events = a.subscribe();

    let b = authenticated(&hub, "https://wallet-b.app", 2, clock, SessionConfig::default()).await;
    let mut b_events = b.subscribe();
    b.register_dapp("https://dapp2.com", session.clone()).await.unwrap();

    let updated = wait_for(&mut a_events, MINUTE, |e| {
        matches!(e, SessionEvent::SessionUpdated { .. })
    })
    .await;
    assert_eq!(
        updated,
        SessionEvent::SessionUpdated {
            session_id: session.id.clone(),
            origin: Origin::from("https://dapp2.com"),
        }
    );
    assert_eq!(
        a.get_connected_dapps(),
        vec![Origin::from("https://dapp1.com"), Origin::from("https://dapp2.com")]
    );

    assert!(b.validate_session(&session.id, "https://dapp2.com").await);
    wait_for(&mut a_events, MINUTE, |e| {
        matches!(e, SessionEvent::SessionValidated { origin, .. } if origin.as_str() == "https://dapp2.com")
    })
    .await;

    b.unregister_dapp("https://dapp2.com").await;
    wait_for(&mut b_events, MINUTE, |e| {
        matches!(e, SessionEvent::SessionTerminated { .. })
    })
    .await;
    assert!(b.get_state().active_session.is_none());

    wait_for(&mut a_events, MINUTE, |e| {
        matches!(e, SessionEvent::SessionTerminated { origin, .. } if origin.as_str() == "https://dapp2.com")
    })
    .await;
    assert_eq!(a.get_connected_dapps(), vec![Origin::from("https://dapp1.com")]);
    assert_eq!(a.get_active_session().await, Some(session));
}

#[tokio::test(start_paused = true)]
async fn replayed_and_malformed_messages_are_dropped() {
    let clock = TokioClock::anchored_at(1_700_000_000_000);
    let hub = LocalBroadcastHub::new();
    let session = sample_session(clock.now_ms());

    let b = authenticated(&hub, "https://wallet-b.app", 2, clock, SessionConfig::default()).await;
    b.register_dapp("https://dapp2.com", session.clone()).await.unwrap();
    let mut b_events = b.subscribe();

    let spy = hub.open(CHANNEL);
    let mut sniffed = spy.subscribe();
    let a = authenticated(&hub, "https://wallet-a.app", 1, clock, SessionConfig::default()).await;
    a.register_dapp("https://dapp1.com", session.clone()).await.unwrap();

    wait_for(&mut b_events, MINUTE, |e| {
        matches!(e, SessionEvent::SessionUpdated { .. })
    })
    .await;
    let raw = sniffed.recv().await.unwrap();
    let wire: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(wire["type"], MessageType::SessionUpdate.as_str());
    assert!(wire["signature"].is_string());
    assert!(wire["nonce"].is_u64());

    b.handle_inbound(&raw).await;
    assert_eq!(
        b_events.recv().await.unwrap(),
        SessionEvent::InvalidMessage {
            origin: Some(Origin::from("https://dapp1.com")),
            message_type: Some("SESSION_UPDATE".to_string()),
        }
    );

    let unsigned = format!(
        r#"{{"type":"SESSION_TERMINATE","sessionId":"{}","origin":"https://dapp2.com"}}"#,
        session.id
    );
    b.handle_inbound(&unsigned).await;
    assert_matches!(
        b_events.recv().await.unwrap(),
        SessionEvent::InvalidMessage { message_type: Some(t), .. } if t == "SESSION_TERMINATE"
    );

    b.handle_inbound(r#"{"type":"INVALID_TYPE","sessionId":"x","origin":"https://evil.app"}"#)
        .await;
    assert_eq!(
        b_events.recv().await.unwrap(),
        SessionEvent::InvalidMessage {
            origin: Some(Origin::from("https://evil.app")),
            message_type: Some("INVALID_TYPE".to_string()),
        }
    );

    assert_eq!(b.get_connected_dapps().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn sealed_message_replayed_after_nonce_window_is_dropped() {
    let clock = TokioClock::anchored_at(1_700_000_000_000);
    let hub = LocalBroadcastHub::new();
    let session = sample_session(clock.now_ms());

    let b = authenticated(&hub, "https://wallet-b.app", 2, clock, SessionConfig::default()).await;
    b.register_dapp("https://dapp2.com", session.clone()).await.unwrap();
    let mut b_events = b.subscribe();

    let spy = hub.open(CHANNEL);
    let mut sniffed = spy.subscribe();
    let a = authenticated(&hub, "https://wallet-a.app", 1, clock, SessionConfig::default()).await;
    a.register_dapp("https://dapp1.com", session.clone()).await.unwrap();
    wait_for(&mut b_events, MINUTE, |e| {
        matches!(e, SessionEvent::SessionUpdated { .. })
    })
    .await;
    let raw = sniffed.recv().await.unwrap();

    // Past the nonce window; the periodic sweep has forgotten the nonce.
    tokio::time::advance(6 * MINUTE).await;
    b.handle_inbound(&raw).await;

    let outcome = wait_for(&mut b_events, MINUTE, |e| {
        matches!(
            e,
            SessionEvent::InvalidMessage { .. } | SessionEvent::SessionUpdated { .. }
        )
    })
    .await;
    assert_eq!(
        outcome,
        SessionEvent::InvalidMessage {
            origin: Some(Origin::from("https://dapp1.com")),
            message_type: Some("SESSION_UPDATE".to_string()),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn capacity_limit_is_enforced() {
    let clock = TokioClock::anchored_at(1_700_000_000_000);
    let hub = LocalBroadcastHub::new();
    let config = SessionConfig {
        max_concurrent_sessions: 1,
        ..SessionConfig::default()
    };
    let manager = authenticated(&hub, "https://wallet.app", 1, clock, config).await;
    let session = sample_session(clock.now_ms());

    manager.register_dapp("https://dapp1.com", session.clone()).await.unwrap();
    let err = manager
        .register_dapp("https://dapp2.com", session.clone())
        .await
        .unwrap_err();
    assert_matches!(err, SessionError::CapacityReached { limit: 1 });
    assert!(err.to_string().contains("Maximum concurrent sessions reached"));

    manager.register_dapp("https://dapp1.com", session).await.unwrap();
    assert_eq!(manager.get_connected_dapps(), vec![Origin::from("https://dapp1.com")]);
}

#[tokio::test(start_paused = true)]
async fn unregistering_last_dapp_clears_session() {
    let clock = TokioClock::anchored_at(1_700_000_000_000);
    let hub = LocalBroadcastHub::new();
    let manager = authenticated(&hub, "https://wallet.app", 1, clock, SessionConfig::default()).await;
    let session = sample_session(clock.now_ms());
    manager.register_dapp("https://dapp1.com", session.clone()).await.unwrap();
    manager.register_dapp("https://dapp2.com", session.clone()).await.unwrap();
    let mut events = manager.subscribe();

    manager.unregister_dapp("https://dapp1.com").await;
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::DAppUnregistered {
            origin: Origin::from("https://dapp1.com")
        }
    );
    assert!(manager.get_state().active_session.is_some());

    manager.unregister_dapp("https://dapp2.com").await;
    assert_matches!(events.recv().await.unwrap(), SessionEvent::DAppUnregistered { .. });
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::SessionTerminated {
            session_id: session.id,
            origin: Origin::from("https://dapp2.com"),
        }
    );
    let state = manager.get_state();
    assert!(state.active_session.is_none());
    assert!(state.connected_dapps.is_empty());
}

#[tokio::test(start_paused = true)]
async fn inactive_session_is_terminated() {
    let clock = TokioClock::anchored_at(1_700_000_000_000);
    let hub = LocalBroadcastHub::new();
    let manager = authenticated(&hub, "https://wallet.app", 1, clock, SessionConfig::default()).await;
    let mut events = manager.subscribe();
    manager
        .register_dapp("https://dapp1.com", sample_session(clock.now_ms()))
        .await
        .unwrap();

    tokio::time::sleep(20 * MINUTE).await;
    manager.update_activity();
    tokio::time::sleep(20 * MINUTE).await;
    assert!(manager.get_active_session().await.is_some());

    let started = clock.now_ms();
    wait_for(&mut events, 15 * MINUTE, |e| {
        matches!(e, SessionEvent::SessionTerminated { .. })
    })
    .await;
    assert!(clock.now_ms() - started >= 10 * 60 * 1000);
    assert!(manager.get_state().active_session.is_none());
}

#[tokio::test(start_paused = true)]
async fn update_activity_moves_last_activity_forward() {
    let clock = TokioClock::anchored_at(1_700_000_000_000);
    let hub = LocalBroadcastHub::new();
    let manager = authenticated(&hub, "https://wallet.app", 1, clock, SessionConfig::default()).await;

    let before = manager.get_state().last_activity;
    tokio::time::advance(Duration::from_secs(5)).await;
    manager.update_activity();
    assert!(manager.get_state().last_activity > before);
}

#[tokio::test(start_paused = true)]
async fn validation_of_expired_session_terminates_it() {
    let clock = TokioClock::anchored_at(1_700_000_000_000);
    let hub = LocalBroadcastHub::new();
    let config = SessionConfig {
        max_inactivity_time_ms: 24 * 60 * 60 * 1000,
        activity_check_interval_ms: 24 * 60 * 60 * 1000,
        ..SessionConfig::default()
    };
    let manager = authenticated(&hub, "https://wallet.app", 1, clock, config).await;
    let session = sample_session(clock.now_ms());
    manager.register_dapp("https://dapp1.com", session.clone()).await.unwrap();

    assert!(manager.revalidate(&session.id).await);

    tokio::time::advance(61 * MINUTE).await;
    let mut events = manager.subscribe();
    assert!(!manager.validate_session(&session.id, "https://dapp1.com").await);
    assert_matches!(events.recv().await.unwrap(), SessionEvent::SessionTerminated { .. });
    assert!(manager.get_state().active_session.is_none());
}

#[tokio::test(start_paused = true)]
async fn trusted_contexts_accept_unsigned_messages() {
    let clock = TokioClock::anchored_at(1_700_000_000_000);
    let hub = LocalBroadcastHub::new();
    let session = sample_session(clock.now_ms());

    let background = SessionManager::trusted("chrome-extension://wallet", Arc::new(hub.open(CHANNEL)))
        .clock(Arc::new(clock))
        .build()
        .await
        .unwrap();
    background
        .register_dapp("https://dapp1.com", session.clone())
        .await
        .unwrap();
    let mut events = background.subscribe();

    let content = SessionManager::trusted("https://dapp2.com", Arc::new(hub.open(CHANNEL)))
        .clock(Arc::new(clock))
        .build()
        .await
        .unwrap();
    content.register_dapp("https://dapp2.com", session.clone()).await.unwrap();

    wait_for(&mut events, MINUTE, |e| matches!(e, SessionEvent::SessionUpdated { .. })).await;
    assert_eq!(background.get_connected_dapps().len(), 2);

    let raw = format!(
        r#"{{"type":"SESSION_VALIDATE","sessionId":"{}","origin":"https://dapp2.com"}}"#,
        session.id
    );
    background.handle_inbound(&raw).await;
    assert_matches!(events.recv().await.unwrap(), SessionEvent::SessionValidated { .. });

    content.shutdown().await;
    assert_eq!(hub.subscriber_count(CHANNEL), 1);
}
