//! # Relay pipeline
//!
//! Drives an [`EventRelay`] the way the transports do and checks what
//! subscribers observe: the `ev_event`/`rsu_decision` pair, fan-out to every
//! live subscriber, per-EV ordering under concurrent producers and the
//! eviction of subscribers that stop reading.

use std::sync::Arc;

use lib_rsu::core::{InboundMessage, RelayError, SubscriberState};
use lib_rsu::model::{Action, ControlDecision, InvalidTelemetry, Topic};
use project_tests::{collect, drain, relay_with_buffer, subscribe};
use serde_json::json;

#[tokio::test]
async fn priority_request_reaches_dashboard() {
    let relay = relay_with_buffer(64);
    let mut dashboard = subscribe(&relay, "dashboard").await;

    let decision = relay.submit(&json!({"ev_id": "ev1", "eta_seconds": 12})).await.unwrap();
    assert_eq!(decision.action, Action::ExtendGreen);
    assert_eq!(decision.duration_seconds, 10);
    assert_eq!(decision.reason, "EV arriving soon");

    let frames = drain(&mut dashboard);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].topic, Topic::EvEvent);
    assert_eq!(frames[0].payload["ev_id"], "ev1");
    assert_eq!(frames[1].topic, Topic::RsuDecision);

    let broadcast: ControlDecision = serde_json::from_value(frames[1].payload.clone()).unwrap();
    assert_eq!(broadcast, decision);

    let wire: serde_json::Value = serde_json::from_str(&frames[1].wire).unwrap();
    assert_eq!(wire["event"], "rsu_decision");
    assert_eq!(wire["data"]["action"], "extend_green");
}

#[tokio::test]
async fn tiers_follow_eta() {
    let relay = relay_with_buffer(64);
    let cases = [
        (0.0, Action::ExtendGreen, 10),
        (15.0, Action::ExtendGreen, 10),
        (15.5, Action::ExtendGreen, 5),
        (40.0, Action::ExtendGreen, 5),
        (40.1, Action::Ack, 0),
    ];
    for (eta, action, duration) in cases {
        let decision = relay.submit(&json!({"ev_id": "ev1", "eta": eta})).await.unwrap();
        assert_eq!((decision.action, decision.duration_seconds), (action, duration), "eta {eta}");
    }
}

#[tokio::test]
async fn every_subscriber_gets_every_frame() {
    let relay = relay_with_buffer(64);
    let mut subs = Vec::new();
    for i in 0..5 {
        subs.push(subscribe(&relay, &format!("dashboard-{i}")).await);
    }

    for eta in [5, 25, 60] {
        relay.submit(&json!({"ev_id": "ev1", "eta_seconds": eta})).await.unwrap();
    }

    for sub in &mut subs {
        let frames = drain(sub);
        assert_eq!(frames.len(), 6);
        let topics: Vec<Topic> = frames.iter().map(|f| f.topic).collect();
        assert_eq!(topics, [Topic::EvEvent, Topic::RsuDecision].repeat(3));
    }
    assert_eq!(relay.stats().decisions, 3);
}

#[tokio::test]
async fn invalid_telemetry_is_not_broadcast() {
    let relay = relay_with_buffer(64);
    let mut dashboard = subscribe(&relay, "dashboard").await;

    let err = relay.submit(&json!({"eta_seconds": 12})).await.unwrap_err();
    assert!(matches!(err, RelayError::InvalidTelemetry(InvalidTelemetry::MissingEvId)));
    let err = relay.submit_json(b"{not json").await.unwrap_err();
    assert!(matches!(err, RelayError::InvalidTelemetry(InvalidTelemetry::MalformedJson(_))));

    assert!(drain(&mut dashboard).is_empty());
    let stats = relay.stats();
    assert_eq!((stats.accepted, stats.rejected, stats.decisions), (0, 2, 0));
}

#[tokio::test]
async fn envelope_routes_to_the_right_policy() {
    let relay = relay_with_buffer(64);
    let mut dashboard = subscribe(&relay, "dashboard").await;

    let update: InboundMessage = serde_json::from_value(json!({
        "event": "ev_update",
        "data": {"ev_id": "ev2", "distance": 250.0, "tls_id": "J1"}
    }))
    .unwrap();
    assert_eq!(relay.handle(update).await.unwrap(), None);
    assert!(drain(&mut dashboard).is_empty());

    let update: InboundMessage = serde_json::from_value(json!({
        "event": "ev_update",
        "data": {"ev_id": "ev2", "distance": 40.0, "tls_id": "J1"}
    }))
    .unwrap();
    let decision = relay.handle(update).await.unwrap().unwrap();
    assert_eq!(decision.tls_id.as_deref(), Some("J1"));
    assert_eq!(decision.duration_seconds, 5);

    let topics: Vec<Topic> = drain(&mut dashboard).iter().map(|f| f.topic).collect();
    assert_eq!(topics, [Topic::EvEvent, Topic::RsuDecision]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_ev_order_survives_concurrent_producers() {
    const PER_EV: usize = 50;
    let relay = Arc::new(relay_with_buffer(4096));
    let mut dashboard = subscribe(&relay, "dashboard").await;

    let mut producers = Vec::new();
    for ev in ["ev_a", "ev_b", "ev_c"] {
        let relay = Arc::clone(&relay);
        producers.push(tokio::spawn(async move {
            for seq in 0..PER_EV {
                relay
                    .submit(&json!({"ev_id": ev, "eta_seconds": 10, "seq": seq}))
                    .await
                    .unwrap();
            }
        }));
    }
    for p in producers {
        p.await.unwrap();
    }

    let frames = collect(&mut dashboard, 3 * PER_EV * 2).await;

    // Each ev_event is directly followed by the decision made for it.
    let pairs: Vec<(&serde_json::Value, ControlDecision)> = frames
        .chunks(2)
        .map(|pair| {
            assert_eq!((pair[0].topic, pair[1].topic), (Topic::EvEvent, Topic::RsuDecision));
            (&pair[0].payload, serde_json::from_value(pair[1].payload.clone()).unwrap())
        })
        .collect();
    assert_eq!(pairs.len(), 3 * PER_EV);

    for ev in ["ev_a", "ev_b", "ev_c"] {
        let own: Vec<_> = pairs.iter().filter(|(event, _)| event["ev_id"] == ev).collect();
        let seqs: Vec<u64> = own.iter().filter_map(|(event, _)| event["seq"].as_u64()).collect();
        assert_eq!(seqs, (0..PER_EV as u64).collect::<Vec<_>>(), "{ev}");
        assert!(
            own.windows(2).all(|w| w[0].1.timestamp < w[1].1.timestamp),
            "{ev} decision timestamps must strictly increase"
        );
    }
    assert_eq!(relay.stats().decisions, (3 * PER_EV) as u64);
}

#[tokio::test]
async fn stalled_subscriber_is_dropped_others_continue() {
    let relay = relay_with_buffer(2);
    let mut stalled = subscribe(&relay, "stalled").await;
    let mut live = subscribe(&relay, "live").await;

    relay.submit(&json!({"ev_id": "ev1", "eta_seconds": 5})).await.unwrap();
    assert_eq!(drain(&mut live).len(), 2);

    relay.submit(&json!({"ev_id": "ev1", "eta_seconds": 6})).await.unwrap();
    assert_eq!(drain(&mut live).len(), 2);

    assert_eq!(stalled.state(), SubscriberState::Disconnected);
    assert!(!relay.registry().is_connected(stalled.id()));
    assert_eq!(relay.registry().len(), 1);

    // What was queued before the drop is still readable.
    assert_eq!(drain(&mut stalled).len(), 2);
    assert!(stalled.recv().await.is_none());
}

#[tokio::test]
async fn dropped_receiver_is_pruned_on_next_broadcast() {
    let relay = relay_with_buffer(16);
    let gone = subscribe(&relay, "gone").await;
    let _kept = subscribe(&relay, "kept").await;
    drop(gone);

    relay.submit(&json!({"ev_id": "ev1", "eta_seconds": 5})).await.unwrap();
    assert_eq!(relay.registry().len(), 1);
}
