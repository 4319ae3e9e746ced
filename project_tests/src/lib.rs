//! Shared fixtures for the workspace integration tests.

use std::sync::Arc;
use std::time::Duration;

use lib_rsu::core::{AuditLog, DecisionEngine, EventRelay, SubscriberRegistry, Subscription};
use lib_rsu::model::Frame;

/// A small SUMO network: one internal edge, two normal edges and three
/// junctions, two of them signalized.
pub const SAMPLE_NET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<net version="1.16" junctionCornerDetail="5">
    <location netOffset="0.00,0.00" convBoundary="0.00,0.00,200.00,100.00" origBoundary="0,0,200,100" projParameter="!"/>
    <edge id=":J1_0" function="internal">
        <lane id=":J1_0_0" index="0" speed="13.89" length="4.00" shape="98.40,-1.60 101.60,1.60"/>
    </edge>
    <edge id="E0" from="J0" to="J1" priority="-1">
        <lane id="E0_0" index="0" speed="13.89" length="100.00" shape="0.00,0.00 100.00,0.00"/>
        <lane id="E0_1" index="1" speed="13.89" length="100.00" shape="0.00,3.20 100.00,3.20"/>
    </edge>
    <edge id="E1" from="J1" to="J4" priority="-1">
        <lane id="E1_0" index="0" speed="13.89" length="141.42" shape="100.00,0.00 200.00,100.00"/>
    </edge>
    <junction id="J0" type="dead_end" x="0.00" y="0.00" incLanes="" intLanes=""/>
    <junction id="J1" type="traffic_light" x="100.00" y="0.00" incLanes="E0_0 E0_1" intLanes=":J1_0_0"/>
    <junction id="J4" type="traffic_light" x="200.00" y="100.00" incLanes="E1_0" intLanes=""/>
</net>"#;

/// A relay with default policy, an in-memory audit tail and `buffer` frames
/// per subscriber.
pub fn relay_with_buffer(buffer: usize) -> EventRelay {
    EventRelay::new(
        DecisionEngine::default(),
        Arc::new(SubscriberRegistry::new(buffer)),
        Arc::new(AuditLog::default()),
    )
}

/// Registers a subscriber and consumes its connection acknowledgement.
pub async fn subscribe(relay: &EventRelay, label: &str) -> Subscription {
    let mut sub = relay.registry().register(label);
    let hello = sub.recv().await.expect("acknowledgement");
    assert_eq!(hello.payload["action"], "connected");
    sub
}

/// Drains whatever is queued for `sub` right now.
pub fn drain(sub: &mut Subscription) -> Vec<Arc<Frame>> {
    std::iter::from_fn(|| sub.try_recv()).collect()
}

/// Waits for `n` frames, failing after a generous timeout.
pub async fn collect(sub: &mut Subscription, n: usize) -> Vec<Arc<Frame>> {
    let mut frames = Vec::with_capacity(n);
    while frames.len() < n {
        let frame = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("timed out waiting for frames")
            .expect("subscription closed");
        frames.push(frame);
    }
    frames
}
