//! Older-dialect connection tests over the in-memory transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use browser_wire::{
    ChannelRemote, ChannelTransport, CommandOptions, Connection, ConnectionEvent,
    ConnectionOptions, Error, SessionEvent, SessionId,
};
use proptest::prelude::*;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Helpers
// ============================================================================

/// Installs a test log subscriber; `RUST_LOG=browser_wire=trace` shows wire traffic.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn connect() -> (Connection, ChannelRemote) {
    init_tracing();
    let (link, remote) = ChannelTransport::pair();
    let connection = Connection::new("ws://test", link, ConnectionOptions::default());
    (connection, remote)
}

/// Yields until `done` holds or the attempts run out.
async fn until(done: impl Fn() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never held");
}

fn attach_event(session_id: &str) -> Value {
    json!({
        "method": "Target.attachedToTarget",
        "params": {
            "sessionId": session_id,
            "targetInfo": {"targetId": format!("T-{session_id}"), "type": "page", "url": ""},
            "waitingForDebugger": false
        }
    })
}

// ============================================================================
// Correlation
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_responses_reach_matching_call(
        order in (1usize..8).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        runtime.block_on(async move {
            let (connection, mut remote) = connect();
            let count = order.len();

            let calls: Vec<_> = (0..count)
                .map(|index| {
                    let connection = connection.clone();
                    tokio::spawn(async move {
                        connection
                            .send(&format!("Test.call{index}"), json!({ "index": index }))
                            .await
                    })
                })
                .collect();

            let mut requests = Vec::with_capacity(count);
            for _ in 0..count {
                requests.push(remote.recv_json().await.expect("request"));
            }
            requests.sort_by_key(|request| request["params"]["index"].as_u64());

            remote.deliver_json(&json!({"id": 999_999, "result": {"index": "stray"}}));
            for &index in &order {
                let request = &requests[index];
                remote.deliver_json(&json!({
                    "id": request["id"],
                    "result": { "index": request["params"]["index"] }
                }));
            }

            for (index, call) in calls.into_iter().enumerate() {
                let result = call.await.expect("join").expect("resolved");
                assert_eq!(result["index"], index);
            }
            assert_eq!(connection.pending_count(), 0);
        });
    }
}

#[tokio::test]
async fn test_error_response_keeps_original_message() -> anyhow::Result<()> {
    let (connection, mut remote) = connect();

    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.send("Page.navigate", json!({"url": "x"})).await }
    });

    let request = remote.recv_json().await?;
    remote.deliver_json(&json!({
        "id": request["id"],
        "error": {"code": -32000, "message": "Cannot navigate to invalid URL", "data": "x"}
    }));

    let err = call.await?.expect_err("rejected");
    assert_eq!(
        err.to_string(),
        "Protocol error (Page.navigate): Cannot navigate to invalid URL x"
    );
    assert_eq!(err.original_message(), Some("Cannot navigate to invalid URL"));
    assert!(matches!(err, Error::Protocol { code: Some(-32000), .. }));
    Ok(())
}

// ============================================================================
// Timeout
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_uncorrelated_call_times_out_with_label() {
    let (connection, mut remote) = connect();

    let call = tokio::spawn({
        let connection = connection.clone();
        async move {
            connection
                .send_with("Foo.bar", json!({}), CommandOptions::timeout_ms(10))
                .await
        }
    });

    let request = remote.recv_json().await.expect("request");
    assert_eq!(request["method"], "Foo.bar");
    assert_eq!(request["params"], json!({}));

    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = call.await.expect("join").expect_err("timed out");
    assert!(matches!(err, Error::RequestTimeout { .. }));
    assert!(err.to_string().contains("Foo.bar"));
    assert_eq!(connection.pending_count(), 0);
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test]
async fn test_dispose_rejects_every_pending_call() {
    let (connection, mut remote) = connect();
    let disconnects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&disconnects);
    let _sub = connection.on(move |event| {
        if matches!(event, ConnectionEvent::Disconnected) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let calls: Vec<_> = ["A.one", "B.two", "C.three"]
        .into_iter()
        .map(|method| {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send(method, json!({})).await })
        })
        .collect();

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(remote.recv_json().await.expect("request")["id"].clone());
    }
    assert_eq!(connection.pending_count(), 3);

    connection.dispose();
    connection.dispose();
    for id in ids {
        remote.deliver_json(&json!({"id": id, "result": {}}));
    }

    for call in calls {
        let err = call.await.expect("join").expect_err("rejected");
        assert!(err.is_target_closed());
        assert!(err.to_string().ends_with("Target closed"));
    }
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);

    let err = connection
        .send("Late.call", json!({}))
        .await
        .expect_err("closed");
    assert!(matches!(err, Error::ConnectionClosed { .. }));
}

#[tokio::test]
async fn test_remote_close_rejects_pending() {
    let (connection, mut remote) = connect();

    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.send("Slow.call", json!({})).await }
    });
    remote.recv_json().await.expect("request");
    remote.close_remote();

    let err = call.await.expect("join").expect_err("rejected");
    assert_eq!(err.to_string(), "Protocol error (Slow.call): Target closed");
    assert!(connection.is_closed());
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_session_events_are_routed_by_id() {
    let (connection, mut remote) = connect();
    let root_events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&root_events);
    let _root = connection.on(move |event| {
        if matches!(event, ConnectionEvent::Protocol { method, .. } if method == "Page.loadEventFired") {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    remote.deliver_json(&attach_event("S1"));
    remote.deliver_json(&attach_event("S2"));
    until(|| connection.session(&SessionId::from("S2")).is_some()).await;

    let s1 = connection.session(&SessionId::from("S1")).expect("S1");
    let s2 = connection.session(&SessionId::from("S2")).expect("S2");
    assert_eq!(s1.target_type(), "page");

    let count = |session: &browser_wire::Session| {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let sub = session.on(move |event| {
            if matches!(event, SessionEvent::Protocol { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (seen, sub)
    };
    let (s1_events, _s1_sub) = count(&s1);
    let (s2_events, _s2_sub) = count(&s2);

    remote.deliver_json(&json!({"method": "Page.loadEventFired", "params": {}, "sessionId": "S1"}));
    remote.deliver_json(&json!({"method": "Page.loadEventFired", "params": {}}));
    remote.deliver_json(&json!({"method": "Page.loadEventFired", "params": {}, "sessionId": "gone"}));
    until(|| root_events.load(Ordering::SeqCst) == 1).await;
    tokio::task::yield_now().await;

    assert_eq!(s1_events.load(Ordering::SeqCst), 1);
    assert_eq!(s2_events.load(Ordering::SeqCst), 0);
    assert_eq!(root_events.load(Ordering::SeqCst), 1);

    let call = tokio::spawn({
        let s1 = s1.clone();
        async move { s1.send("Runtime.evaluate", json!({"expression": "1"})).await }
    });
    let request = remote.recv_json().await.expect("request");
    assert_eq!(request["sessionId"], "S1");
    remote.deliver_json(&json!({"id": request["id"], "result": {"value": 1}, "sessionId": "S1"}));
    assert_eq!(call.await.expect("join").expect("resolved")["value"], 1);
}

#[tokio::test]
async fn test_detach_is_single_shot() {
    let (connection, mut remote) = connect();
    remote.deliver_json(&attach_event("S1"));
    until(|| connection.session(&SessionId::from("S1")).is_some()).await;
    let session = connection.session(&SessionId::from("S1")).expect("S1");

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.detach().await }
    });
    let request = remote.recv_json().await.expect("detach");
    assert_eq!(request["method"], "Target.detachFromTarget");
    assert_eq!(request["params"]["sessionId"], "S1");

    session.detach().await.expect("second detach is a no-op");
    assert!(session.is_closed());

    remote.deliver_json(&json!({"id": request["id"], "result": {}}));
    first.await.expect("join").expect("detached");
    assert!(remote.try_recv_outgoing().is_none());

    let err = session
        .send("Runtime.evaluate", json!({}))
        .await
        .expect_err("closed session");
    assert!(err.is_target_closed());
}

#[tokio::test]
async fn test_failed_detach_keeps_session_usable() {
    let (connection, mut remote) = connect();
    remote.deliver_json(&attach_event("S1"));
    until(|| connection.session(&SessionId::from("S1")).is_some()).await;
    let session = connection.session(&SessionId::from("S1")).expect("S1");

    let detach = tokio::spawn({
        let session = session.clone();
        async move { session.detach().await }
    });
    let request = remote.recv_json().await.expect("detach");
    remote.deliver_json(&json!({
        "id": request["id"],
        "error": {"code": -32602, "message": "No session with given id"}
    }));
    let err = detach.await.expect("join").expect_err("detach rejected");
    assert!(matches!(err, Error::Protocol { .. }));
    assert!(!session.is_closed());

    let call = tokio::spawn({
        let session = session.clone();
        async move { session.send("Runtime.evaluate", json!({"expression": "1"})).await }
    });
    let request = remote.recv_json().await.expect("request");
    assert_eq!(request["sessionId"], "S1");
    remote.deliver_json(&json!({"id": request["id"], "result": {"value": 1}, "sessionId": "S1"}));
    assert_eq!(call.await.expect("join").expect("resolved")["value"], 1);
}

#[tokio::test]
async fn test_detached_event_closes_session() {
    let (connection, remote) = connect();
    remote.deliver_json(&attach_event("S1"));
    until(|| connection.session(&SessionId::from("S1")).is_some()).await;
    let session = connection.session(&SessionId::from("S1")).expect("S1");

    remote.deliver_json(&json!({
        "method": "Target.detachedFromTarget",
        "params": {"sessionId": "S1"}
    }));
    until(|| session.is_closed()).await;

    assert!(connection.session(&SessionId::from("S1")).is_none());
    let err = session.detach().await.expect_err("already detached");
    assert!(err.is_target_closed());
}
