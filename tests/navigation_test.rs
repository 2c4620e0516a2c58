//! Navigation through a page driven by a scripted browser.

use browser_wire::{
    BidiConnection, ChannelRemote, ChannelTransport, ConnectionOptions, Error, FrameId,
    NavigateOptions, Page,
};
use serde_json::{Value, json};

// ============================================================================
// Helpers
// ============================================================================

const CONTEXT: &str = "CTX";

fn event(method: &str, params: Value) -> Value {
    json!({"type": "event", "method": method, "params": params})
}

fn navigation_started(navigation: &str, url: &str) -> Value {
    event(
        "browsingContext.navigationStarted",
        json!({"context": CONTEXT, "navigation": navigation, "url": url}),
    )
}

fn navigation_committed(navigation: &str, url: &str) -> Value {
    event(
        "browsingContext.navigationCommitted",
        json!({"context": CONTEXT, "navigation": navigation, "url": url}),
    )
}

fn request_sent(request: &str, navigation: &str, url: &str) -> Value {
    event(
        "network.beforeRequestSent",
        json!({
            "context": CONTEXT,
            "navigation": navigation,
            "redirectCount": 0,
            "request": {"request": request, "url": url, "method": "GET"}
        }),
    )
}

fn response_completed(request: &str, navigation: &str, url: &str, status: u16) -> Value {
    event(
        "network.responseCompleted",
        json!({
            "context": CONTEXT,
            "navigation": navigation,
            "request": {"request": request, "url": url, "method": "GET"},
            "response": {
                "url": url,
                "status": status,
                "statusText": "",
                "fromCache": false,
                "mimeType": "text/html"
            }
        }),
    )
}

async fn page() -> (Page, ChannelRemote) {
    let (link, remote) = ChannelTransport::pair();
    let page = Page::new(BidiConnection::new(
        "ws://bidi",
        link,
        ConnectionOptions::default(),
    ));
    remote.deliver_json(&event(
        "browsingContext.contextCreated",
        json!({"context": CONTEXT, "url": "about:blank"}),
    ));
    page.wait_for_frame(&FrameId::from(CONTEXT))
        .await
        .expect("context attached");
    (page, remote)
}

/// Answers the next navigate command after delivering `before`, then
/// delivers `after`.
fn script(mut remote: ChannelRemote, before: Vec<Value>, after: Vec<Value>) -> tokio::task::JoinHandle<ChannelRemote> {
    tokio::spawn(async move {
        let navigate = remote.recv_json().await.expect("navigate");
        assert_eq!(navigate["method"], "browsingContext.navigate");
        for message in &before {
            remote.deliver_json(message);
        }
        remote.deliver_json(&json!({
            "type": "success",
            "id": navigate["id"],
            "result": {"navigation": "N1", "url": navigate["params"]["url"]}
        }));
        for message in &after {
            remote.deliver_json(message);
        }
        remote
    })
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_navigation_resolves_with_response() {
    let (page, remote) = page().await;
    let url = "https://a.test/";
    let server = script(
        remote,
        vec![
            navigation_started("N1", url),
            request_sent("R1", "N1", url),
            response_completed("R1", "N1", url, 200),
        ],
        vec![navigation_committed("N1", url)],
    );

    let response = page
        .goto(&FrameId::from(CONTEXT), url, NavigateOptions::default())
        .await
        .expect("navigated")
        .expect("response");
    let _remote = server.await.expect("server");

    assert_eq!(response.status, 200);
    assert_eq!(
        page.frame(&FrameId::from(CONTEXT)).map(|frame| frame.url),
        Some(url.to_string())
    );
}

#[tokio::test]
async fn test_redirect_resolves_with_final_response() {
    let (page, remote) = page().await;
    let start = "https://a.test/start";
    let end = "https://a.test/end";
    let server = script(
        remote,
        vec![
            navigation_started("N1", start),
            request_sent("R1", "N1", start),
            response_completed("R1", "N1", start, 302),
            request_sent("R2", "N1", end),
            response_completed("R2", "N1", end, 200),
        ],
        vec![navigation_committed("N1", end)],
    );

    let response = page
        .goto(&FrameId::from(CONTEXT), start, NavigateOptions::default())
        .await
        .expect("navigated")
        .expect("response");
    let _remote = server.await.expect("server");

    assert_eq!(response.status, 200);
    assert_eq!(response.url, end);
}

#[tokio::test]
async fn test_error_status_is_a_response() {
    let (page, remote) = page().await;
    let url = "https://a.test/missing";
    let server = script(
        remote,
        vec![navigation_started("N1", url), request_sent("R1", "N1", url)],
        vec![
            navigation_committed("N1", url),
            response_completed("R1", "N1", url, 404),
        ],
    );

    let response = page
        .goto(&FrameId::from(CONTEXT), url, NavigateOptions::default())
        .await
        .expect("navigated")
        .expect("response");
    let _remote = server.await.expect("server");

    assert_eq!(response.status, 404);
    assert!(!response.ok());
}

#[tokio::test]
async fn test_disconnect_rejects_navigation() {
    let (page, remote) = page().await;
    let url = "https://a.test/";
    let server = tokio::spawn(async move {
        let mut remote = remote;
        let navigate = remote.recv_json().await.expect("navigate");
        remote.deliver_json(&navigation_started("N1", url));
        remote.deliver_json(&json!({
            "type": "success",
            "id": navigate["id"],
            "result": {"navigation": "N1", "url": url}
        }));
        remote.close_remote();
        remote
    });

    let err = page
        .goto(&FrameId::from(CONTEXT), url, NavigateOptions::default())
        .await
        .expect_err("disconnected");
    let _remote = server.await.expect("server");

    assert!(matches!(err, Error::NavigationTerminated { .. }));
    assert_eq!(
        err.to_string(),
        "Navigation failed because browser has disconnected!"
    );
    assert_eq!(page.frame_tree().listener_count(), 1);
    assert_eq!(page.network().listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_navigation_timeout() {
    let (page, remote) = page().await;
    let url = "https://a.test/slow";
    let server = script(remote, vec![navigation_started("N1", url)], Vec::new());

    let err = page
        .goto(
            &FrameId::from(CONTEXT),
            url,
            NavigateOptions::default().with_timeout_ms(1_000),
        )
        .await
        .expect_err("timed out");
    let _remote = server.await.expect("server");

    assert!(err.is_timeout());
    assert_eq!(err.to_string(), "Navigation timeout of 1000 ms exceeded");
    assert_eq!(page.network().listener_count(), 0);
}

#[tokio::test]
async fn test_wait_for_fragment_navigation() {
    let (page, remote) = page().await;
    let frame = FrameId::from(CONTEXT);

    let waiting = page.wait_for_navigation(&frame, NavigateOptions::default());
    remote.deliver_json(&event(
        "browsingContext.fragmentNavigated",
        json!({"context": CONTEXT, "navigation": null, "url": "about:blank#top"}),
    ));

    assert_eq!(waiting.await.expect("navigated"), None);
}

#[tokio::test]
async fn test_wait_for_document_navigation_started_later() {
    let (page, remote) = page().await;
    let frame = FrameId::from(CONTEXT);
    let url = "https://a.test/next";

    let waiting = page.wait_for_navigation(
        &frame,
        NavigateOptions::default().with_timeout_ms(1_000),
    );
    for message in [
        navigation_started("N1", url),
        request_sent("R1", "N1", url),
        response_completed("R1", "N1", url, 200),
        navigation_committed("N1", url),
        event(
            "browsingContext.load",
            json!({"context": CONTEXT, "navigation": "N1", "url": url}),
        ),
    ] {
        remote.deliver_json(&message);
    }

    let response = waiting.await.expect("navigated").expect("response");
    assert_eq!(response.status, 200);
    assert_eq!(response.url, url);
    assert_eq!(page.network().listener_count(), 0);
}
