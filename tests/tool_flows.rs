//! End-to-end tool flows over the scripted transport: DOM exploration,
//! element lookup, interactions, navigation.

mod support;

use browserd::dispatch::ToolCall;
use serde_json::{json, Value};
use support::{harness, script_single_element};

fn call(name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        name: name.to_string(),
        arguments,
    }
}

#[tokio::test]
async fn explore_page_dom_returns_the_serialized_tree() {
    let h = harness();
    h.transport
        .eval_value(
            "MAX_DEPTH",
            json!({
                "tag": "html",
                "attributes": [{ "name": "lang", "value": "en" }],
                "depth": 0,
                "children": [
                    { "tag": "body", "attributes": [], "depth": 1, "children": [] },
                ],
            }),
        )
        .await;

    let response = h
        .dispatcher
        .dispatch(call("explore_page_dom", json!({ "max_depth": 3 })))
        .await;
    assert!(response.ok, "{:?}", response.error);
    let tree = response.result.unwrap();
    assert_eq!(tree["tag"], "html");
    assert_eq!(tree["children"][0]["tag"], "body");
    assert_eq!(tree["children"][0]["depth"], 1);
}

#[tokio::test]
async fn explore_element_dom_reports_missing_root() {
    let h = harness();
    h.transport.eval_value("MAX_DEPTH", Value::Null).await;

    let response = h
        .dispatcher
        .dispatch(call(
            "explore_element_dom",
            json!({ "selector": "#missing", "max_depth": 2 }),
        ))
        .await;
    assert!(!response.ok);
    let error = response.error.unwrap();
    assert_eq!(error.kind, "ElementNotFound");
    assert!(error.message.contains("#missing"));
}

#[tokio::test]
async fn find_elements_with_zero_matches_succeeds() {
    let h = harness();
    h.transport
        .eval_value("classes:", json!({ "elements": [] }))
        .await;

    let response = h
        .dispatcher
        .dispatch(call("find_elements", json!({ "selector": ".nothing" })))
        .await;
    assert!(response.ok);
    assert_eq!(response.result, Some(json!([])));
}

#[tokio::test]
async fn find_elements_returns_descriptors_in_document_order() {
    let h = harness();
    h.transport
        .eval_value(
            "classes:",
            json!({ "elements": [
                { "index": 0, "tag": "li", "id": null, "classes": ["item"], "text": "one", "visible": true },
                { "index": 1, "tag": "li", "id": null, "classes": ["item"], "text": "two", "visible": false },
            ] }),
        )
        .await;

    let response = h
        .dispatcher
        .dispatch(call("find_elements", json!({ "selector": "li.item" })))
        .await;
    assert!(response.ok);
    let list = response.result.unwrap();
    assert_eq!(list[0]["index"], 0);
    assert_eq!(list[0]["selector"], "li.item");
    assert_eq!(list[1]["text"], "two");
}

#[tokio::test]
async fn click_fails_cleanly_when_nothing_matches() {
    let h = harness();
    h.transport
        .eval_value("classes:", json!({ "elements": [] }))
        .await;

    let response = h
        .dispatcher
        .dispatch(call("click_on_element", json!({ "selector": "#gone" })))
        .await;
    assert!(!response.ok);
    assert_eq!(response.error.unwrap().kind, "ElementNotFound");
}

#[tokio::test]
async fn click_uses_the_first_of_many_matches() {
    let h = harness();
    h.transport
        .eval_value(
            "classes:",
            json!({ "elements": [
                { "index": 0, "tag": "a", "classes": [], "visible": true },
                { "index": 1, "tag": "a", "classes": [], "visible": true },
            ] }),
        )
        .await;
    h.transport
        .eval_value("anyVisible", json!({ "matched": true }))
        .await;
    h.transport
        .eval_value("scrollIntoView", json!({ "x": 10.0, "y": 20.0 }))
        .await;

    let response = h
        .dispatcher
        .dispatch(call("click_on_element", json!({ "selector": "a.nav" })))
        .await;
    assert!(response.ok, "{:?}", response.error);

    let sent = h.transport.sent.lock().await;
    let mouse_events: Vec<&Value> = sent
        .iter()
        .filter(|(m, _)| m == "Input.dispatchMouseEvent")
        .map(|(_, p)| p)
        .collect();
    assert_eq!(mouse_events.len(), 2);
    assert_eq!(mouse_events[0]["type"], "mousePressed");
    assert_eq!(mouse_events[1]["type"], "mouseReleased");
    assert_eq!(mouse_events[0]["x"], 10.0);
}

#[tokio::test]
async fn click_times_out_as_not_interactable_when_hidden() {
    let h = harness();
    h.transport
        .eval_value(
            "classes:",
            json!({ "elements": [
                { "index": 0, "tag": "button", "classes": [], "visible": false },
            ] }),
        )
        .await;
    h.transport
        .eval_value("anyVisible", json!({ "matched": false }))
        .await;

    let response = h
        .dispatcher
        .dispatch(call("click_on_element", json!({ "selector": "#hidden" })))
        .await;
    assert!(!response.ok);
    assert_eq!(response.error.unwrap().kind, "ElementNotInteractable");
}

#[tokio::test]
async fn fill_clears_then_inserts_text() {
    let h = harness();
    script_single_element(&h.transport).await;

    let response = h
        .dispatcher
        .dispatch(call(
            "fill_input",
            json!({ "selector": "#name", "value": "Ada Lovelace" }),
        ))
        .await;
    assert!(response.ok, "{:?}", response.error);

    let sent = h.transport.sent.lock().await;
    let inserted = sent
        .iter()
        .find(|(m, _)| m == "Input.insertText")
        .map(|(_, p)| p["text"].clone());
    assert_eq!(inserted, Some(json!("Ada Lovelace")));
}

#[tokio::test]
async fn fill_then_read_round_trips_the_value() {
    let h = harness();
    script_single_element(&h.transport).await;
    h.transport
        .eval_value("typeof el.value === 'string'", json!("Ada Lovelace"))
        .await;

    let fill = h
        .dispatcher
        .dispatch(call(
            "fill_input",
            json!({ "selector": "#name", "value": "Ada Lovelace" }),
        ))
        .await;
    assert!(fill.ok);

    let read = h
        .dispatcher
        .dispatch(call("get_element_text_content", json!({ "selector": "#name" })))
        .await;
    assert!(read.ok, "{:?}", read.error);
    assert_eq!(read.result, Some(json!("Ada Lovelace")));
}

#[tokio::test]
async fn press_key_dispatches_down_and_up() {
    let h = harness();
    script_single_element(&h.transport).await;

    let response = h
        .dispatcher
        .dispatch(call(
            "press_key",
            json!({ "selector": "#name", "key": "Control+Enter" }),
        ))
        .await;
    assert!(response.ok, "{:?}", response.error);

    let sent = h.transport.sent.lock().await;
    let key_events: Vec<&Value> = sent
        .iter()
        .filter(|(m, _)| m == "Input.dispatchKeyEvent")
        .map(|(_, p)| p)
        .collect();
    assert_eq!(key_events.len(), 2);
    assert_eq!(key_events[0]["type"], "rawKeyDown");
    assert_eq!(key_events[0]["key"], "Enter");
    assert_eq!(key_events[1]["type"], "keyUp");
}

#[tokio::test]
async fn navigation_completes_when_document_becomes_ready() {
    let h = harness();
    h.transport
        .eval_value("document.readyState", json!("complete"))
        .await;

    let response = h
        .dispatcher
        .dispatch(call(
            "navigate_to_url",
            json!({ "url": "https://example.com/dash" }),
        ))
        .await;
    assert!(response.ok, "{:?}", response.error);
    assert_eq!(
        response.result,
        Some(json!({ "status": "navigated", "url": "https://example.com/dash" }))
    );

    let sent = h.transport.sent.lock().await;
    let nav = sent.iter().find(|(m, _)| m == "Page.navigate").unwrap();
    assert_eq!(nav.1["url"], "https://example.com/dash");
}

#[tokio::test]
async fn navigation_times_out_when_document_never_loads() {
    let h = harness();
    h.transport
        .eval_value("document.readyState", json!("loading"))
        .await;

    let response = h
        .dispatcher
        .dispatch(call(
            "navigate_to_url",
            json!({ "url": "https://slow.example/", "timeout_ms": 150 }),
        ))
        .await;
    assert!(!response.ok);
    let error = response.error.unwrap();
    assert_eq!(error.kind, "NavigationTimeout");
    assert!(error.message.contains("150ms"));
}

#[tokio::test]
async fn reload_confirms_after_readiness() {
    let h = harness();
    h.transport
        .eval_value("document.readyState", json!("complete"))
        .await;

    let response = h.dispatcher.dispatch(call("reload_page", json!({}))).await;
    assert!(response.ok, "{:?}", response.error);
    assert_eq!(response.result, Some(json!({ "status": "reloaded" })));

    let methods = h.transport.sent_methods().await;
    assert!(methods.iter().any(|m| m == "Page.reload"));
}
