use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{Signer, SigningKey};
use httpmock::prelude::*;
use kite_access::{InteractionSignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use kite_agents::AgentRegistry;
use kite_conversation::{
    register_conversation_agents, ConversationAgent, ConversationStore, HttpProfileSurface,
    SqliteConversationStore, CONVERSATION_EXPIRED_MESSAGE, DEFAULT_CONVERSATION_TTL_MS,
};
use kite_core::ManualClock;
use kite_gateway::{build_gateway_router, InteractionRouter, INTERACTIONS_ENDPOINT};
use serde_json::{json, Value};
use tokio::net::TcpListener;

const TIMESTAMP: &str = "1730000000";
const USER_ID: &str = "user-314";

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[11u8; 32])
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn sign(body: &str) -> String {
    let mut message = TIMESTAMP.as_bytes().to_vec();
    message.extend_from_slice(body.as_bytes());
    to_hex(&signing_key().sign(&message).to_bytes())
}

struct Gateway {
    addr: SocketAddr,
    clock: ManualClock,
    handle: tokio::task::JoinHandle<()>,
}

async fn spawn_gateway(db_path: &Path, profile_api_base: &str) -> Gateway {
    let clock = ManualClock::new(1_730_000_000_000);
    let store: Arc<dyn ConversationStore> = Arc::new(
        SqliteConversationStore::new(
            db_path,
            Arc::new(clock.clone()),
            DEFAULT_CONVERSATION_TTL_MS,
        )
        .expect("sqlite store"),
    );
    let surface = Arc::new(
        HttpProfileSurface::new(profile_api_base, Some("backend-token".to_string()), 5_000)
            .expect("profile surface"),
    );
    let conversations = ConversationAgent::new(store, surface, Arc::new(clock.clone()));
    let mut registry = AgentRegistry::new();
    registry.register_help();
    register_conversation_agents(&mut registry, &conversations);
    let verifier =
        InteractionSignatureVerifier::from_public_key_hex(&to_hex(signing_key().verifying_key().as_bytes()))
            .expect("verifier");
    let router = InteractionRouter::new(verifier, registry).with_conversations(conversations);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral listener");
    let addr = listener.local_addr().expect("listener addr");
    let app = build_gateway_router(Arc::new(router));
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    Gateway {
        addr,
        clock,
        handle,
    }
}

async fn post_signed(addr: SocketAddr, payload: &Value) -> (u16, String) {
    let body = payload.to_string();
    let response = reqwest::Client::new()
        .post(format!("http://{addr}{INTERACTIONS_ENDPOINT}"))
        .header(SIGNATURE_HEADER, sign(&body))
        .header(TIMESTAMP_HEADER, TIMESTAMP)
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .expect("send interaction");
    let status = response.status().as_u16();
    let text = response.text().await.expect("response body");
    (status, text)
}

async fn post_json(addr: SocketAddr, payload: &Value) -> Value {
    let (status, text) = post_signed(addr, payload).await;
    assert_eq!(status, 200, "unexpected status with body {text}");
    serde_json::from_str(&text).expect("json response")
}

fn command(name: &str, options: Value) -> Value {
    json!({
        "type": 2,
        "id": "interaction-1",
        "application_id": "app-77",
        "token": "interaction-token",
        "member": {"user": {"id": USER_ID}},
        "data": {"name": name, "options": options}
    })
}

fn component(custom_id: &str) -> Value {
    json!({
        "type": 3,
        "id": "interaction-2",
        "application_id": "app-77",
        "token": "interaction-token",
        "member": {"user": {"id": USER_ID}},
        "data": {"custom_id": custom_id, "component_type": 2}
    })
}

fn button_ids(response: &Value) -> Vec<String> {
    response["data"]["components"]
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|row| row["components"].as_array().cloned().unwrap_or_default())
        .filter_map(|button| button["custom_id"].as_str().map(str::to_string))
        .collect()
}

fn conversation_id_from(response: &Value) -> String {
    button_ids(response)
        .iter()
        .find_map(|custom_id| {
            custom_id
                .strip_prefix("conversation:")
                .and_then(|rest| rest.strip_suffix(":cancel"))
                .map(str::to_string)
        })
        .expect("cancel button carries the conversation id")
}

#[tokio::test]
async fn integration_ping_and_forged_signature_over_http() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let profile_api = MockServer::start();
    let gateway = spawn_gateway(&workspace.path().join("conversations.sqlite"), &profile_api.base_url()).await;

    let pong = post_json(gateway.addr, &json!({"type": 1})).await;
    assert_eq!(pong, json!({"type": 1}));

    let body = json!({"type": 1}).to_string();
    let forged = to_hex(&SigningKey::from_bytes(&[12u8; 32]).sign(body.as_bytes()).to_bytes());
    let response = reqwest::Client::new()
        .post(format!("http://{}{INTERACTIONS_ENDPOINT}", gateway.addr))
        .header(SIGNATURE_HEADER, forged)
        .header(TIMESTAMP_HEADER, TIMESTAMP)
        .body(body)
        .send()
        .await
        .expect("send forged");
    assert_eq!(response.status().as_u16(), 401);
    assert!(response.text().await.expect("body").is_empty());

    gateway.handle.abort();
}

#[tokio::test]
async fn integration_two_turn_profile_edit_is_confirmed_and_applied_once() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let profile_api = MockServer::start();
    let update = profile_api.mock(|when, then| {
        when.method(PATCH)
            .path(format!("/api/profiles/{USER_ID}/profile"))
            .header("authorization", "Bearer backend-token")
            .json_body_includes(json!({"updates": {"headline": "Staff engineer"}}).to_string());
        then.status(204);
    });
    let gateway = spawn_gateway(&workspace.path().join("conversations.sqlite"), &profile_api.base_url()).await;

    let started = post_json(
        gateway.addr,
        &command(
            "edit-profile",
            json!([
                {"name": "section", "type": 3, "value": "profile"},
                {"name": "request", "type": 3, "value": "make it better"}
            ]),
        ),
    )
    .await;
    assert_eq!(started["type"], 4);
    assert_eq!(started["data"]["flags"], 64);
    let content = started["data"]["content"].as_str().expect("content");
    assert!(content.starts_with("I need a bit more detail"));
    let conversation_id = conversation_id_from(&started);

    gateway.clock.advance_ms(30_000);
    let preview = post_json(
        gateway.addr,
        &command(
            "reply",
            json!([
                {"name": "conversation", "type": 3, "value": conversation_id},
                {"name": "message", "type": 3, "value": "headline: Staff engineer"}
            ]),
        ),
    )
    .await;
    assert!(preview["data"]["content"]
        .as_str()
        .is_some_and(|text| text.contains("headline: Staff engineer")));
    let confirm_id = format!("conversation:{conversation_id}:confirm");
    assert!(button_ids(&preview).contains(&confirm_id));
    update.assert_calls(0);

    let confirmed = post_json(gateway.addr, &component(&confirm_id)).await;
    assert_eq!(confirmed["type"], 7);
    assert!(confirmed["data"]["content"]
        .as_str()
        .is_some_and(|text| text.starts_with("Done!")));
    update.assert_calls(1);

    let replayed = post_json(gateway.addr, &component(&confirm_id)).await;
    assert_eq!(replayed["data"]["content"], CONVERSATION_EXPIRED_MESSAGE);
    update.assert_calls(1);

    gateway.handle.abort();
}

#[tokio::test]
async fn regression_expired_conversation_reply_is_rejected_without_profile_write() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let profile_api = MockServer::start();
    let update = profile_api.mock(|when, then| {
        when.method(PATCH);
        then.status(204);
    });
    let gateway = spawn_gateway(&workspace.path().join("conversations.sqlite"), &profile_api.base_url()).await;

    let started = post_json(
        gateway.addr,
        &command("edit-profile", json!([{"name": "section", "type": 3, "value": "about"}])),
    )
    .await;
    let conversation_id = conversation_id_from(&started);

    gateway.clock.advance_ms(DEFAULT_CONVERSATION_TTL_MS + 1);
    let late = post_json(
        gateway.addr,
        &command(
            "reply",
            json!([
                {"name": "conversation", "type": 3, "value": conversation_id},
                {"name": "message", "type": 3, "value": "bio: I build compilers."}
            ]),
        ),
    )
    .await;
    assert_eq!(late["data"]["content"], CONVERSATION_EXPIRED_MESSAGE);

    let confirm = post_json(
        gateway.addr,
        &component(&format!("conversation:{conversation_id}:confirm")),
    )
    .await;
    assert_eq!(confirm["data"]["content"], CONVERSATION_EXPIRED_MESSAGE);
    update.assert_calls(0);

    gateway.handle.abort();
}

#[tokio::test]
async fn functional_conversation_started_in_one_gateway_continues_in_another() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let db_path = workspace.path().join("conversations.sqlite");
    let profile_api = MockServer::start();
    let first = spawn_gateway(&db_path, &profile_api.base_url()).await;
    let started = post_json(
        first.addr,
        &command("edit-profile", json!([{"name": "section", "type": 3, "value": "links"}])),
    )
    .await;
    let conversation_id = conversation_id_from(&started);
    first.handle.abort();

    let second = spawn_gateway(&db_path, &profile_api.base_url()).await;
    let preview = post_json(
        second.addr,
        &command(
            "reply",
            json!([
                {"name": "conversation", "type": 3, "value": conversation_id},
                {"name": "message", "type": 3, "value": "github: https://github.com/ada"}
            ]),
        ),
    )
    .await;
    assert!(button_ids(&preview).contains(&format!("conversation:{conversation_id}:confirm")));
    second.handle.abort();
}
