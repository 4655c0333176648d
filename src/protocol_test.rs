use super::*;
use serde_json::json;

use crate::state::DisplayState;

fn encode(message: &Outbound<Value>) -> Value {
    serde_json::to_value(message).unwrap()
}

#[test]
fn outbound_messages_are_flat_single_key_objects() {
    assert_eq!(
        encode(&Outbound::Auth { auth_token: "tok".into() }),
        json!({ "auth_token": "tok" })
    );
    assert_eq!(
        encode(&Outbound::State { state: json!({ "id": "s1" }) }),
        json!({ "state": { "id": "s1" } })
    );
    assert_eq!(encode(&Outbound::get()), json!({ "get": true }));
    assert_eq!(encode(&Outbound::Ping { ping: "AB12".into() }), json!({ "ping": "AB12" }));
    assert_eq!(encode(&Outbound::Pong { pong: json!(7) }), json!({ "pong": 7 }));
}

#[test]
fn inbound_fields_are_independent_and_optional() {
    let msg: Inbound<DisplayState> = decode(r#"{"auth":true}"#).unwrap().typed().unwrap();
    assert_eq!(msg.auth, Some(true));
    assert!(msg.state.is_none());
    assert!(msg.ping.is_none());
    assert!(msg.pong.is_none());

    let msg: Inbound<DisplayState> =
        decode(r#"{"state":{"id":"s1","content":{"title":"Hi"},"slide_type_id":null},"ping":"p"}"#)
            .unwrap()
            .typed()
            .unwrap();
    let state = msg.state.expect("state should decode");
    assert_eq!(state.id, "s1");
    assert_eq!(state.content.get("title").map(String::as_str), Some("Hi"));
    assert_eq!(msg.ping, Some(json!("p")));
}

#[test]
fn inbound_ignores_unknown_fields() {
    let msg = decode(r#"{"pong":"x","extra":[1,2,3]}"#).unwrap();
    assert!(msg.is_pong_for("x"));
}

#[test]
fn inbound_rejects_non_json() {
    assert!(decode("not json").is_err());
    assert!(decode(r#"{"auth":"yes"}"#).is_err());
}

#[test]
fn mistyped_state_fails_typing_but_keeps_ping() {
    let raw = decode(r#"{"state":{"id":5},"ping":"p"}"#).unwrap();
    assert_eq!(raw.ping, Some(json!("p")));
    assert!(raw.typed::<DisplayState>().is_err());
}

#[test]
fn pong_match_requires_exact_token() {
    let msg = decode(r#"{"pong":"ZZ99"}"#).unwrap();
    assert!(msg.is_pong_for("ZZ99"));
    assert!(!msg.is_pong_for("AB12CD34"));

    let numeric = decode(r#"{"pong":99}"#).unwrap();
    assert!(!numeric.is_pong_for("99"));
}

#[test]
fn random_token_is_alphanumeric_with_requested_length() {
    let token = random_token(PING_TOKEN_LEN);
    assert_eq!(token.len(), PING_TOKEN_LEN);
    assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_ne!(random_token(PING_TOKEN_LEN), token);
}
