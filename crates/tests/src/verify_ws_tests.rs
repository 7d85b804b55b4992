use serde_json::json;

use crate::fixtures::test_app::{TestApp, expect_closed, recv_json, send_audio, send_json};

async fn start_verify(app: &TestApp, speaker_id: &str) -> (crate::fixtures::test_app::WsClient, String) {
    let mut ws = app.ws_verify().await;
    send_json(&mut ws, json!({"type": "start_verify", "speaker_id": speaker_id})).await;
    let prompt_msg = recv_json(&mut ws).await;
    assert_eq!(prompt_msg["type"], "prompt");
    let prompt = prompt_msg["prompt"].as_str().unwrap().to_string();
    assert_eq!(prompt_msg["length"], prompt.len());
    assert!((4..=6).contains(&prompt.len()));
    assert!(prompt.bytes().all(|b| b.is_ascii_digit()));
    (ws, prompt)
}

#[tokio::test]
async fn matching_voice_authenticates() {
    let app = TestApp::spawn().await;
    app.gallery.seed("u1", "alice", Some("1234"));

    let (mut ws, prompt) = start_verify(&app, "u1").await;
    send_audio(&mut ws, &format!("{prompt}:alice")).await;

    let result = recv_json(&mut ws).await;
    assert_eq!(result["type"], "verify_result");
    assert_eq!(result["authenticated"], true);
    assert_eq!(result["speaker_id"], "u1");
    assert_eq!(result["asr_matched"], true);
    assert_eq!(result["auth_method"], "voice");
    assert!(result["voice_similarity"].as_f64().unwrap() >= 0.75);
    assert_eq!(result["message"], "認証成功");

    // One score per distinct challenge digit.
    let scores = result["digit_scores"].as_object().unwrap();
    for d in prompt.chars() {
        let score = scores[&d.to_string()].as_f64().unwrap();
        assert!(score >= 0.75);
    }
    assert!(result.get("can_fallback_to_pin").is_none());
}

#[tokio::test]
async fn wrong_voice_falls_back_to_pin() {
    let app = TestApp::spawn().await;
    app.gallery.seed("u2", "alice", Some("1234"));

    let (mut ws, prompt) = start_verify(&app, "u2").await;
    // Right digits, wrong speaker.
    send_audio(&mut ws, &format!("{prompt}:bob")).await;

    let result = recv_json(&mut ws).await;
    assert_eq!(result["authenticated"], false);
    assert_eq!(result["asr_matched"], true);
    assert!(result["voice_similarity"].as_f64().unwrap() < 0.75);
    assert_eq!(result["can_fallback_to_pin"], true);
    assert_eq!(result["message"], "声紋が一致しません");

    // Wrong PIN keeps the fallback open.
    send_json(&mut ws, json!({"type": "verify_pin", "pin": "0000"})).await;
    let result = recv_json(&mut ws).await;
    assert_eq!(result["authenticated"], false);
    assert_eq!(result["can_fallback_to_pin"], true);
    assert_eq!(result["message"], "PINが一致しません");

    // Correct PIN authenticates.
    send_json(&mut ws, json!({"type": "verify_pin", "pin": "1234"})).await;
    let result = recv_json(&mut ws).await;
    assert_eq!(result["authenticated"], true);
    assert_eq!(result["auth_method"], "pin");
    assert_eq!(result["message"], "PIN認証成功");
}

#[tokio::test]
async fn wrong_digits_are_a_terminal_failure() {
    let app = TestApp::spawn().await;
    app.gallery.seed("u3", "alice", Some("1234"));

    let (mut ws, _prompt) = start_verify(&app, "u3").await;
    // Seven digits can never match a 4-6 digit challenge.
    send_audio(&mut ws, "9999999:alice").await;

    let result = recv_json(&mut ws).await;
    assert_eq!(result["authenticated"], false);
    assert_eq!(result["asr_matched"], false);
    assert!(result["voice_similarity"].is_null());
    // A content mismatch never offers the PIN fallback, even though a PIN
    // is registered.
    assert!(result.get("can_fallback_to_pin").is_none());
    assert_eq!(result["message"], "発話内容がプロンプトと一致しません");

    // The session is terminal: the server hangs up.
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn wrong_voice_without_pin_is_terminal() {
    let app = TestApp::spawn().await;
    app.gallery.seed("u4", "alice", None);

    let (mut ws, prompt) = start_verify(&app, "u4").await;
    send_audio(&mut ws, &format!("{prompt}:bob")).await;

    let result = recv_json(&mut ws).await;
    assert_eq!(result["authenticated"], false);
    assert!(result.get("can_fallback_to_pin").is_none());
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn unknown_speaker_is_an_error() {
    let app = TestApp::spawn().await;
    let mut ws = app.ws_verify().await;

    send_json(&mut ws, json!({"type": "start_verify", "speaker_id": "ghost"})).await;
    let error = recv_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "SPEAKER_NOT_FOUND");
}

#[tokio::test]
async fn unusable_audio_is_a_terminal_failure() {
    let app = TestApp::spawn().await;
    app.gallery.seed("u5", "alice", Some("1234"));

    let (mut ws, _prompt) = start_verify(&app, "u5").await;
    send_audio(&mut ws, "SILENCE").await;

    let result = recv_json(&mut ws).await;
    assert_eq!(result["type"], "verify_result");
    assert_eq!(result["authenticated"], false);
    assert_eq!(result["asr_matched"], false);
    assert!(result.get("can_fallback_to_pin").is_none());
    expect_closed(&mut ws).await;
}
