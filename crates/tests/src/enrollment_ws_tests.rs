use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;

use crate::fixtures::fakes::BlockingProcessor;
use crate::fixtures::test_app::{TestApp, recv_json, recv_json_within, send_audio, send_json};

#[tokio::test]
async fn happy_enrollment_builds_a_complete_gallery() {
    let app = TestApp::spawn().await;
    let mut ws = app.ws_enrollment().await;

    send_json(
        &mut ws,
        json!({"type": "start_enrollment", "speaker_id": "u1", "speaker_name": "Alice"}),
    )
    .await;

    let prompts_msg = recv_json(&mut ws).await;
    assert_eq!(prompts_msg["type"], "prompts");
    assert_eq!(prompts_msg["speaker_id"], "u1");
    assert_eq!(prompts_msg["total_sets"], 5);
    assert_eq!(prompts_msg["current_set"], 0);

    let prompts: Vec<String> = prompts_msg["prompts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_str().unwrap().to_string())
        .collect();
    assert_eq!(prompts.len(), 5);

    // Balanced schedule: every digit exactly twice, no adjacent repeats.
    let mut counts: HashMap<char, usize> = HashMap::new();
    for p in &prompts {
        assert_eq!(p.len(), 4);
        assert!(!p.as_bytes().windows(2).any(|w| w[0] == w[1]));
        for c in p.chars() {
            *counts.entry(c).or_default() += 1;
        }
    }
    for d in '0'..='9' {
        assert_eq!(counts[&d], 2, "digit {} not balanced", d);
    }

    // Utter every prompt correctly.
    for (i, prompt) in prompts.iter().enumerate() {
        send_audio(&mut ws, &format!("{prompt}:alice")).await;
        let result = recv_json(&mut ws).await;
        assert_eq!(result["type"], "asr_result");
        assert_eq!(result["success"], true);
        assert_eq!(result["set_index"], i);
        assert_eq!(result["remaining_sets"], 4 - i);
        assert_eq!(result["asr_result"], prompt.as_str());
        assert!(result.get("retry_count").is_none());
    }

    send_json(&mut ws, json!({"type": "register_pin", "pin": "1234"})).await;
    let complete = recv_json(&mut ws).await;
    assert_eq!(complete["type"], "enrollment_complete");
    assert_eq!(complete["speaker_id"], "u1");
    assert_eq!(complete["has_pin"], true);
    assert_eq!(complete["status"], "registered");
    assert_eq!(complete["registered_digits"].as_array().unwrap().len(), 10);

    // Gallery completeness: ten unit centroids.
    let stored = app.gallery.snapshot("u1").expect("speaker committed");
    assert_eq!(stored.centroids.len(), 10);
    for centroid in stored.centroids.values() {
        let norm: f32 = centroid.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
    assert!(stored.pin.is_some());
}

#[tokio::test]
async fn mismatched_set_retries_with_the_same_prompt() {
    let app = TestApp::spawn().await;
    let mut ws = app.ws_enrollment().await;

    send_json(
        &mut ws,
        json!({"type": "start_enrollment", "speaker_id": "u2"}),
    )
    .await;
    let prompts_msg = recv_json(&mut ws).await;
    let prompt = prompts_msg["prompts"][0].as_str().unwrap().to_string();

    // Utter something else first.
    let wrong = if prompt == "1212" { "3434" } else { "1212" };
    send_audio(&mut ws, wrong).await;
    let result = recv_json(&mut ws).await;
    assert_eq!(result["success"], false);
    assert_eq!(result["retry_count"], 1);
    assert_eq!(result["max_retries"], 5);
    assert_eq!(result["set_index"], 0);
    assert_eq!(result["asr_result"], wrong);

    // Same prompt, correct utterance.
    send_audio(&mut ws, &prompt).await;
    let result = recv_json(&mut ws).await;
    assert_eq!(result["success"], true);
    assert_eq!(result["set_index"], 0);
    assert_eq!(result["remaining_sets"], 4);
}

#[tokio::test]
async fn unusable_audio_counts_as_a_retry() {
    let app = TestApp::spawn().await;
    let mut ws = app.ws_enrollment().await;

    send_json(
        &mut ws,
        json!({"type": "start_enrollment", "speaker_id": "u3"}),
    )
    .await;
    let prompts_msg = recv_json(&mut ws).await;
    let prompt = prompts_msg["prompts"][0].as_str().unwrap().to_string();

    send_audio(&mut ws, "SILENCE").await;
    let result = recv_json(&mut ws).await;
    assert_eq!(result["success"], false);
    assert_eq!(result["retry_count"], 1);

    send_audio(&mut ws, "GARBAGE").await;
    let result = recv_json(&mut ws).await;
    assert_eq!(result["success"], false);
    assert_eq!(result["retry_count"], 2);

    send_audio(&mut ws, &prompt).await;
    let result = recv_json(&mut ws).await;
    assert_eq!(result["success"], true);
}

#[tokio::test]
async fn retry_exhaustion_fails_the_session() {
    let app = TestApp::spawn().await;
    let mut ws = app.ws_enrollment().await;

    send_json(
        &mut ws,
        json!({"type": "start_enrollment", "speaker_id": "u4"}),
    )
    .await;
    let prompts_msg = recv_json(&mut ws).await;
    let prompt = prompts_msg["prompts"][0].as_str().unwrap().to_string();
    let wrong = if prompt == "1212" { "3434" } else { "1212" };

    // Four failures leave one retry; the fifth ends the session.
    for attempt in 1..=4u32 {
        send_audio(&mut ws, wrong).await;
        let result = recv_json(&mut ws).await;
        assert_eq!(result["success"], false);
        assert_eq!(result["retry_count"], attempt);
    }
    send_audio(&mut ws, wrong).await;
    let error = recv_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "MAX_RETRIES_EXCEEDED");

    // Nothing was persisted.
    assert!(app.gallery.snapshot("u4").is_none());
    assert_eq!(app.gallery.commit_count(), 0);
}

#[tokio::test]
async fn existing_speaker_is_rejected_outright() {
    let app = TestApp::spawn().await;
    app.gallery.seed("taken", "alice", None);

    let mut ws = app.ws_enrollment().await;
    send_json(
        &mut ws,
        json!({"type": "start_enrollment", "speaker_id": "taken"}),
    )
    .await;

    let error = recv_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "SPEAKER_ALREADY_EXISTS");
}

#[tokio::test]
async fn invalid_pin_reprompts_and_enrollment_still_completes() {
    let app = TestApp::spawn().await;
    let mut ws = app.ws_enrollment().await;

    send_json(
        &mut ws,
        json!({"type": "start_enrollment", "speaker_id": "u5"}),
    )
    .await;
    let prompts_msg = recv_json(&mut ws).await;
    let prompts: Vec<String> = prompts_msg["prompts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_str().unwrap().to_string())
        .collect();

    for prompt in &prompts {
        send_audio(&mut ws, prompt).await;
        let result = recv_json(&mut ws).await;
        assert_eq!(result["success"], true);
    }

    send_json(&mut ws, json!({"type": "register_pin", "pin": "12ab"})).await;
    let error = recv_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "INVALID_PIN");

    // The session is still waiting for a PIN.
    send_json(&mut ws, json!({"type": "register_pin", "pin": "9876"})).await;
    let complete = recv_json(&mut ws).await;
    assert_eq!(complete["type"], "enrollment_complete");
    assert_eq!(complete["has_pin"], true);
}

#[tokio::test]
async fn empty_pin_enrolls_without_fallback_factor() {
    let app = TestApp::spawn().await;
    let mut ws = app.ws_enrollment().await;

    send_json(
        &mut ws,
        json!({"type": "start_enrollment", "speaker_id": "u6"}),
    )
    .await;
    let prompts_msg = recv_json(&mut ws).await;
    let prompts: Vec<String> = prompts_msg["prompts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_str().unwrap().to_string())
        .collect();

    for prompt in &prompts {
        send_audio(&mut ws, prompt).await;
        recv_json(&mut ws).await;
    }

    send_json(&mut ws, json!({"type": "register_pin", "pin": ""})).await;
    let complete = recv_json(&mut ws).await;
    assert_eq!(complete["type"], "enrollment_complete");
    assert_eq!(complete["has_pin"], false);

    let stored = app.gallery.snapshot("u6").unwrap();
    assert!(stored.pin.is_none());
}

#[tokio::test]
async fn wrong_first_message_is_rejected() {
    let app = TestApp::spawn().await;
    let mut ws = app.ws_enrollment().await;

    send_json(&mut ws, json!({"type": "register_pin", "pin": "1234"})).await;
    let error = recv_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "INVALID_MESSAGE");
}

#[tokio::test]
async fn idle_session_times_out() {
    let app = TestApp::spawn_with_settings(|s| s.auth.idle_timeout_secs = 1).await;
    let mut ws = app.ws_enrollment().await;

    send_json(
        &mut ws,
        json!({"type": "start_enrollment", "speaker_id": "u7"}),
    )
    .await;
    let prompts_msg = recv_json(&mut ws).await;
    assert_eq!(prompts_msg["type"], "prompts");

    // Stay silent past the idle timer.
    let error = recv_json_within(&mut ws, Duration::from_secs(5)).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "TIMEOUT");
}

#[tokio::test]
async fn disconnect_mid_pipeline_cancels_in_flight_work() {
    let processor = Arc::new(BlockingProcessor::default());
    let app = TestApp::spawn_with_processor(processor.clone()).await;
    let mut ws = app.ws_enrollment().await;

    send_json(
        &mut ws,
        json!({"type": "start_enrollment", "speaker_id": "u9"}),
    )
    .await;
    let prompts_msg = recv_json(&mut ws).await;
    assert_eq!(prompts_msg["type"], "prompts");

    // The blocking processor parks on its cancellation token.
    send_audio(&mut ws, "0000").await;
    wait_until(|| processor.calls.load(Ordering::SeqCst) == 1).await;

    // Vanish mid-utterance; the disconnect must reach the pipeline.
    drop(ws);
    wait_until(|| processor.cancellations.load(Ordering::SeqCst) == 1).await;

    assert!(app.gallery.snapshot("u9").is_none());
    assert_eq!(app.gallery.commit_count(), 0);
}

async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test]
async fn no_audio_is_persisted_after_sessions() {
    let app = TestApp::spawn().await;
    let mut ws = app.ws_enrollment().await;

    send_json(
        &mut ws,
        json!({"type": "start_enrollment", "speaker_id": "u8"}),
    )
    .await;
    let prompts_msg = recv_json(&mut ws).await;
    let prompts: Vec<String> = prompts_msg["prompts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_str().unwrap().to_string())
        .collect();

    let mut submitted: Vec<Vec<u8>> = Vec::new();
    for prompt in &prompts {
        let payload = format!("{prompt}:alice");
        submitted.push(payload.as_bytes().to_vec());
        send_audio(&mut ws, &payload).await;
        recv_json(&mut ws).await;
    }
    send_json(&mut ws, json!({"type": "register_pin", "pin": "1234"})).await;
    recv_json(&mut ws).await;

    // The store holds centroids and a digest, nothing byte-equal to any
    // submitted audio frame.
    let stored = app.gallery.snapshot("u8").unwrap();
    for centroid in stored.centroids.values() {
        let bytes: Vec<u8> = centroid.iter().flat_map(|f| f.to_le_bytes()).collect();
        assert!(submitted.iter().all(|audio| *audio != bytes));
    }
    let digest = stored.pin.unwrap();
    assert!(submitted.iter().all(|audio| *audio != digest.digest.bytes));
}
