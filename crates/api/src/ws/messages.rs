//! Wire grammar for the duplex session channel.
//!
//! Control frames are JSON objects discriminated by a `type` field; audio
//! travels as opaque binary frames and never appears here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StartEnrollment {
        speaker_id: String,
        #[serde(default)]
        speaker_name: Option<String>,
    },
    RegisterPin {
        pin: String,
    },
    StartVerify {
        speaker_id: String,
    },
    VerifyPin {
        pin: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full enrollment prompt schedule, sent once at session start.
    Prompts {
        speaker_id: String,
        prompts: Vec<String>,
        total_sets: usize,
        current_set: usize,
    },
    /// Per-set enrollment outcome.
    AsrResult {
        success: bool,
        asr_result: String,
        set_index: usize,
        remaining_sets: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_count: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_retries: Option<u32>,
        message: String,
    },
    EnrollmentComplete {
        speaker_id: String,
        registered_digits: Vec<String>,
        has_pin: bool,
        status: &'static str,
    },
    /// Verification challenge.
    Prompt {
        prompt: String,
        length: usize,
    },
    VerifyResult {
        authenticated: bool,
        speaker_id: String,
        asr_result: String,
        asr_matched: bool,
        voice_similarity: Option<f64>,
        digit_scores: Option<BTreeMap<String, f64>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        can_fallback_to_pin: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth_method: Option<&'static str>,
        message: String,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

/// Stable machine-readable error codes. Human messages are localized; the
/// codes are the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidMessage,
    InvalidAudio,
    InvalidPin,
    SpeakerNotFound,
    SpeakerAlreadyExists,
    PinNotSet,
    MaxRetriesExceeded,
    EnrollmentFailed,
    Timeout,
    InternalError,
}
