//! WebSocket endpoint for speaker verification.
//!
//! Protocol:
//! 1. Client sends `start_verify`.
//! 2. Server answers with a random digit `prompt`.
//! 3. Client sends binary audio; server answers `verify_result`.
//! 4. On a failed voice attempt with a registered PIN the client may keep
//!    sending `verify_pin` until it matches or the session times out.

use axum::{
    extract::{State, WebSocketUpgrade, ws::WebSocket},
    response::Response,
};
use koegate_services::verify::{VerifyError, VerifyOutcome, VerifyState};
use tracing::{debug, info, warn};

use crate::state::AppState;

use super::messages::{ClientMessage, ErrorCode, ServerMessage};
use super::session::{Frame, SessionChannel, SessionError};

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let idle = state.idle_timeout();
    let mut channel = SessionChannel::new(socket, idle);

    if let Err(e) = run_session(&mut channel, &state).await {
        match e {
            SessionError::Timeout => {
                channel
                    .send_error(ErrorCode::Timeout, "タイムアウトしました")
                    .await;
            }
            SessionError::InvalidMessage(detail) => {
                debug!(%detail, "invalid verify message");
                channel
                    .send_error(ErrorCode::InvalidMessage, "無効なメッセージです")
                    .await;
            }
            SessionError::Closed => {}
        }
    }

    channel.close().await;
    debug!("verify connection closed");
}

async fn run_session(
    channel: &mut SessionChannel,
    state: &AppState,
) -> Result<(), SessionError> {
    let speaker_id = match channel.recv().await? {
        Frame::Control(ClientMessage::StartVerify { speaker_id }) => speaker_id,
        _ => {
            channel
                .send_error(
                    ErrorCode::InvalidMessage,
                    "最初のメッセージはstart_verifyである必要があります",
                )
                .await;
            return Ok(());
        }
    };

    let mut session = match state.verify.start(speaker_id).await {
        Ok(session) => session,
        Err(VerifyError::SpeakerNotFound(id)) => {
            channel
                .send_error(
                    ErrorCode::SpeakerNotFound,
                    format!("Speaker '{id}' が見つかりません"),
                )
                .await;
            return Ok(());
        }
        Err(e) => {
            warn!(%e, "failed to start verification");
            channel
                .send_error(ErrorCode::InternalError, "内部エラーが発生しました")
                .await;
            return Ok(());
        }
    };

    channel
        .send(&ServerMessage::Prompt {
            prompt: session.prompt.clone(),
            length: session.prompt.len(),
        })
        .await;

    // Voice attempt.
    while session.state == VerifyState::AwaitingAudio {
        match channel.recv().await? {
            Frame::Audio(audio) => {
                // Child token: a disconnect mid-utterance aborts the
                // pipeline at its next checkpoint.
                let attempt = channel.cancel_token().child_token();
                let scoring = state.verify.verify_voice(&mut session, audio, &attempt);
                let outcome = channel.drive(&attempt, scoring).await?;
                match outcome {
                    Ok(outcome) => {
                        let authenticated = outcome.authenticated;
                        send_verify_result(channel, outcome).await;
                        if authenticated {
                            info!(speaker_id = %session.speaker_id, "verified by voice");
                            return Ok(());
                        }
                    }
                    Err(VerifyError::Cancelled) => return Err(SessionError::Closed),
                    Err(e) => {
                        warn!(%e, "verification processing failed");
                        channel
                            .send_error(ErrorCode::InternalError, "内部エラーが発生しました")
                            .await;
                        return Ok(());
                    }
                }
            }
            Frame::Control(_) => {
                channel
                    .send_error(
                        ErrorCode::InvalidMessage,
                        "音声データ（バイナリ）が期待されています",
                    )
                    .await;
            }
        }
    }

    // PIN fallback: wrong PINs re-prompt until timeout or disconnect.
    while session.state == VerifyState::AwaitingPin {
        let pin = match channel.recv().await? {
            Frame::Control(ClientMessage::VerifyPin { pin }) => pin,
            _ => {
                channel
                    .send_error(
                        ErrorCode::InvalidMessage,
                        "verify_pinメッセージが期待されています",
                    )
                    .await;
                return Ok(());
            }
        };

        match state.verify.verify_pin(&mut session, &pin).await {
            Ok(outcome) => {
                let authenticated = outcome.authenticated;
                send_verify_result(channel, outcome).await;
                if authenticated {
                    info!(speaker_id = %session.speaker_id, "verified by PIN");
                    return Ok(());
                }
            }
            Err(VerifyError::PinNotSet) => {
                channel
                    .send_error(ErrorCode::PinNotSet, "PINが登録されていません")
                    .await;
                return Ok(());
            }
            Err(VerifyError::SpeakerNotFound(id)) => {
                channel
                    .send_error(
                        ErrorCode::SpeakerNotFound,
                        format!("Speaker '{id}' が見つかりません"),
                    )
                    .await;
                return Ok(());
            }
            Err(e) => {
                warn!(%e, "PIN verification failed");
                channel
                    .send_error(ErrorCode::InternalError, "内部エラーが発生しました")
                    .await;
                return Ok(());
            }
        }
    }

    Ok(())
}

async fn send_verify_result(channel: &SessionChannel, outcome: VerifyOutcome) {
    channel
        .send(&ServerMessage::VerifyResult {
            authenticated: outcome.authenticated,
            speaker_id: outcome.speaker_id,
            asr_result: outcome.asr_result,
            asr_matched: outcome.asr_matched,
            voice_similarity: outcome.voice_similarity,
            digit_scores: outcome.digit_scores,
            can_fallback_to_pin: (outcome.can_fallback_to_pin && !outcome.authenticated)
                .then_some(true),
            auth_method: outcome.auth_method,
            message: outcome.message,
        })
        .await;
}
