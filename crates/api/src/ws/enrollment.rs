//! WebSocket endpoint for speaker enrollment.
//!
//! Protocol:
//! 1. Client sends `start_enrollment`.
//! 2. Server sends `prompts` with the full five-set schedule.
//! 3. For each set the client sends binary audio and the server answers
//!    with `asr_result`; failures retry the same prompt.
//! 4. Client sends `register_pin`, server answers `enrollment_complete`.

use axum::{
    extract::{State, WebSocketUpgrade, ws::WebSocket},
    response::Response,
};
use koegate_services::enrollment::{EnrollmentError, EnrollmentState};
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
                debug!(%detail, "invalid enrollment message");
                channel
                    .send_error(ErrorCode::InvalidMessage, "無効なメッセージです")
                    .await;
            }
            SessionError::Closed => {}
        }
    }

    channel.close().await;
    debug!("enrollment connection closed");
}

async fn run_session(
    channel: &mut SessionChannel,
    state: &AppState,
) -> Result<(), SessionError> {
    // First frame must open the session.
    let (speaker_id, speaker_name) = match channel.recv().await? {
        Frame::Control(ClientMessage::StartEnrollment {
            speaker_id,
            speaker_name,
        }) => (speaker_id, speaker_name),
        _ => {
            channel
                .send_error(
                    ErrorCode::InvalidMessage,
                    "最初のメッセージはstart_enrollmentである必要があります",
                )
                .await;
            return Ok(());
        }
    };

    let mut session = match state.enrollment.start(speaker_id, speaker_name).await {
        Ok(session) => session,
        Err(EnrollmentError::SpeakerAlreadyExists(id)) => {
            channel
                .send_error(
                    ErrorCode::SpeakerAlreadyExists,
                    format!("Speaker '{id}' は既に登録されています"),
                )
                .await;
            return Ok(());
        }
        Err(e) => {
            warn!(%e, "failed to start enrollment");
            channel
                .send_error(ErrorCode::InternalError, "内部エラーが発生しました")
                .await;
            return Ok(());
        }
    };

    channel
        .send(&ServerMessage::Prompts {
            speaker_id: session.speaker_id.clone(),
            prompts: session.prompts.clone(),
            total_sets: session.prompts.len(),
            current_set: 0,
        })
        .await;

    // Audio phase: five accepted sets, same prompt on retry.
    while session.state == EnrollmentState::AwaitingAudio {
        match channel.recv().await? {
            Frame::Audio(audio) => {
                // Child token: a disconnect mid-utterance aborts the
                // pipeline at its next checkpoint.
                let attempt = channel.cancel_token().child_token();
                let processing = state.enrollment.process_audio(&mut session, audio, &attempt);
                let outcome = channel.drive(&attempt, processing).await?;

                match outcome {
                    Ok(outcome) => {
                        channel
                            .send(&ServerMessage::AsrResult {
                                success: outcome.success,
                                asr_result: outcome.asr_text,
                                set_index: outcome.set_index,
                                remaining_sets: outcome.remaining_sets,
                                retry_count: (!outcome.success).then_some(outcome.retry_count),
                                max_retries: (!outcome.success).then_some(outcome.max_retries),
                                message: outcome.message,
                            })
                            .await;
                    }
                    Err(EnrollmentError::MaxRetriesExceeded { max_retries }) => {
                        channel
                            .send_error(
                                ErrorCode::MaxRetriesExceeded,
                                format!("リトライ上限({max_retries}回)に達しました"),
                            )
                            .await;
                        return Ok(());
                    }
                    Err(EnrollmentError::Cancelled) => return Err(SessionError::Closed),
                    Err(e) => {
                        warn!(%e, "enrollment audio processing failed");
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

    // PIN phase. An invalid PIN re-prompts instead of ending the session.
    while session.state == EnrollmentState::AwaitingPin {
        let pin = match channel.recv().await? {
            Frame::Control(ClientMessage::RegisterPin { pin }) => pin,
            _ => {
                channel
                    .send_error(
                        ErrorCode::InvalidMessage,
                        "register_pinメッセージが期待されています",
                    )
                    .await;
                return Ok(());
            }
        };

        let pin = if pin.is_empty() { None } else { Some(pin) };
        match state.enrollment.complete(&mut session, pin.as_deref()).await {
            Ok(result) => {
                info!(speaker_id = %result.speaker_id, "enrollment complete");
                channel
                    .send(&ServerMessage::EnrollmentComplete {
                        speaker_id: result.speaker_id,
                        registered_digits: result.registered_digits,
                        has_pin: result.has_pin,
                        status: "registered",
                    })
                    .await;
                return Ok(());
            }
            Err(EnrollmentError::InvalidPin) => {
                channel
                    .send_error(ErrorCode::InvalidPin, "PINは4桁の数字で入力してください")
                    .await;
            }
            Err(EnrollmentError::SpeakerAlreadyExists(id)) => {
                channel
                    .send_error(
                        ErrorCode::SpeakerAlreadyExists,
                        format!("Speaker '{id}' は既に登録されています"),
                    )
                    .await;
                return Ok(());
            }
            Err(e) => {
                warn!(%e, "enrollment commit failed");
                channel
                    .send_error(ErrorCode::EnrollmentFailed, "登録に失敗しました")
                    .await;
                return Ok(());
            }
        }
    }

    Ok(())
}
