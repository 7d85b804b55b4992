//! Per-connection plumbing shared by both session endpoints: framed
//! receive with an idle timer, typed sends, and cooperative cancellation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::messages::{ClientMessage, ErrorCode, ServerMessage};

/// One inbound frame after demultiplexing.
#[derive(Debug)]
pub enum Frame {
    Control(ClientMessage),
    Audio(Vec<u8>),
}

#[derive(Debug)]
pub enum SessionError {
    /// Idle timer expired.
    Timeout,
    /// Peer closed or the transport failed.
    Closed,
    /// A text frame that is not a valid control message.
    InvalidMessage(String),
}

/// The duplex channel of one session.
///
/// Every receive is bounded by the idle timer; any inbound frame resets
/// it. The cancellation token fires when the session ends for any reason,
/// aborting in-flight pipeline work.
pub struct SessionChannel {
    sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    receiver: SplitStream<WebSocket>,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

impl SessionChannel {
    pub fn new(socket: WebSocket, idle_timeout: Duration) -> Self {
        let (sender, receiver) = socket.split();
        Self {
            sender: Arc::new(Mutex::new(sender)),
            receiver,
            idle_timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Receives the next control or audio frame.
    ///
    /// Pings are answered inline; pongs and empty frames restart the wait
    /// (and with it the idle timer).
    pub async fn recv(&mut self) -> Result<Frame, SessionError> {
        loop {
            let next = tokio::time::timeout(self.idle_timeout, self.receiver.next()).await;
            let message = match next {
                Err(_) => return Err(SessionError::Timeout),
                Ok(None) => return Err(SessionError::Closed),
                Ok(Some(Err(e))) => {
                    debug!(%e, "WebSocket receive error");
                    return Err(SessionError::Closed);
                }
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => {
                    return serde_json::from_str::<ClientMessage>(text.as_str())
                        .map(Frame::Control)
                        .map_err(|e| SessionError::InvalidMessage(e.to_string()));
                }
                Message::Binary(data) => return Ok(Frame::Audio(data.to_vec())),
                Message::Ping(payload) => {
                    let mut guard = self.sender.lock().await;
                    let _ = guard.send(Message::Pong(payload)).await;
                }
                Message::Pong(_) => {}
                Message::Close(_) => return Err(SessionError::Closed),
            }
        }
    }

    /// Awaits an in-flight pipeline call while keeping watch on the socket.
    ///
    /// The protocol is strictly request-response, so nothing legitimate
    /// arrives while work is outstanding: any frame, a disconnect, or the
    /// idle timer cancels `attempt`, waits for the pipeline to unwind past
    /// its next checkpoint, and surfaces the interruption instead of the
    /// work's result.
    pub async fn drive<T>(
        &mut self,
        attempt: &CancellationToken,
        work: impl Future<Output = T>,
    ) -> Result<T, SessionError> {
        tokio::pin!(work);
        tokio::select! {
            result = &mut work => Ok(result),
            received = self.recv() => {
                attempt.cancel();
                // Let the worker observe the cancellation and return to the
                // pool before the session unwinds.
                let _ = work.await;
                match received {
                    Ok(_) => Err(SessionError::InvalidMessage(
                        "frame received while processing".to_string(),
                    )),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Serializes and sends one typed event. Events are emitted strictly in
    /// the order they are passed here.
    pub async fn send(&self, message: &ServerMessage) {
        // Never emit after cancellation.
        if self.cancel.is_cancelled() {
            return;
        }
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!(%e, "failed to serialize server message");
                return;
            }
        };
        let mut guard = self.sender.lock().await;
        if let Err(e) = guard.send(Message::text(text)).await {
            debug!(%e, "failed to send WS message");
        }
    }

    pub async fn send_error(&self, code: ErrorCode, message: impl Into<String>) {
        self.send(&ServerMessage::Error {
            code,
            message: message.into(),
        })
        .await;
    }

    /// Ends the session: cancels in-flight work and closes the socket.
    pub async fn close(&self) {
        self.cancel.cancel();
        let mut guard = self.sender.lock().await;
        let _ = guard.send(Message::Close(None)).await;
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        // Disconnects cancel whatever the pipeline is doing for us.
        self.cancel.cancel();
    }
}
