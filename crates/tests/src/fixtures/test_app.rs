use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use koegate_api::{build_router, state::AppState};
use koegate_config::Settings;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::fakes::{FakeProcessor, MemoryGallery};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running test server wired over the fake processor and the in-memory
/// gallery. No MongoDB, no model files.
pub struct TestApp {
    pub addr: SocketAddr,
    pub gallery: Arc<MemoryGallery>,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_settings(|_| {}).await
    }

    /// Spawns a test server after letting the caller tweak the settings
    /// (e.g. shorten the idle timeout).
    pub async fn spawn_with_settings(mutator: impl FnOnce(&mut Settings)) -> Self {
        Self::spawn_inner(mutator, Arc::new(FakeProcessor::new())).await
    }

    /// Spawns a test server over a caller-supplied processor (e.g. a
    /// blocking one for cancellation tests).
    pub async fn spawn_with_processor(
        processor: Arc<dyn koegate_engine::pipeline::AudioProcessor>,
    ) -> Self {
        Self::spawn_inner(|_| {}, processor).await
    }

    async fn spawn_inner(
        mutator: impl FnOnce(&mut Settings),
        processor: Arc<dyn koegate_engine::pipeline::AudioProcessor>,
    ) -> Self {
        let mut settings = test_settings();
        mutator(&mut settings);

        let gallery = Arc::new(MemoryGallery::new());
        let app_state = AppState::with_components(settings, processor, gallery.clone())
            .expect("Failed to create AppState");
        let app = build_router(app_state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();

        Self {
            addr,
            gallery,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn ws_connect(&self, path: &str) -> WsClient {
        let url = format!("ws://{}{}", self.addr, path);
        let (ws, _) = connect_async(&url).await.expect("WS connect failed");
        ws
    }

    pub async fn ws_enrollment(&self) -> WsClient {
        self.ws_connect("/ws/enrollment").await
    }

    pub async fn ws_verify(&self) -> WsClient {
        self.ws_connect("/ws/verify").await
    }
}

pub async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("WS send failed");
}

pub async fn send_audio(ws: &mut WsClient, payload: &str) {
    ws.send(Message::Binary(payload.as_bytes().to_vec().into()))
        .await
        .expect("WS send failed");
}

/// Receives the next JSON control frame, skipping transport frames.
pub async fn recv_json(ws: &mut WsClient) -> serde_json::Value {
    recv_json_within(ws, Duration::from_secs(5)).await
}

pub async fn recv_json_within(ws: &mut WsClient, timeout: Duration) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let frame = tokio::time::timeout(remaining, ws.next())
            .await
            .expect("timed out waiting for a server message")
            .expect("connection closed while waiting for a server message")
            .expect("WS receive failed");

        match frame {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("server sent invalid JSON");
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => panic!("connection closed while waiting for a server message"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Asserts that the server hangs up without sending anything further.
pub async fn expect_closed(ws: &mut WsClient) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let frame = tokio::time::timeout(remaining, ws.next())
            .await
            .expect("timed out waiting for the server to close");

        match frame {
            None => return,
            Some(Err(_)) => return,
            Some(Ok(Message::Close(_))) => return,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("unexpected frame before close: {other:?}"),
        }
    }
}

fn test_settings() -> Settings {
    Settings {
        app: koegate_config::AppSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec![],
        },
        database: koegate_config::DatabaseSettings {
            url: "mongodb://localhost:27017".to_string(),
            name: "koegate_test".to_string(),
            max_pool_size: Some(5),
            min_pool_size: Some(1),
        },
        models: koegate_config::ModelSettings {
            vad_model_path: "models/silero_vad.onnx".to_string(),
            asr_model_path: "models/sense_voice.int8.onnx".to_string(),
            asr_tokens_path: "models/tokens.txt".to_string(),
            embedding_model_path: "models/campplus_sv_16k.onnx".to_string(),
            asr_num_threads: 1,
            embedding_num_threads: 1,
        },
        engine: koegate_config::EngineSettings {
            pool_size: 1,
            sample_rate: 16000,
            min_audio_secs: 1.0,
            max_audio_secs: 10.0,
            vad_start_threshold: 0.5,
            vad_end_threshold: 0.35,
            vad_min_speech_frames: 3,
            vad_min_silence_frames: 15,
            segment_padding_secs: 0.10,
            segment_no_overlap: false,
        },
        auth: koegate_config::AuthSettings {
            similarity_threshold: 0.75,
            enrollment_max_retries: 5,
            challenge_min_length: 4,
            challenge_max_length: 6,
            pin_algorithm: "sha256".to_string(),
            idle_timeout_secs: 60,
        },
    }
}
