use std::sync::Arc;
use std::time::Duration;

use koegate_config::Settings;
use koegate_db::{connect, ensure_indexes};
use koegate_engine::pipeline::AudioProcessor;
use koegate_engine::{EngineConfig, InferencePool};
use koegate_services::enrollment::EnrollmentService;
use koegate_services::gallery::{GalleryStore, MongoGalleryStore};
use koegate_services::pin::PinHasher;
use koegate_services::verify::VerifyService;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub gallery: Arc<dyn GalleryStore>,
    pub enrollment: Arc<EnrollmentService>,
    pub verify: Arc<VerifyService>,
}

impl AppState {
    /// Production wiring: MongoDB gallery + ONNX inference pool.
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let (client, db) = connect(&settings).await?;
        ensure_indexes(&db).await?;

        let gallery: Arc<dyn GalleryStore> = Arc::new(MongoGalleryStore::new(client, &db));

        let engine_config = engine_config(&settings);
        let processor: Arc<dyn AudioProcessor> = InferencePool::new(&engine_config)?;

        Self::with_components(settings, processor, gallery)
    }

    /// Wires the services over explicit processor/gallery implementations.
    /// Tests use this with deterministic fakes.
    pub fn with_components(
        settings: Settings,
        processor: Arc<dyn AudioProcessor>,
        gallery: Arc<dyn GalleryStore>,
    ) -> anyhow::Result<Self> {
        let hasher = PinHasher::new(&settings.auth.pin_algorithm)
            .map_err(|e| anyhow::anyhow!("PIN hasher: {}", e))?;

        let enrollment = Arc::new(EnrollmentService::new(
            processor.clone(),
            gallery.clone(),
            hasher,
            settings.auth.enrollment_max_retries,
        ));

        let verify = Arc::new(VerifyService::new(
            processor,
            gallery.clone(),
            settings.auth.similarity_threshold,
            settings.auth.challenge_min_length,
            settings.auth.challenge_max_length,
        ));

        Ok(Self {
            settings,
            gallery,
            enrollment,
            verify,
        })
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.auth.idle_timeout_secs)
    }
}

fn engine_config(settings: &Settings) -> EngineConfig {
    EngineConfig {
        vad_model_path: settings.models.vad_model_path.clone(),
        asr_model_path: settings.models.asr_model_path.clone(),
        asr_tokens_path: settings.models.asr_tokens_path.clone(),
        embedding_model_path: settings.models.embedding_model_path.clone(),
        asr_num_threads: settings.models.asr_num_threads,
        embedding_num_threads: settings.models.embedding_num_threads,
        pool_size: settings.engine.pool_size,
        sample_rate: settings.engine.sample_rate,
        min_audio_secs: settings.engine.min_audio_secs,
        max_audio_secs: settings.engine.max_audio_secs,
        vad_start_threshold: settings.engine.vad_start_threshold,
        vad_end_threshold: settings.engine.vad_end_threshold,
        vad_min_speech_frames: settings.engine.vad_min_speech_frames,
        vad_min_silence_frames: settings.engine.vad_min_silence_frames,
        segment_padding_secs: settings.engine.segment_padding_secs,
        segment_no_overlap: settings.engine.segment_no_overlap,
    }
}
