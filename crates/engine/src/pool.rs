//! Bounded pool of pipeline workers.
//!
//! ASR and embedding inference are CPU-bound and their handles are not
//! thread-safe, so each worker owns a full set of handles and is checked
//! out for one utterance at a time. The bounded channel provides the
//! back-pressure: when every worker is busy, callers queue on checkout.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::asr::SenseVoiceAsr;
use crate::config::EngineConfig;
use crate::decoder::ContainerDecoder;
use crate::embedding::CampPlusExtractor;
use crate::error::EngineError;
use crate::pipeline::{AudioProcessor, EnrollmentAudio, PipelineWorker, VerifyAudio};
use crate::vad::SileroVad;

pub struct InferencePool {
    slots: Mutex<mpsc::Receiver<PipelineWorker>>,
    returns: mpsc::Sender<PipelineWorker>,
}

impl InferencePool {
    /// Builds a pool of `size` workers from a factory. Each worker gets its
    /// own inference handles; nothing is shared between them.
    pub fn with_factory<F>(size: usize, factory: F) -> anyhow::Result<Arc<Self>>
    where
        F: Fn() -> anyhow::Result<PipelineWorker>,
    {
        let size = if size == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            size
        };

        let (returns, slots) = mpsc::channel(size);
        for _ in 0..size {
            returns
                .try_send(factory()?)
                .map_err(|_| anyhow::anyhow!("worker channel sized below pool size"))?;
        }

        info!(size, "inference pool ready");

        Ok(Arc::new(Self {
            slots: Mutex::new(slots),
            returns,
        }))
    }

    /// Builds the production pool: every worker loads its own ONNX
    /// sessions from the configured model paths.
    pub fn new(config: &EngineConfig) -> anyhow::Result<Arc<Self>> {
        let config = config.clone();
        Self::with_factory(config.pool_size, || {
            let decoder = ContainerDecoder::new(config.sample_rate);
            let vad = SileroVad::new(&config.vad_model_path, &config)?;
            let asr = SenseVoiceAsr::new(
                &config.asr_model_path,
                &config.asr_tokens_path,
                config.asr_num_threads,
            )?;
            let extractor = CampPlusExtractor::new(
                &config.embedding_model_path,
                config.embedding_num_threads,
            )?;
            Ok(PipelineWorker::new(
                Box::new(decoder),
                Box::new(vad),
                Box::new(asr),
                Box::new(extractor),
                config.clone(),
            ))
        })
    }

    async fn checkout(&self) -> Result<PipelineWorker, EngineError> {
        let mut slots = self.slots.lock().await;
        slots
            .recv()
            .await
            .ok_or_else(|| EngineError::Internal("inference pool closed".to_string()))
    }

    fn checkin(&self, worker: PipelineWorker) {
        if self.returns.try_send(worker).is_err() {
            warn!("inference pool dropped a returning worker");
        }
    }

    /// Runs CPU-bound pipeline work on the blocking thread pool, returning
    /// the worker afterwards. A panicking worker is lost, shrinking the
    /// pool by one.
    async fn run_blocking<T, F>(&self, work: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PipelineWorker) -> Result<T, EngineError> + Send + 'static,
    {
        let mut worker = self.checkout().await?;
        let joined = tokio::task::spawn_blocking(move || {
            let result = work(&mut worker);
            (worker, result)
        })
        .await;

        match joined {
            Ok((worker, result)) => {
                self.checkin(worker);
                result
            }
            Err(e) => {
                warn!(%e, "pipeline worker panicked");
                Err(EngineError::Internal("pipeline worker panicked".to_string()))
            }
        }
    }
}

#[async_trait]
impl AudioProcessor for InferencePool {
    async fn process_enrollment_audio(
        &self,
        audio: Vec<u8>,
        expected_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<EnrollmentAudio, EngineError> {
        let expected = expected_prompt.to_string();
        let cancel = cancel.clone();
        self.run_blocking(move |worker| worker.process_enrollment(&audio, &expected, &cancel))
            .await
    }

    async fn verify_audio(
        &self,
        audio: Vec<u8>,
        expected_prompt: &str,
        gallery: &HashMap<String, Vec<f32>>,
        cancel: &CancellationToken,
    ) -> Result<VerifyAudio, EngineError> {
        let expected = expected_prompt.to_string();
        let gallery = gallery.clone();
        let cancel = cancel.clone();
        self.run_blocking(move |worker| {
            worker.process_verification(&audio, &expected, &gallery, &cancel)
        })
        .await
    }
}
