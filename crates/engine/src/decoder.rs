use std::convert::TryFrom;
use std::io::Cursor;

use audiopus::coder::Decoder as OpusDecoder;
use audiopus::packet::Packet;
use audiopus::{Channels, MutSignals, SampleRate};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CODEC_TYPE_OPUS, DecoderOptions};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::EngineError;
use crate::resampler::Resampler;

/// Opus always decodes at 48kHz.
const OPUS_RATE: u32 = 48000;
/// Maximum Opus frame: 120ms at 48kHz = 5760 samples/channel, stereo = 11520.
const MAX_OPUS_FRAME: usize = 5760 * 2;

/// Decodes a compressed audio blob into mono PCM at the pipeline rate.
///
/// Holds no references to the input after returning and touches nothing
/// outside scratch memory.
pub trait AudioDecoder: Send {
    fn decode(&mut self, blob: &[u8]) -> Result<Vec<f32>, EngineError>;
}

/// Container decoder for browser-recorded WebM/Opus and 16-bit PCM WAV.
///
/// Symphonia probes and demuxes the container. Opus packets are decoded
/// with libopus and resampled 48kHz -> target; PCM tracks are decoded by
/// symphonia and resampled from their native rate when needed.
pub struct ContainerDecoder {
    target_rate: u32,
}

impl ContainerDecoder {
    pub fn new(target_rate: u32) -> Self {
        Self { target_rate }
    }

    fn decode_inner(&self, blob: &[u8]) -> anyhow::Result<Vec<f32>> {
        if blob.is_empty() {
            anyhow::bail!("empty audio payload");
        }

        let cursor = Cursor::new(blob.to_vec());
        let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

        let hint = Hint::new();
        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &fmt_opts, &meta_opts)
            .map_err(|e| anyhow::anyhow!("unrecognized container: {}", e))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| anyhow::anyhow!("no audio track in container"))?;
        let track_id = track.id;
        let codec = track.codec_params.codec;
        let params = track.codec_params.clone();

        let samples = if codec == CODEC_TYPE_OPUS {
            self.decode_opus_track(&mut format, track_id)?
        } else {
            self.decode_pcm_track(&mut format, track_id, &params)?
        };

        if samples.is_empty() {
            anyhow::bail!("no audio samples decoded");
        }

        debug!(samples = samples.len(), "audio blob decoded");
        Ok(samples)
    }

    /// Opus path: symphonia demuxes, libopus decodes at 48kHz stereo,
    /// downmix + resample to the target rate.
    fn decode_opus_track(
        &self,
        format: &mut Box<dyn symphonia::core::formats::FormatReader>,
        track_id: u32,
    ) -> anyhow::Result<Vec<f32>> {
        let mut opus = OpusDecoder::new(SampleRate::Hz48000, Channels::Stereo)
            .map_err(|e| anyhow::anyhow!("failed to create Opus decoder: {:?}", e))?;
        let mut decode_buf = vec![0.0f32; MAX_OPUS_FRAME];
        let mut resampler = Resampler::new(OPUS_RATE, self.target_rate, 960)?;

        let mut output = Vec::new();
        while let Ok(packet) = format.next_packet() {
            if packet.track_id() != track_id || packet.data.is_empty() {
                continue;
            }

            let signals = MutSignals::try_from(&mut decode_buf[..])
                .map_err(|e| anyhow::anyhow!("MutSignals error: {:?}", e))?;
            let opus_packet = Packet::try_from(&packet.data[..])
                .map_err(|e| anyhow::anyhow!("bad Opus packet: {:?}", e))?;

            let samples_per_channel = opus
                .decode_float(Some(opus_packet), signals, false)
                .map_err(|e| anyhow::anyhow!("Opus decode error: {:?}", e))?;

            // Down-mix interleaved stereo [L,R,L,R,...] to mono
            let mut mono = Vec::with_capacity(samples_per_channel);
            for i in 0..samples_per_channel {
                let left = decode_buf[i * 2];
                let right = decode_buf[i * 2 + 1];
                mono.push((left + right) * 0.5);
            }

            output.extend(resampler.process(&mono)?);
        }
        output.extend(resampler.flush()?);

        Ok(output)
    }

    /// PCM path (WAV): symphonia decodes, channels are averaged to mono,
    /// then resampled if the native rate differs from the target.
    fn decode_pcm_track(
        &self,
        format: &mut Box<dyn symphonia::core::formats::FormatReader>,
        track_id: u32,
        params: &symphonia::core::codecs::CodecParameters,
    ) -> anyhow::Result<Vec<f32>> {
        let mut decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| anyhow::anyhow!("unsupported codec: {}", e))?;

        let native_rate = params
            .sample_rate
            .ok_or_else(|| anyhow::anyhow!("container does not declare a sample rate"))?;

        let mut native = Vec::new();
        while let Ok(packet) = format.next_packet() {
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = decoder
                .decode(&packet)
                .map_err(|e| anyhow::anyhow!("PCM decode error: {}", e))?;
            push_mono(&mut native, &decoded);
        }

        if native_rate == self.target_rate {
            return Ok(native);
        }

        let chunk = (native_rate / 50).max(1) as usize; // 20ms chunks
        let mut resampler = Resampler::new(native_rate, self.target_rate, chunk)?;
        let mut output = resampler.process(&native)?;
        output.extend(resampler.flush()?);
        Ok(output)
    }
}

impl AudioDecoder for ContainerDecoder {
    fn decode(&mut self, blob: &[u8]) -> Result<Vec<f32>, EngineError> {
        self.decode_inner(blob)
            .map_err(|e| EngineError::Decode(e.to_string()))
    }
}

/// Appends one decoded buffer to `out`, averaging channels to mono.
fn push_mono(out: &mut Vec<f32>, decoded: &AudioBufferRef<'_>) {
    use symphonia::core::conv::FromSample;

    macro_rules! mix {
        ($buf:expr) => {{
            let buf = $buf;
            let channels = buf.spec().channels.count();
            let frames = buf.frames();
            for i in 0..frames {
                let mut acc = 0.0f32;
                for c in 0..channels {
                    acc += f32::from_sample(buf.chan(c)[i]);
                }
                out.push(acc / channels as f32);
            }
        }};
    }

    match decoded {
        AudioBufferRef::F32(buf) => mix!(buf),
        AudioBufferRef::F64(buf) => mix!(buf),
        AudioBufferRef::S8(buf) => mix!(buf),
        AudioBufferRef::S16(buf) => mix!(buf),
        AudioBufferRef::S24(buf) => mix!(buf),
        AudioBufferRef::S32(buf) => mix!(buf),
        AudioBufferRef::U8(buf) => mix!(buf),
        AudioBufferRef::U16(buf) => mix!(buf),
        AudioBufferRef::U24(buf) => mix!(buf),
        AudioBufferRef::U32(buf) => mix!(buf),
    }
}
