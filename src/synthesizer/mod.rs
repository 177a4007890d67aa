//! Speech synthesis
//!
//! Turning text into audio happens outside the delivery pipeline. Providers
//! implement [`Synthesizer`]; the result is cut into chunks that can be
//! submitted to a playback session as-is.

pub mod elevenlabs;

pub use elevenlabs::ElevenLabsSynthesizer;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SynthesisError;
use crate::output::{AudioChunk, InterruptFlag};
use crate::protocol::AudioFormat;

/// Trait that all speech synthesis providers must implement
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text`, split into pieces of roughly `chunk_size` bytes
    async fn synthesize(
        &self,
        text: &str,
        chunk_size: usize,
    ) -> Result<SynthesisResult, SynthesisError>;

    /// Short provider name for logs
    fn id(&self) -> &'static str;
}

/// Synthesized audio, ready to be queued
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub chunks: Vec<Bytes>,
    pub format: AudioFormat,
}

impl SynthesisResult {
    /// Split `audio` into chunks of at most `chunk_size` bytes.
    ///
    /// Chunk boundaries fall on sample boundaries.
    pub fn from_audio(audio: Bytes, format: AudioFormat, chunk_size: usize) -> Self {
        let sample = format.encoding.bytes_per_sample() * format.channels.max(1) as usize;
        let step = (chunk_size / sample).max(1) * sample;

        let mut chunks = Vec::with_capacity(audio.len() / step + 1);
        let mut offset = 0;
        while offset < audio.len() {
            let end = (offset + step).min(audio.len());
            chunks.push(audio.slice(offset..end));
            offset = end;
        }
        Self { chunks, format }
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    /// Playback length of the whole result
    pub fn duration_ms(&self) -> u64 {
        self.format.duration_ms(self.total_bytes())
    }

    /// Turn every chunk into an [`AudioChunk`] sharing `flag`.
    ///
    /// Raising the flag interrupts whatever part of the utterance has not
    /// yet been confirmed as played.
    pub fn into_audio_chunks(self, flag: &InterruptFlag) -> Vec<AudioChunk> {
        self.chunks
            .into_iter()
            .map(|data| AudioChunk::with_flag(data, flag.clone()))
            .collect()
    }
}
