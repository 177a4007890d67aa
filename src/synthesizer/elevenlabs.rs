//! ElevenLabs text-to-speech provider
//!
//! Audio is requested directly as 8 kHz mu-law so it can be streamed to the
//! telephony endpoint without transcoding.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{SynthesisResult, Synthesizer};
use crate::config::SynthesizerConfig;
use crate::error::SynthesisError;
use crate::protocol::{AudioEncoding, AudioFormat};

/// Output format requested from the API
const OUTPUT_FORMAT: &str = "ulaw_8000";

#[derive(Debug, Serialize, PartialEq)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice_settings: Option<VoiceSettings>,
}

pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
    base_url: String,
    voice_settings: Option<(f32, f32)>,
}

impl ElevenLabsSynthesizer {
    pub fn new(config: &SynthesizerConfig) -> Result<Self, SynthesisError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or(SynthesisError::MissingApiKey)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        // Settings are only sent when both values are configured
        let voice_settings = match (config.stability, config.similarity_boost) {
            (Some(stability), Some(similarity_boost)) => Some((stability, similarity_boost)),
            _ => None,
        };

        Ok(Self {
            client,
            api_key,
            voice_id: config.voice_id.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            voice_settings,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/text-to-speech/{}?output_format={}",
            self.base_url, self.voice_id, OUTPUT_FORMAT
        )
    }

    fn request_body<'a>(&self, text: &'a str) -> SpeechRequest<'a> {
        SpeechRequest {
            text,
            voice_settings: self.voice_settings.map(|(stability, similarity_boost)| VoiceSettings {
                stability,
                similarity_boost,
            }),
        }
    }
}

#[async_trait]
impl Synthesizer for ElevenLabsSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        chunk_size: usize,
    ) -> Result<SynthesisResult, SynthesisError> {
        let response = self
            .client
            .post(self.url())
            .header("xi-api-key", &self.api_key)
            .json(&self.request_body(text))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SynthesisError::Status {
                status: status.as_u16(),
            });
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }

        let format = AudioFormat {
            encoding: AudioEncoding::Mulaw,
            sample_rate: 8000,
            channels: 1,
        };
        let result = SynthesisResult::from_audio(audio, format, chunk_size);
        debug!(
            "Synthesized {} chars into {} chunks ({} ms)",
            text.len(),
            result.chunks.len(),
            result.duration_ms()
        );
        Ok(result)
    }

    fn id(&self) -> &'static str {
        "elevenlabs"
    }
}
