//! Media stream wire protocol
//!
//! JSON text frames exchanged with the telephony endpoint. Outbound we only
//! ever send `media`, `mark` and `clear`; inbound the pipeline cares about
//! `start` (to learn the stream id), `mark` (playback acknowledgments) and
//! `stop`. Everything else is parsed so it can be logged and ignored.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ENCODING, DEFAULT_SAMPLE_RATE};

/// Audio sample encoding of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioEncoding {
    /// G.711 mu-law, one byte per sample
    #[serde(rename = "audio/x-mulaw")]
    Mulaw,
    /// Signed 16-bit little-endian PCM
    #[serde(rename = "audio/l16")]
    Linear16,
}

impl AudioEncoding {
    /// Bytes used by one sample in this encoding
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            AudioEncoding::Mulaw => 1,
            AudioEncoding::Linear16 => 2,
        }
    }
}

/// Sample format metadata that travels with synthesized audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_channels() -> u16 {
    1
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            encoding: DEFAULT_ENCODING,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
        }
    }
}

impl AudioFormat {
    /// Playback duration of `len` bytes in milliseconds
    pub fn duration_ms(&self, len: usize) -> u64 {
        let frame_bytes = self.encoding.bytes_per_sample() * self.channels.max(1) as usize;
        (len / frame_bytes) as u64 * 1000 / self.sample_rate.max(1) as u64
    }
}

/// Media payload body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Base64 encoded audio
    pub payload: String,
}

/// Mark body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Frames written to the endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Audio for the endpoint to buffer and play
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    /// Acknowledgment request, echoed back once preceding audio has played
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    /// Discard all buffered, unplayed audio
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

impl OutboundFrame {
    /// Build a media frame, base64 encoding the audio
    pub fn media(stream_sid: &str, audio: &[u8]) -> Self {
        OutboundFrame::Media {
            stream_sid: stream_sid.to_string(),
            media: MediaPayload {
                payload: BASE64.encode(audio),
            },
        }
    }

    /// Build a mark frame
    pub fn mark(stream_sid: &str, name: impl Into<String>) -> Self {
        OutboundFrame::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkPayload { name: name.into() },
        }
    }

    /// Build a clear frame
    pub fn clear(stream_sid: &str) -> Self {
        OutboundFrame::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    /// Short name of the frame kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Media { .. } => "media",
            OutboundFrame::Mark { .. } => "mark",
            OutboundFrame::Clear { .. } => "clear",
        }
    }

    /// Serialize to the JSON text frame sent on the wire
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// `start` event body
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    pub stream_sid: String,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub media_format: Option<AudioFormat>,
}

/// Inbound `media` body (caller audio)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMedia {
    #[serde(default)]
    pub track: Option<String>,
    pub payload: String,
}

impl InboundMedia {
    /// Decode the base64 payload
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.payload)
    }
}

/// Inbound `dtmf` body
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Dtmf {
    pub digit: String,
}

/// Frames received from the endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        start: StartMetadata,
    },
    Media {
        media: InboundMedia,
    },
    /// A previously sent mark finished playing (or was cleared)
    Mark {
        mark: MarkPayload,
    },
    Dtmf {
        dtmf: Dtmf,
    },
    Stop,
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    /// Parse a JSON text frame
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Mark name carried by an acknowledgment
    pub fn mark_name(&self) -> Option<&str> {
        match self {
            InboundEvent::Mark { mark } => Some(&mark.name),
            _ => None,
        }
    }
}
