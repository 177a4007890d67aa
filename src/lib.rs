//! # Telephony Audio Out
//!
//! Streams synthesized speech to a telephony media stream and keeps exact,
//! race-free accounting of which audio the caller actually heard, even when
//! playback is interrupted mid-utterance.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                         DISPATCHER (external)                          │
//! │        decides what to say and when to interrupt (HTTP API)            │
//! └──────────────┬───────────────────────────────────────┬─────────────────┘
//!                │ text                                  │ interrupt
//!                ▼                                       │
//!        ┌───────────────┐                               │
//!        │  Synthesizer  │  (synthesizer::elevenlabs)    │
//!        └───────┬───────┘                               │
//!                │ AudioChunk × N (shared InterruptFlag) │
//!                ▼                                       ▼
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                 PlaybackHandle (output::coordinator)                   │
//! │     submit(chunk)                              interrupt()             │
//! │        │      └──────────────┐                    │                    │
//! │        ▼                     ▼                    ▼                    │
//! │  ┌─────────────┐    ┌──────────────────────────────────────┐           │
//! │  │ in-flight   │    │ frame queue: media, mark, …, clear   │           │
//! │  │ FIFO        │    └──────────────────┬───────────────────┘           │
//! │  └──────┬──────┘                       ▼                               │
//! │         │              ┌──────────────────────────────┐                │
//! │         │              │ FrameSender (output::sender) │──── writes ───────▶ WebSocket
//! │         ▼              └──────────────────────────────┘                │
//! │  ┌──────────────────────────────────┐                                  │
//! │  │ MarkCorrelator                   │◀─────────── mark acks ◀──────────────  WebSocket
//! │  │ (output::correlator)             │                                  │
//! │  │  oldest chunk ⇄ next ack         │──▶ on_play / on_interrupt        │
//! │  └──────────────────────────────────┘                                  │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod output;
pub mod protocol;
pub mod server;
pub mod synthesizer;
pub mod transport;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use crate::protocol::AudioEncoding;

    /// Telephony sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 8000;

    /// Telephony sample encoding
    pub const DEFAULT_ENCODING: AudioEncoding = AudioEncoding::Mulaw;

    /// Default synthesized chunk size in bytes (one second of 8 kHz mu-law)
    pub const DEFAULT_CHUNK_SIZE: usize = 8000;

    /// Default wait for an in-flight chunk after its acknowledgment arrives
    pub const DEFAULT_ACK_WAIT_MS: u64 = 2000;

    /// Default HTTP / WebSocket port
    pub const DEFAULT_HTTP_PORT: u16 = 3000;

    /// ElevenLabs API root
    pub const ELEVEN_LABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";

    /// ElevenLabs "Adam" voice
    pub const DEFAULT_VOICE_ID: &str = "pNInz6obpgDQGcFmaJgB";

    /// Total timeout for one synthesis request
    pub const DEFAULT_SYNTHESIS_TIMEOUT_SECS: u64 = 15;
}
