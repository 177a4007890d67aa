//! Interruptible audio delivery
//!
//! ```text
//!   submit(chunk) ──┬──▶ in-flight FIFO ──────────────┐
//!                   │                                 ▼
//!                   └──▶ frame queue ──▶ FrameSender  MarkCorrelator ◀── mark acks
//!   interrupt() ────────▶ frame queue        │              │
//!                                            ▼              ▼
//!                                       connection    on_play / on_interrupt
//! ```

pub mod chunk;
pub mod coordinator;
pub mod correlator;
pub mod sender;

#[cfg(test)]
pub(crate) mod testing;

pub use chunk::{AudioChunk, ChunkHandle, ChunkState, InterruptFlag};
pub use coordinator::{PlaybackCoordinator, PlaybackHandle, PlaybackSession, SessionStatus};
pub use correlator::MarkCorrelator;
pub use sender::{frame_channel, FrameQueue, FrameSender};

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-session counters, shared by the coordinator and both loops
#[derive(Debug, Default)]
pub struct SessionCounters {
    submitted: AtomicU64,
    skipped: AtomicU64,
    played: AtomicU64,
    interrupted: AtomicU64,
    frames_sent: AtomicU64,
}

impl SessionCounters {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_played(&self) {
        self.played.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_interrupted(&self) {
        self.interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a copy of the current values
    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            played: self.played.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
        }
    }
}

/// Session statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SessionStats {
    /// Chunks accepted for transmission
    pub submitted: u64,
    /// Chunks already interrupted when submitted, never sent
    pub skipped: u64,
    pub played: u64,
    /// Sent chunks resolved as interrupted
    pub interrupted: u64,
    pub frames_sent: u64,
}

impl SessionStats {
    /// Chunks sent but not yet resolved
    pub fn outstanding(&self) -> u64 {
        self.submitted
            .saturating_sub(self.played + self.interrupted)
    }
}
