//! Audio chunks and their playback lifecycle
//!
//! An [`AudioChunk`] is owned by exactly one party at a time: the caller,
//! then the coordinator, then the in-flight queue, then the correlator that
//! resolves it. Only that owner may transition its state, so the state
//! machine needs no lock. Observers hold a [`ChunkHandle`] instead.
//!
//! Resolving a chunk seals it: its handle stops accepting interrupts, so a
//! late request cannot rewrite the outcome of audio already accounted for.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Playback state of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkState {
    Unplayed = 0,
    Played = 1,
    Interrupted = 2,
}

impl ChunkState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ChunkState::Played,
            2 => ChunkState::Interrupted,
            _ => ChunkState::Unplayed,
        }
    }

    /// Whether no further transition is allowed
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChunkState::Unplayed)
    }
}

/// Shared interruption flag
///
/// One flag may cover many chunks, typically every chunk of a single
/// utterance. Raising it affects all of them.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Callback fired when a chunk resolves
pub type ChunkCallback = Box<dyn FnOnce() + Send + 'static>;

/// One unit of audio awaiting delivery
pub struct AudioChunk {
    /// Raw audio bytes in the stream's encoding
    data: Bytes,
    /// Correlation token, sent as the mark name
    id: Uuid,
    /// Interruption flag, possibly shared with sibling chunks
    flag: InterruptFlag,
    /// Observable state
    state: Arc<AtomicU8>,
    /// Cleared once the chunk is resolved
    interruptible: Arc<AtomicBool>,
    on_play: Option<ChunkCallback>,
    on_interrupt: Option<ChunkCallback>,
}

impl AudioChunk {
    /// Create a chunk with its own interruption flag
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_flag(data, InterruptFlag::new())
    }

    /// Create a chunk sharing an existing interruption flag
    pub fn with_flag(data: impl Into<Bytes>, flag: InterruptFlag) -> Self {
        Self {
            data: data.into(),
            id: Uuid::new_v4(),
            flag,
            state: Arc::new(AtomicU8::new(ChunkState::Unplayed as u8)),
            interruptible: Arc::new(AtomicBool::new(true)),
            on_play: None,
            on_interrupt: None,
        }
    }

    /// Set the callback fired when the endpoint confirms playback
    pub fn on_play(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_play = Some(Box::new(callback));
        self
    }

    /// Set the callback fired when the chunk is resolved as interrupted
    pub fn on_interrupt(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_interrupt = Some(Box::new(callback));
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn flag(&self) -> &InterruptFlag {
        &self.flag
    }

    pub fn state(&self) -> ChunkState {
        ChunkState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.is_interrupted()
    }

    /// Observer handle that outlives the chunk
    pub fn handle(&self) -> ChunkHandle {
        ChunkHandle {
            id: self.id,
            flag: self.flag.clone(),
            state: self.state.clone(),
            interruptible: self.interruptible.clone(),
        }
    }

    /// Resolve as played and fire `on_play`
    pub fn mark_played(&mut self) {
        self.transition(ChunkState::Played);
        if let Some(callback) = self.on_play.take() {
            callback();
        }
        self.on_interrupt = None;
    }

    /// Resolve as interrupted and fire `on_interrupt`
    pub fn mark_interrupted(&mut self) {
        self.transition(ChunkState::Interrupted);
        if let Some(callback) = self.on_interrupt.take() {
            callback();
        }
        self.on_play = None;
    }

    fn transition(&mut self, next: ChunkState) {
        let swapped = self.state.compare_exchange(
            ChunkState::Unplayed as u8,
            next as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if let Err(current) = swapped {
            panic!(
                "chunk {} resolved twice: {:?} -> {:?}",
                self.id,
                ChunkState::from_u8(current),
                next
            );
        }
        self.interruptible.store(false, Ordering::Release);
    }
}

impl fmt::Debug for AudioChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioChunk")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .field("state", &self.state())
            .field("interrupted", &self.flag.is_interrupted())
            .finish()
    }
}

/// Read-only view of a chunk that has been handed to the pipeline
#[derive(Debug, Clone)]
pub struct ChunkHandle {
    id: Uuid,
    flag: InterruptFlag,
    state: Arc<AtomicU8>,
    interruptible: Arc<AtomicBool>,
}

impl ChunkHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ChunkState {
        ChunkState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Raise the chunk's interruption flag.
    ///
    /// Returns false once the chunk has been resolved; its fate is sealed and
    /// the flag is left untouched.
    pub fn interrupt(&self) -> bool {
        if !self.interruptible.load(Ordering::Acquire) {
            return false;
        }
        self.flag.interrupt();
        true
    }
}
