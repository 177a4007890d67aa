//! Mark acknowledgment correlator
//!
//! The endpoint echoes each mark once the audio before it has played (or
//! been cleared), and it does so in send order. Pairing therefore needs only
//! two FIFOs: the next acknowledgment always belongs to the oldest chunk in
//! flight. The mark name is still checked against the chunk's id so that a
//! desynchronized stream is reported rather than silently mispaired.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::PipelineError;
use crate::output::{AudioChunk, SessionCounters};

/// Resolves in-flight chunks as acknowledgments arrive
pub struct MarkCorrelator {
    acks: mpsc::UnboundedReceiver<String>,
    in_flight: mpsc::UnboundedReceiver<AudioChunk>,
    /// How long an acknowledgment may wait for its chunk
    ack_wait: Duration,
    counters: Arc<SessionCounters>,
}

impl MarkCorrelator {
    pub fn new(
        acks: mpsc::UnboundedReceiver<String>,
        in_flight: mpsc::UnboundedReceiver<AudioChunk>,
        ack_wait: Duration,
        counters: Arc<SessionCounters>,
    ) -> Self {
        Self {
            acks,
            in_flight,
            ack_wait,
            counters,
        }
    }

    /// Pair acknowledgments with chunks until cancelled or out of sync.
    ///
    /// On cancellation, acknowledgments that have already arrived are still
    /// applied to the chunks they belong to before the loop exits.
    ///
    /// A lost mark ahead of later ones surfaces as [`PipelineError::MarkMismatch`]
    /// when the next mark arrives. A lost final mark has no successor, so that
    /// chunk stays unplayed until shutdown resolves it in [`Self::drain`].
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        loop {
            let mark = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.settle(None),
                next = self.acks.recv() => match next {
                    Some(mark) => mark,
                    None => return Ok(()),
                },
            };

            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.settle(Some(mark)),
                next = tokio::time::timeout(self.ack_wait, self.in_flight.recv()) => match next {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => return Ok(()),
                    Err(_) => {
                        error!("Acknowledgment {} has no chunk in flight", mark);
                        return Err(PipelineError::OrphanAcknowledgment { mark });
                    }
                },
            };

            self.resolve(chunk, mark)?;
        }
    }

    /// Apply acknowledgments that are already queued, without waiting
    fn settle(&mut self, mut pending: Option<String>) -> Result<(), PipelineError> {
        loop {
            let mark = match pending.take() {
                Some(mark) => mark,
                None => match self.acks.try_recv() {
                    Ok(mark) => mark,
                    Err(_) => return Ok(()),
                },
            };
            match self.in_flight.try_recv() {
                Ok(chunk) => self.resolve(chunk, mark)?,
                Err(_) => {
                    debug!("Dropping acknowledgment {} received at shutdown", mark);
                    return Ok(());
                }
            }
        }
    }

    fn resolve(&self, mut chunk: AudioChunk, mark: String) -> Result<(), PipelineError> {
        if chunk.id().to_string() != mark {
            error!("Acknowledgment {} does not match chunk {}", mark, chunk.id());
            let expected = chunk.id();
            chunk.mark_interrupted();
            self.counters.record_interrupted();
            return Err(PipelineError::MarkMismatch {
                expected,
                received: mark,
            });
        }

        if chunk.is_interrupted() {
            debug!("Chunk {} interrupted before playback", chunk.id());
            chunk.mark_interrupted();
            self.counters.record_interrupted();
        } else {
            debug!("Chunk {} played", chunk.id());
            chunk.mark_played();
            self.counters.record_played();
        }
        Ok(())
    }

    /// Stop accepting chunks and resolve everything still in flight as interrupted
    pub fn drain(&mut self) -> usize {
        self.in_flight.close();
        let mut drained = 0;
        while let Ok(mut chunk) = self.in_flight.try_recv() {
            chunk.mark_interrupted();
            self.counters.record_interrupted();
            drained += 1;
        }
        if drained > 0 {
            warn!("Resolved {} unacknowledged chunks as interrupted", drained);
        }
        drained
    }
}
