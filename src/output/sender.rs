//! Outbound frame sender
//!
//! Single writer for a media stream connection. Every frame, whatever call
//! site produced it, goes through one unbounded FIFO and is written by one
//! task, so audio and clear frames can never race on the wire.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::PipelineError;
use crate::output::SessionCounters;
use crate::protocol::OutboundFrame;
use crate::transport::FrameWriter;

/// Producer side of the outbound queue
#[derive(Debug, Clone)]
pub struct FrameQueue {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl FrameQueue {
    /// Queue a frame for sending. Never blocks.
    ///
    /// Fails only once the sender loop has gone away.
    pub fn enqueue(&self, frame: OutboundFrame) -> Result<(), PipelineError> {
        self.tx.send(frame).map_err(|_| PipelineError::SessionClosed)
    }
}

/// Consumer side: owns the connection's write half
pub struct FrameSender<W> {
    rx: mpsc::UnboundedReceiver<OutboundFrame>,
    writer: W,
    counters: Arc<SessionCounters>,
}

/// Create a connected queue/sender pair
pub fn frame_channel<W: FrameWriter>(
    writer: W,
    counters: Arc<SessionCounters>,
) -> (FrameQueue, FrameSender<W>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FrameQueue { tx }, FrameSender { rx, writer, counters })
}

impl<W: FrameWriter> FrameSender<W> {
    /// Write queued frames in order until cancelled or the connection fails.
    ///
    /// Frames still queued at cancellation are dropped.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Frame sender cancelled");
                    return Ok(());
                }
                next = self.rx.recv() => match next {
                    Some(frame) => frame,
                    None => return Ok(()),
                },
            };

            let kind = frame.kind();
            let text = frame
                .to_json()
                .map_err(|e| PipelineError::Encode(e.to_string()))?;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                sent = self.writer.send_text(text) => {
                    if let Err(e) = sent {
                        error!("Failed to write {} frame: {}", kind, e);
                        return Err(PipelineError::ConnectionLost(e.to_string()));
                    }
                }
            }

            self.counters.record_frame();
            debug!("Sent {} frame", kind);
        }
    }
}
