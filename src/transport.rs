//! Media stream transport
//!
//! The pipeline needs exactly two things from a connection: a way to write
//! one text frame ([`FrameWriter`]) and a stream of inbound text frames.
//! [`drive_media_stream`] runs one call over those: it waits for the `start`
//! event, spawns the playback session and routes mark acknowledgments into it
//! until the endpoint stops the stream or the session ends.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::future::ready;
use futures_util::stream::{BoxStream, SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tracing::{debug, info, trace, warn};

use crate::config::PipelineConfig;
use crate::error::{Error, PipelineError, TransportError};
use crate::output::{PlaybackCoordinator, PlaybackHandle, SessionStats};
use crate::protocol::{InboundEvent, StartMetadata};

/// Write half of a media stream connection
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Send one text frame
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
}

#[async_trait]
impl FrameWriter for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

/// Inbound text frames of a WebSocket, ending at the close frame
pub fn text_frames(
    stream: SplitStream<WebSocket>,
) -> BoxStream<'static, Result<String, TransportError>> {
    stream
        .take_while(|msg| ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::ReceiveFailed(e.to_string()))),
            })
        })
        .boxed()
}

/// Read frames until the endpoint announces the stream
async fn wait_for_start<S>(inbound: &mut S) -> Result<StartMetadata, TransportError>
where
    S: Stream<Item = Result<String, TransportError>> + Unpin,
{
    while let Some(frame) = inbound.next().await {
        match InboundEvent::parse(&frame?) {
            Ok(InboundEvent::Start { start }) => return Ok(start),
            Ok(InboundEvent::Connected { protocol }) => {
                debug!("Media stream connected ({:?})", protocol);
            }
            Ok(other) => debug!("Ignoring {:?} before start", other),
            Err(e) => warn!("Unparseable frame before start: {}", e),
        }
    }
    Err(TransportError::ClosedBeforeStart)
}

/// Run one call: start a playback session and feed it acknowledgments.
///
/// `on_start` receives the session handle as soon as the stream id is known;
/// it is where the caller registers the call and queues any opening audio.
/// Returns the session's terminal outcome.
pub async fn drive_media_stream<S, W, F>(
    mut inbound: S,
    writer: W,
    config: &PipelineConfig,
    on_start: F,
) -> Result<SessionStats, Error>
where
    S: Stream<Item = Result<String, TransportError>> + Unpin,
    W: FrameWriter,
    F: FnOnce(&StartMetadata, PlaybackHandle),
{
    let start = wait_for_start(&mut inbound).await?;
    info!(
        "Media stream {} started (call {:?})",
        start.stream_sid, start.call_sid
    );

    let session = PlaybackCoordinator::start(start.stream_sid.clone(), writer, config);
    let handle = session.handle();
    on_start(&start, handle.clone());

    loop {
        let frame = tokio::select! {
            status = handle.closed() => {
                debug!("Session ended while stream open: {:?}", status);
                break;
            }
            frame = inbound.next() => frame,
        };

        let text = match frame {
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                warn!("Media stream receive failed: {}", e);
                break;
            }
            None => {
                debug!("Media stream closed by endpoint");
                break;
            }
        };

        let event = match InboundEvent::parse(&text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Unparseable media stream frame: {}", e);
                continue;
            }
        };

        if let Some(mark) = event.mark_name() {
            if let Err(PipelineError::SessionClosed) = handle.acknowledge(mark) {
                break;
            }
            continue;
        }

        match event {
            InboundEvent::Stop => {
                info!("Media stream {} stopped", start.stream_sid);
                break;
            }
            InboundEvent::Media { media } => match media.decode() {
                Ok(audio) => trace!("Inbound audio frame ({} bytes)", audio.len()),
                Err(e) => warn!("Undecodable inbound audio: {}", e),
            },
            InboundEvent::Dtmf { dtmf } => debug!("DTMF digit {}", dtmf.digit),
            other => debug!("Ignoring {:?}", other),
        }
    }

    Ok(session.shutdown().await?)
}
