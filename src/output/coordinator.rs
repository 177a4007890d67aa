//! Playback coordinator
//!
//! Public face of the pipeline. [`PlaybackCoordinator::start`] spawns one
//! supervised session per media stream: a frame sender and a mark
//! correlator joined with first-error propagation. Callers get a cheap,
//! cloneable [`PlaybackHandle`] whose operations never touch the network.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::{
    frame_channel, AudioChunk, ChunkHandle, FrameQueue, FrameSender, MarkCorrelator,
    SessionCounters, SessionStats,
};
use crate::protocol::OutboundFrame;
use crate::transport::FrameWriter;

/// Lifecycle of a playback session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    /// Ended by shutdown or by the connection going away cleanly
    Closed,
    Failed(PipelineError),
}

/// Producer ends of the two queues
///
/// Held under one lock so a chunk's FIFO entry and its frame pair are
/// enqueued as a unit, and a clear frame never lands between them.
struct Lanes {
    frames: FrameQueue,
    in_flight: mpsc::UnboundedSender<AudioChunk>,
}

struct Shared {
    stream_sid: String,
    lanes: Mutex<Lanes>,
    acks: mpsc::UnboundedSender<String>,
    counters: Arc<SessionCounters>,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
}

/// Starts playback sessions
pub struct PlaybackCoordinator;

impl PlaybackCoordinator {
    /// Spawn the sender and correlator loops for one media stream.
    ///
    /// `writer` becomes exclusively owned by the sender loop.
    pub fn start<W: FrameWriter>(
        stream_sid: impl Into<String>,
        writer: W,
        config: &PipelineConfig,
    ) -> PlaybackSession {
        let stream_sid = stream_sid.into();
        let counters = Arc::new(SessionCounters::default());
        let (frames, sender) = frame_channel(writer, counters.clone());
        let (in_flight, chunk_rx) = mpsc::unbounded_channel();
        let (acks, ack_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(SessionStatus::Active);

        let correlator = MarkCorrelator::new(
            ack_rx,
            chunk_rx,
            Duration::from_millis(config.ack_wait_timeout_ms),
            counters.clone(),
        );

        let shared = Arc::new(Shared {
            stream_sid: stream_sid.clone(),
            lanes: Mutex::new(Lanes { frames, in_flight }),
            acks,
            counters,
            status,
            cancel: CancellationToken::new(),
        });

        let span = tracing::info_span!("playback", stream_sid = %stream_sid);
        let task = tokio::spawn(supervise(shared.clone(), sender, correlator).instrument(span));

        info!("Playback session started for stream {}", stream_sid);

        PlaybackSession {
            handle: PlaybackHandle { shared },
            task,
        }
    }
}

async fn supervise<W: FrameWriter>(
    shared: Arc<Shared>,
    mut sender: FrameSender<W>,
    mut correlator: MarkCorrelator,
) -> Result<SessionStats, PipelineError> {
    let cancel = shared.cancel.clone();

    let outcome = tokio::try_join!(sender.run(&cancel), correlator.run(&cancel));
    cancel.cancel();
    correlator.drain();
    drop(sender);

    let stats = shared.counters.snapshot();
    match outcome {
        Ok(_) => {
            info!(
                "Playback session closed: {} submitted, {} played, {} interrupted, {} skipped",
                stats.submitted, stats.played, stats.interrupted, stats.skipped
            );
            shared.status.send_replace(SessionStatus::Closed);
            Ok(stats)
        }
        Err(e) => {
            error!("Playback session failed: {}", e);
            shared.status.send_replace(SessionStatus::Failed(e.clone()));
            Err(e)
        }
    }
}

/// A running session: its handle plus the supervising task
pub struct PlaybackSession {
    handle: PlaybackHandle,
    task: JoinHandle<Result<SessionStats, PipelineError>>,
}

impl PlaybackSession {
    pub fn handle(&self) -> PlaybackHandle {
        self.handle.clone()
    }

    /// Wait for the session to end and return its single terminal outcome
    pub async fn join(self) -> Result<SessionStats, PipelineError> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(PipelineError::SessionClosed),
        }
    }

    /// Cancel both loops and wait for the outcome
    pub async fn shutdown(self) -> Result<SessionStats, PipelineError> {
        self.handle.shutdown();
        self.join().await
    }
}

/// Cloneable, non-blocking entry point into a session
#[derive(Clone)]
pub struct PlaybackHandle {
    shared: Arc<Shared>,
}

impl PlaybackHandle {
    pub fn stream_sid(&self) -> &str {
        &self.shared.stream_sid
    }

    /// Queue a chunk for playback.
    ///
    /// A chunk that is already interrupted is resolved on the spot and
    /// nothing is sent. Otherwise its media and mark frames are queued as a
    /// pair and the chunk waits in flight for the endpoint's acknowledgment.
    /// If the session has ended the chunk is resolved as interrupted and
    /// `SessionClosed` is returned.
    pub fn submit(&self, mut chunk: AudioChunk) -> Result<ChunkHandle, PipelineError> {
        let handle = chunk.handle();
        if chunk.is_interrupted() {
            debug!("Chunk {} interrupted before submission", chunk.id());
            chunk.mark_interrupted();
            self.shared.counters.record_skipped();
            return Ok(handle);
        }

        let sid = &self.shared.stream_sid;
        let media = OutboundFrame::media(sid, chunk.data());
        let mark = OutboundFrame::mark(sid, chunk.id().to_string());

        let lanes = self.shared.lanes.lock();
        if let Err(mpsc::error::SendError(mut rejected)) = lanes.in_flight.send(chunk) {
            drop(lanes);
            rejected.mark_interrupted();
            self.shared.counters.record_skipped();
            return Err(PipelineError::SessionClosed);
        }
        // Once in flight the chunk is resolved by the correlator or by the final drain.
        self.shared.counters.record_submitted();
        lanes.frames.enqueue(media)?;
        lanes.frames.enqueue(mark)?;
        drop(lanes);

        debug!("Submitted chunk {}", handle.id());
        Ok(handle)
    }

    /// Ask the endpoint to drop all buffered audio.
    ///
    /// Sends exactly one clear frame. In-flight chunks are not resolved
    /// here; their acknowledgments still arrive and each resolves according
    /// to its own interruption flag.
    pub fn interrupt(&self) -> Result<(), PipelineError> {
        let lanes = self.shared.lanes.lock();
        lanes
            .frames
            .enqueue(OutboundFrame::clear(&self.shared.stream_sid))?;
        drop(lanes);
        debug!("Queued clear for stream {}", self.shared.stream_sid);
        Ok(())
    }

    /// Feed a mark acknowledgment received from the endpoint
    pub fn acknowledge(&self, mark: impl Into<String>) -> Result<(), PipelineError> {
        self.shared
            .acks
            .send(mark.into())
            .map_err(|_| PipelineError::SessionClosed)
    }

    /// Cancel both loops; pending chunks are resolved as interrupted
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.shared.status.borrow(), SessionStatus::Active)
    }

    /// Wait until the session leaves the active state
    pub async fn closed(&self) -> SessionStatus {
        let mut rx = self.shared.status.subscribe();
        let status = match rx.wait_for(|s| *s != SessionStatus::Active).await {
            Ok(status) => (*status).clone(),
            Err(_) => SessionStatus::Closed,
        };
        status
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::testing::RecordingWriter;
    use crate::output::ChunkState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> PipelineConfig {
        PipelineConfig {
            ack_wait_timeout_ms: 500,
            ..PipelineConfig::default()
        }
    }

    type EventLog = Arc<Mutex<Vec<String>>>;

    fn logged_chunk(label: &'static str, log: &EventLog) -> AudioChunk {
        let played = log.clone();
        let interrupted = log.clone();
        AudioChunk::new(vec![0u8, 1])
            .on_play(move || played.lock().push(format!("{}:played", label)))
            .on_interrupt(move || interrupted.lock().push(format!("{}:interrupted", label)))
    }

    async fn wait_resolved(handle: &ChunkHandle) {
        while !handle.state().is_terminal() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_wire_order_matches_submission() {
        let writer = RecordingWriter::new();
        let session = PlaybackCoordinator::start("MZ1", writer.clone(), &config());
        let handle = session.handle();

        let a = handle.submit(AudioChunk::new(vec![1u8])).unwrap();
        let b = handle.submit(AudioChunk::new(vec![2u8])).unwrap();
        handle.interrupt().unwrap();

        writer.wait_for(5).await;
        assert_eq!(writer.kinds(), vec!["media", "mark", "media", "mark", "clear"]);
        assert_eq!(
            writer.mark_names(),
            vec![a.id().to_string(), b.id().to_string()]
        );
        let frames = writer.frames();
        assert_eq!(frames[0]["media"]["payload"], "AQ==");
        assert_eq!(frames[2]["media"]["payload"], "Ag==");
        assert_eq!(frames[4]["streamSid"], "MZ1");

        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_played_then_interrupted_scenario() {
        let writer = RecordingWriter::new();
        let session = PlaybackCoordinator::start("MZ1", writer.clone(), &config());
        let handle = session.handle();
        let log: EventLog = Arc::default();

        let a = handle.submit(logged_chunk("a", &log)).unwrap();
        handle.acknowledge(a.id().to_string()).unwrap();
        wait_resolved(&a).await;
        assert_eq!(a.state(), ChunkState::Played);

        let b = handle.submit(logged_chunk("b", &log)).unwrap();
        assert!(b.interrupt());
        handle.acknowledge(b.id().to_string()).unwrap();
        wait_resolved(&b).await;
        assert_eq!(b.state(), ChunkState::Interrupted);

        let stats = session.shutdown().await.unwrap();
        assert_eq!(*log.lock(), vec!["a:played", "b:interrupted"]);
        assert_eq!((stats.played, stats.interrupted), (1, 1));
    }

    #[tokio::test]
    async fn test_pre_interrupted_chunk_sends_nothing() {
        let writer = RecordingWriter::new();
        let session = PlaybackCoordinator::start("MZ1", writer.clone(), &config());
        let handle = session.handle();
        let log: EventLog = Arc::default();

        let chunk = logged_chunk("x", &log);
        chunk.flag().interrupt();
        let x = handle.submit(chunk).unwrap();

        assert_eq!(x.state(), ChunkState::Interrupted);
        assert_eq!(*log.lock(), vec!["x:interrupted"]);

        handle.interrupt().unwrap();
        writer.wait_for(1).await;
        let stats = session.shutdown().await.unwrap();
        assert_eq!(writer.kinds(), vec!["clear"]);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.submitted, 0);
    }

    #[tokio::test]
    async fn test_interrupt_before_acknowledgments() {
        let writer = RecordingWriter::new();
        let session = PlaybackCoordinator::start("MZ1", writer.clone(), &config());
        let handle = session.handle();
        let log: EventLog = Arc::default();

        let a = handle.submit(logged_chunk("a", &log)).unwrap();
        let b = handle.submit(logged_chunk("b", &log)).unwrap();
        a.interrupt();
        b.interrupt();
        handle.interrupt().unwrap();

        handle.acknowledge(a.id().to_string()).unwrap();
        handle.acknowledge(b.id().to_string()).unwrap();
        wait_resolved(&b).await;

        assert_eq!(a.state(), ChunkState::Interrupted);
        assert_eq!(b.state(), ChunkState::Interrupted);
        assert_eq!(*log.lock(), vec!["a:interrupted", "b:interrupted"]);
        writer.wait_for(5).await;
        assert_eq!(writer.kinds().iter().filter(|k| *k == "clear").count(), 1);
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_single_clear_per_interrupt() {
        let writer = RecordingWriter::new();
        let session = PlaybackCoordinator::start("MZ1", writer.clone(), &config());
        let handle = session.handle();

        for _ in 0..4 {
            handle.submit(AudioChunk::new(vec![0u8; 160])).unwrap();
        }
        handle.interrupt().unwrap();
        writer.wait_for(9).await;

        assert_eq!(writer.kinds().iter().filter(|k| *k == "clear").count(), 1);
        assert_eq!(writer.kinds().last().map(String::as_str), Some("clear"));
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight() {
        let writer = RecordingWriter::new();
        let session = PlaybackCoordinator::start("MZ1", writer.clone(), &config());
        let handle = session.handle();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        let chunk = AudioChunk::new(vec![0u8]).on_interrupt(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let pending = handle.submit(chunk).unwrap();

        let stats = session.shutdown().await.unwrap();
        assert_eq!(pending.state(), ChunkState::Interrupted);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(stats.outstanding(), 0);
        assert_eq!(handle.status(), SessionStatus::Closed);

        let late = handle.submit(AudioChunk::new(vec![1u8]));
        assert_eq!(late.err(), Some(PipelineError::SessionClosed));
    }

    #[tokio::test]
    async fn test_connection_loss_fails_session() {
        let writer = RecordingWriter::failing_after(0);
        let session = PlaybackCoordinator::start("MZ1", writer, &config());
        let handle = session.handle();

        let pending = handle.submit(AudioChunk::new(vec![0u8])).unwrap();
        let result = session.join().await;

        assert!(matches!(result, Err(PipelineError::ConnectionLost(_))));
        assert_eq!(pending.state(), ChunkState::Interrupted);
        assert!(matches!(
            handle.closed().await,
            SessionStatus::Failed(PipelineError::ConnectionLost(_))
        ));
    }

    #[tokio::test]
    async fn test_mismatched_ack_fails_session() {
        let writer = RecordingWriter::new();
        let session = PlaybackCoordinator::start("MZ1", writer, &config());
        let handle = session.handle();

        handle.submit(AudioChunk::new(vec![0u8])).unwrap();
        handle.acknowledge("not-a-chunk").unwrap();

        let result = session.join().await;
        assert!(result.unwrap_err().is_protocol_violation());
        assert!(!handle.is_active());
    }

    #[tokio::test]
    async fn test_closed_reports_terminal_status() {
        let session = PlaybackCoordinator::start("MZ1", RecordingWriter::new(), &config());
        let handle = session.handle();

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.closed().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        session.shutdown().await.unwrap();
        assert_eq!(waiter.await.unwrap(), SessionStatus::Closed);
        assert_eq!(handle.closed().await, SessionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_last_chunk_waits_for_shutdown() {
        let writer = RecordingWriter::new();
        let session = PlaybackCoordinator::start("MZ1", writer.clone(), &config());
        let handle = session.handle();

        let a = handle.submit(AudioChunk::new(vec![0u8])).unwrap();
        let b = handle.submit(AudioChunk::new(vec![1u8])).unwrap();
        writer.wait_for(4).await;

        // only the first mark ever comes back
        handle.acknowledge(writer.mark_names()[0].clone()).unwrap();
        wait_resolved(&a).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(handle.is_active());
        assert_eq!(b.state(), ChunkState::Unplayed);

        let stats = session.shutdown().await.unwrap();
        assert_eq!(a.state(), ChunkState::Played);
        assert_eq!(b.state(), ChunkState::Interrupted);
        assert_eq!((stats.played, stats.interrupted), (1, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submitters_keep_pairs_adjacent() {
        const TASKS: usize = 8;
        const PER_TASK: usize = 50;

        let writer = RecordingWriter::new();
        let session = PlaybackCoordinator::start("MZ1", writer.clone(), &config());
        let handle = session.handle();

        let tasks: Vec<_> = (0..TASKS)
            .map(|t| {
                let handle = handle.clone();
                tokio::spawn(async move {
                    for i in 0..PER_TASK {
                        handle.submit(AudioChunk::new(vec![t as u8, i as u8])).unwrap();
                        if i % 10 == 9 {
                            handle.interrupt().unwrap();
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let clears = TASKS * PER_TASK / 10;
        let expected = TASKS * PER_TASK * 2 + clears;
        writer.wait_for(expected).await;

        let kinds = writer.kinds();
        assert_eq!(kinds.len(), expected);
        assert_eq!(kinds.iter().filter(|k| *k == "clear").count(), clears);
        for (i, kind) in kinds.iter().enumerate() {
            match kind.as_str() {
                "media" => assert_eq!(kinds[i + 1], "mark", "media at {} split from its mark", i),
                "mark" => assert_eq!(kinds[i - 1], "media", "mark at {} without media", i),
                _ => {}
            }
        }

        let stats = session.shutdown().await.unwrap();
        assert_eq!(stats.submitted, (TASKS * PER_TASK) as u64);
        assert_eq!(stats.outstanding(), 0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_every_chunk_resolves_once_in_order(
                interrupted in proptest::collection::vec(any::<bool>(), 1..24)
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();

                let (log, stats) = runtime.block_on(async {
                    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
                    let writer = RecordingWriter::new();
                    let session = PlaybackCoordinator::start("MZ1", writer.clone(), &config());
                    let handle = session.handle();

                    let handles: Vec<ChunkHandle> = (0..interrupted.len())
                        .map(|i| {
                            let played = log.clone();
                            let dropped = log.clone();
                            let chunk = AudioChunk::new(vec![0u8])
                                .on_play(move || played.lock().push(format!("{}:played", i)))
                                .on_interrupt(move || dropped.lock().push(format!("{}:interrupted", i)));
                            handle.submit(chunk).unwrap()
                        })
                        .collect();

                    for (chunk, flagged) in handles.iter().zip(&interrupted) {
                        if *flagged {
                            assert!(chunk.interrupt());
                        }
                    }

                    writer.wait_for(handles.len() * 2).await;
                    for mark in writer.mark_names() {
                        handle.acknowledge(mark).unwrap();
                    }
                    for chunk in &handles {
                        wait_resolved(chunk).await;
                    }

                    let stats = session.shutdown().await.unwrap();
                    let log = log.lock().clone();
                    (log, stats)
                });

                let expected: Vec<String> = interrupted
                    .iter()
                    .enumerate()
                    .map(|(i, flagged)| {
                        format!("{}:{}", i, if *flagged { "interrupted" } else { "played" })
                    })
                    .collect();
                prop_assert_eq!(log, expected);

                let flagged = interrupted.iter().filter(|f| **f).count() as u64;
                prop_assert_eq!(stats.interrupted, flagged);
                prop_assert_eq!(stats.played, interrupted.len() as u64 - flagged);
                prop_assert_eq!(stats.outstanding(), 0);
            }
        }
    }
}
