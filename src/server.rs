//! HTTP server: media stream endpoint and call control API
//!
//! The telephony provider connects its media stream WebSocket to
//! `server.media_path`. Each connection becomes one call with its own
//! playback session. The JSON API lets an external dispatcher speak text on
//! a call and interrupt it; the server itself never decides either.

use axum::{
    extract::{ws::WebSocket, Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::{Error, PipelineError, SynthesisError};
use crate::output::{AudioChunk, ChunkHandle, InterruptFlag, PlaybackHandle, SessionStats};
use crate::synthesizer::Synthesizer;
use crate::transport::{drive_media_stream, text_frames};

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// One queued utterance: its shared flag and the chunks it was cut into
struct Utterance {
    flag: InterruptFlag,
    chunks: Vec<ChunkHandle>,
}

impl Utterance {
    fn is_finished(&self) -> bool {
        self.chunks.iter().all(|chunk| chunk.state().is_terminal())
    }
}

/// One active call
pub struct CallEntry {
    pub handle: PlaybackHandle,
    /// Utterances with chunks still waiting for an outcome
    utterances: Mutex<Vec<Utterance>>,
}

impl CallEntry {
    fn new(handle: PlaybackHandle) -> Self {
        Self {
            handle,
            utterances: Mutex::new(Vec::new()),
        }
    }

    /// Interrupt every queued utterance and flush the endpoint's buffer
    pub fn interrupt(&self) -> Result<usize, PipelineError> {
        let utterances: Vec<Utterance> = self.utterances.lock().drain(..).collect();
        let pending = utterances.iter().filter(|u| !u.is_finished()).count();
        for utterance in &utterances {
            utterance.flag.interrupt();
        }
        self.handle.interrupt()?;
        Ok(pending)
    }

    fn track(&self, utterance: Utterance) {
        let mut utterances = self.utterances.lock();
        utterances.retain(|u| !u.is_finished());
        utterances.push(utterance);
    }

    /// Number of utterances still playing or queued
    pub fn pending_utterances(&self) -> usize {
        self.utterances.lock().iter().filter(|u| !u.is_finished()).count()
    }
}

/// Shared server state
pub struct AppState {
    pub config: AppConfig,
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
    pub calls: DashMap<String, Arc<CallEntry>>,
}

impl AppState {
    pub fn new(config: AppConfig, synthesizer: Option<Arc<dyn Synthesizer>>) -> Self {
        Self {
            config,
            synthesizer,
            calls: DashMap::new(),
        }
    }
}

/// Synthesize `text` and queue it on a call. Returns the number of chunks queued.
pub async fn speak(state: &AppState, call: &CallEntry, text: &str) -> Result<usize, Error> {
    let synthesizer = state
        .synthesizer
        .as_ref()
        .ok_or(SynthesisError::MissingApiKey)?;

    let result = synthesizer
        .synthesize(text, state.config.pipeline.chunk_size)
        .await?;

    // Tracked before submission so an interrupt racing with it still lands
    let flag = InterruptFlag::new();
    let chunks = result.into_audio_chunks(&flag);
    call.track(Utterance {
        flag,
        chunks: chunks.iter().map(AudioChunk::handle).collect(),
    });

    let queued = chunks.len();
    for chunk in chunks {
        call.handle.submit(chunk)?;
    }
    info!(
        "Queued {} chunks on {} via {}",
        queued,
        call.handle.stream_sid(),
        synthesizer.id()
    );
    Ok(queued)
}

/// Build the router
pub fn router(state: Arc<AppState>) -> Router {
    let media_path = state.config.server.media_path.clone();
    Router::new()
        .route(&media_path, get(media_stream))
        .route("/calls", get(list_calls))
        .route("/calls/:sid/speak", post(speak_on_call))
        .route("/calls/:sid/interrupt", post(interrupt_call))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn media_stream(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sink, stream) = socket.split();
    let mut stream_sid = None;

    let outcome = drive_media_stream(
        text_frames(stream),
        sink,
        &state.config.pipeline,
        |start, handle| {
            let entry = Arc::new(CallEntry::new(handle));
            state.calls.insert(start.stream_sid.clone(), entry.clone());
            stream_sid = Some(start.stream_sid.clone());

            if let Some(greeting) = state.config.pipeline.greeting.clone() {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = speak(&state, &entry, &greeting).await {
                        warn!("Greeting failed: {}", e);
                    }
                });
            }
        },
    )
    .await;

    if let Some(sid) = stream_sid {
        state.calls.remove(&sid);
    }

    match outcome {
        Ok(stats) => info!(
            "Call ended: {} played, {} interrupted",
            stats.played, stats.interrupted
        ),
        Err(e) => error!("Call ended with error: {}", e),
    }
}

/// Active call summary
#[derive(serde::Serialize)]
pub struct CallSummary {
    pub stream_sid: String,
    pub pending_utterances: usize,
    pub stats: SessionStats,
}

async fn list_calls(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<CallSummary>>> {
    let calls = state
        .calls
        .iter()
        .map(|entry| CallSummary {
            stream_sid: entry.key().clone(),
            pending_utterances: entry.value().pending_utterances(),
            stats: entry.value().handle.stats(),
        })
        .collect();
    Json(ApiResponse::ok(calls))
}

#[derive(serde::Deserialize)]
pub struct SpeakRequest {
    pub text: String,
}

fn find_call(state: &AppState, sid: &str) -> Option<Arc<CallEntry>> {
    state.calls.get(sid).map(|entry| entry.value().clone())
}

async fn speak_on_call(
    State(state): State<Arc<AppState>>,
    Path(sid): Path<String>,
    Json(req): Json<SpeakRequest>,
) -> (StatusCode, Json<ApiResponse<usize>>) {
    let Some(call) = find_call(&state, &sid) else {
        return (StatusCode::NOT_FOUND, Json(ApiResponse::error("Unknown call")));
    };

    match speak(&state, &call, &req.text).await {
        Ok(queued) => (StatusCode::OK, Json(ApiResponse::ok(queued))),
        Err(Error::Pipeline(e)) => (StatusCode::GONE, Json(ApiResponse::error(e.to_string()))),
        Err(e) => (StatusCode::BAD_GATEWAY, Json(ApiResponse::error(e.to_string()))),
    }
}

async fn interrupt_call(
    State(state): State<Arc<AppState>>,
    Path(sid): Path<String>,
) -> (StatusCode, Json<ApiResponse<usize>>) {
    let Some(call) = find_call(&state, &sid) else {
        return (StatusCode::NOT_FOUND, Json(ApiResponse::error("Unknown call")));
    };

    match call.interrupt() {
        Ok(utterances) => (StatusCode::OK, Json(ApiResponse::ok(utterances))),
        Err(e) => (StatusCode::GONE, Json(ApiResponse::error(e.to_string()))),
    }
}
