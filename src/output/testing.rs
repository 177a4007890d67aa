//! In-memory connection used by the pipeline tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::TransportError;
use crate::transport::FrameWriter;

/// Records every frame written; optionally fails after N writes
#[derive(Clone, Default)]
pub struct RecordingWriter {
    frames: Arc<Mutex<Vec<serde_json::Value>>>,
    fail_after: Option<usize>,
    written: Arc<Notify>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(writes: usize) -> Self {
        Self {
            fail_after: Some(writes),
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<serde_json::Value> {
        self.frames.lock().clone()
    }

    /// `event` field of each written frame
    pub fn kinds(&self) -> Vec<String> {
        self.frames()
            .iter()
            .map(|f| f["event"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Mark names in write order
    pub fn mark_names(&self) -> Vec<String> {
        self.frames()
            .iter()
            .filter(|f| f["event"] == "mark")
            .map(|f| f["mark"]["name"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Wait until at least `count` frames have been written
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.written.notified();
            if self.frames.lock().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl FrameWriter for RecordingWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let mut frames = self.frames.lock();
        if self.fail_after.is_some_and(|limit| frames.len() >= limit) {
            return Err(TransportError::SendFailed("connection reset".into()));
        }
        let frame = serde_json::from_str(&text)
            .map_err(|e| TransportError::SendFailed(format!("not a JSON frame: {}", e)))?;
        frames.push(frame);
        drop(frames);
        self.written.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_json_frames() {
        let mut writer = RecordingWriter::new();
        writer
            .send_text(r#"{"event":"clear","streamSid":"MZ1"}"#.to_string())
            .await
            .unwrap();
        assert_eq!(writer.kinds(), vec!["clear"]);
    }

    #[tokio::test]
    async fn test_rejects_non_json_text() {
        let mut writer = RecordingWriter::new();
        let err = writer.send_text("not json".to_string()).await.unwrap_err();
        assert!(matches!(err, TransportError::SendFailed(_)));
        assert!(writer.frames().is_empty());
    }
}
