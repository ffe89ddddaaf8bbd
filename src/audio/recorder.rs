//! # Output Recording
//!
//! Captures the converted audio delivered by a node while recording is
//! active.
//!
//! ## Recording Lifecycle:
//! 1. **Idle**: no buffer exists, deliveries are not copied
//! 2. **Recording**: `start` installs a fresh buffer, every delivered window
//!    is appended in delivery order
//! 3. **Stopped**: `stop` takes the buffer and flattens it into one sample
//!    sequence, returning to idle

use tracing::{debug, info};

/// Append-only store of decoded output windows.
///
/// The buffer only exists while recording; `None` means not recording.
#[derive(Debug, Default)]
pub struct OutputRecorder {
    chunks: Option<Vec<Vec<f32>>>,
}

impl OutputRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin recording, discarding anything left from a previous run.
    pub fn start(&mut self) {
        if self.chunks.is_some() {
            debug!("Output recording restarted, previous chunks discarded");
        }
        self.chunks = Some(Vec::new());
        info!("Output recording started");
    }

    pub fn is_recording(&self) -> bool {
        self.chunks.is_some()
    }

    /// Copy one delivered window into the buffer if recording.
    pub fn append(&mut self, samples: &[f32]) {
        if let Some(chunks) = self.chunks.as_mut() {
            chunks.push(samples.to_vec());
        }
    }

    /// Stop recording and return every recorded sample in delivery order.
    ///
    /// Returns an empty vector when recording was not active.
    pub fn stop(&mut self) -> Vec<f32> {
        let chunks = self.chunks.take().unwrap_or_default();
        let total: usize = chunks.iter().map(Vec::len).sum();

        let mut samples = Vec::with_capacity(total);
        for chunk in &chunks {
            samples.extend_from_slice(chunk);
        }

        info!(windows = chunks.len(), samples = total, "Output recording stopped");
        samples
    }
}
