//! # Request Accumulator
//!
//! Collects encoded capture frames until enough have arrived to fill one
//! request window, then hands back the window as a single contiguous buffer.
//!
//! ## Key Features:
//! - **Push order**: frames are concatenated exactly in the order they arrived
//! - **Live chunk count**: changing the count only affects future pushes, the
//!   frames already buffered are neither flushed nor dropped
//! - **Explicit discard**: `flush` drops buffered frames on a discontinuity
//!   (device switch, truncate request) without dispatching them

use std::collections::VecDeque;
use tracing::debug;

/// Frame queue for one node.
///
/// ## Ownership:
/// Owned exclusively by the node actor, so no locking is needed. Compare to a
/// shared capture buffer, which would need `Arc<Mutex<..>>`.
#[derive(Debug)]
pub struct RequestAccumulator {
    /// Encoded frames waiting for the window to fill
    chunks: VecDeque<Vec<u8>>,

    /// Number of frames per window
    chunk_count: usize,
}

impl RequestAccumulator {
    /// Create an accumulator emitting one window every `chunk_count` frames.
    ///
    /// A count of 0 is treated as 1 so every frame becomes its own window.
    pub fn new(chunk_count: usize) -> Self {
        let chunk_count = chunk_count.max(1);
        Self {
            chunks: VecDeque::with_capacity(chunk_count),
            chunk_count,
        }
    }

    /// Append one encoded frame.
    ///
    /// ## Returns:
    /// - **Some(window)**: the buffered frames reached the chunk count; they are
    ///   concatenated in push order and the queue is emptied
    /// - **None**: still waiting for more frames
    ///
    /// If the chunk count was lowered below the number of frames already
    /// buffered, the next push emits everything that is buffered.
    pub fn push(&mut self, frame: Vec<u8>) -> Option<Vec<u8>> {
        self.chunks.push_back(frame);

        if self.chunks.len() < self.chunk_count {
            return None;
        }

        let window_len = self.buffered_bytes();
        let mut window = Vec::with_capacity(window_len);
        for chunk in self.chunks.drain(..) {
            window.extend_from_slice(&chunk);
        }

        Some(window)
    }

    /// Change the number of frames per window for future accumulation.
    pub fn set_chunk_count(&mut self, chunk_count: usize) {
        let chunk_count = chunk_count.max(1);
        if chunk_count != self.chunk_count {
            debug!(
                from = self.chunk_count,
                to = chunk_count,
                buffered = self.chunks.len(),
                "Chunk count changed"
            );
        }
        self.chunk_count = chunk_count;
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Drop all buffered frames without dispatching them.
    ///
    /// Returns the number of frames discarded.
    pub fn flush(&mut self) -> usize {
        let discarded = self.chunks.len();
        self.chunks.clear();
        discarded
    }

    /// Number of frames currently buffered.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total bytes currently buffered.
    pub fn buffered_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8, len: usize) -> Vec<u8> {
        vec![tag; len]
    }

    #[test]
    fn test_n_minus_one_frames_emit_nothing() {
        let mut acc = RequestAccumulator::new(4);
        for i in 0..3 {
            assert!(acc.push(frame(i, 8)).is_none());
        }
        assert_eq!(acc.len(), 3);
        assert_eq!(acc.buffered_bytes(), 24);
    }

    #[test]
    fn test_n_frames_emit_one_window_in_push_order() {
        let mut acc = RequestAccumulator::new(3);
        assert!(acc.push(frame(1, 4)).is_none());
        assert!(acc.push(frame(2, 2)).is_none());
        let window = acc.push(frame(3, 6)).expect("window should be emitted");

        assert_eq!(window.len(), 12);
        assert_eq!(&window[..4], &[1, 1, 1, 1]);
        assert_eq!(&window[4..6], &[2, 2]);
        assert_eq!(&window[6..], &[3; 6]);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_chunk_count_change_keeps_buffered_frames() {
        let mut acc = RequestAccumulator::new(4);
        acc.push(frame(1, 2));
        acc.push(frame(2, 2));

        acc.set_chunk_count(8);
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.chunk_count(), 8);

        for i in 3..8 {
            assert!(acc.push(frame(i, 2)).is_none());
        }
        let window = acc.push(frame(8, 2)).unwrap();
        assert_eq!(window.len(), 16);
        assert_eq!(window[0], 1);
    }

    #[test]
    fn test_lowered_chunk_count_emits_on_next_push() {
        let mut acc = RequestAccumulator::new(4);
        acc.push(frame(1, 2));
        acc.push(frame(2, 2));
        acc.push(frame(3, 2));

        acc.set_chunk_count(2);
        let window = acc.push(frame(4, 2)).unwrap();
        assert_eq!(window, vec![1, 1, 2, 2, 3, 3, 4, 4]);
    }

    #[test]
    fn test_flush_discards_without_emitting() {
        let mut acc = RequestAccumulator::new(2);
        acc.push(frame(1, 2));
        assert_eq!(acc.flush(), 1);
        assert!(acc.is_empty());

        assert!(acc.push(frame(2, 2)).is_none());
        assert_eq!(acc.push(frame(3, 2)).unwrap(), vec![2, 2, 3, 3]);
    }
}
