//! # Response Routing
//!
//! Decides where a decoded response window goes: the optional downstream
//! node, or the local engine. A copy is taken for the output recorder first
//! when recording is active.
//!
//! ## Chaining:
//! The downstream link is a single optional edge to another node's
//! [`ReceivedVoice`] entry point. That entry point only ever plays locally,
//! so a window travels at most one hop and no chain can loop back on itself.

use crate::audio::OutputRecorder;
use crate::engine::{AudioEngine, EngineRequest};
use actix::{Message, Recipient};
use tracing::debug;

/// Decoded audio handed over by an upstream node.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct ReceivedVoice {
    pub samples: Vec<f32>,
}

/// Where a delivered window ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Forwarded to the downstream node
    Chained,
    /// Posted to the local engine
    Local,
}

#[derive(Default)]
pub struct ResponseRouter {
    output: Option<Recipient<ReceivedVoice>>,
    recorder: OutputRecorder,
}

impl ResponseRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear the downstream link. The linked node is not owned.
    pub fn set_output(&mut self, output: Option<Recipient<ReceivedVoice>>) {
        debug!(chained = output.is_some(), "Output link updated");
        self.output = output;
    }

    /// Route one decoded window.
    pub fn deliver(&mut self, samples: Vec<f32>, engine: &dyn AudioEngine) -> Delivery {
        self.recorder.append(&samples);

        match &self.output {
            Some(next) => {
                next.do_send(ReceivedVoice { samples });
                Delivery::Chained
            }
            None => {
                engine.post(EngineRequest::Voice { voice: samples });
                Delivery::Local
            }
        }
    }

    /// Play a window handed over by an upstream node. Never forwards.
    pub fn play_local(&mut self, samples: Vec<f32>, engine: &dyn AudioEngine) {
        self.recorder.append(&samples);
        engine.post(EngineRequest::Voice { voice: samples });
    }

    pub fn start_recording(&mut self) {
        self.recorder.start();
    }

    pub fn stop_recording(&mut self) -> Vec<f32> {
        self.recorder.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix::{Actor, Context, Handler};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingEngine {
        posted: RefCell<Vec<EngineRequest>>,
    }

    impl AudioEngine for RecordingEngine {
        fn post(&self, request: EngineRequest) {
            self.posted.borrow_mut().push(request);
        }
    }

    struct Collector {
        received: Arc<Mutex<Vec<Vec<f32>>>>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<ReceivedVoice> for Collector {
        type Result = ();

        fn handle(&mut self, msg: ReceivedVoice, _ctx: &mut Self::Context) {
            self.received.lock().unwrap().push(msg.samples);
        }
    }

    #[test]
    fn test_local_delivery_posts_voice() {
        let engine = RecordingEngine::default();
        let mut router = ResponseRouter::new();

        assert_eq!(router.deliver(vec![0.5; 4], &engine), Delivery::Local);
        assert_eq!(
            engine.posted.borrow().as_slice(),
            &[EngineRequest::Voice { voice: vec![0.5; 4] }]
        );
    }

    #[test]
    fn test_recording_captures_local_and_forwarded_audio() {
        let engine = RecordingEngine::default();
        let mut router = ResponseRouter::new();

        router.deliver(vec![0.1; 3], &engine);
        router.start_recording();
        router.deliver(vec![0.2; 2], &engine);
        router.play_local(vec![0.3; 1], &engine);

        assert_eq!(router.stop_recording(), vec![0.2, 0.2, 0.3]);
    }

    #[actix::test]
    async fn test_chained_delivery_skips_local_engine() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let collector = Collector {
            received: received.clone(),
        }
        .start();

        let engine = Rc::new(RecordingEngine::default());
        let mut router = ResponseRouter::new();
        router.set_output(Some(collector.clone().recipient()));

        assert_eq!(router.deliver(vec![0.25; 8], engine.as_ref()), Delivery::Chained);

        // ordered behind the ReceivedVoice message in the collector's mailbox
        collector.send(ReceivedVoice { samples: vec![] }).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received[0], vec![0.25; 8]);
        assert!(engine.posted.borrow().is_empty());
    }
}
