//! # Voice Changer Node
//!
//! The controller that sits between the real-time engine and the conversion
//! service. It is an actix actor: every piece of mutable state (frame queue,
//! active transport, recording buffer, pending start/stop awaiters) lives
//! inside the actor and is only touched from its handlers, one message at a
//! time.
//!
//! ## Data Flow:
//! ```text
//! engine --inputData--> encode --> accumulator --window--> dispatcher --> server
//!                                                                           |
//! engine/downstream <-- router <-- decode <-------- TransportEvent ---------+
//! ```
//!
//! ## Lifecycle:
//! `Idle -> Starting -> Running -> Stopping -> Idle`. `start()` and `stop()`
//! post a directive to the engine and resolve when the matching `start_ok` /
//! `stop_ok` acknowledgment arrives. Frame intake and configuration are
//! accepted in every state.
//!
//! ## Failure Handling:
//! Runtime faults are reported through the listener and the stream goes on;
//! a bad window never stops the node.

use crate::audio::{RequestAccumulator, SampleFormat};
use crate::config::{ProcessingSettings, TransportSettings};
use crate::engine::{AudioEngine, EngineEvent, EngineRequest};
use crate::error::{BridgeError, BridgeResult};
use crate::listener::WorkletListener;
use crate::router::{ReceivedVoice, ResponseRouter};
use crate::stats::NodeStats;
use crate::transport::{InternalCallback, TransportDispatcher, TransportEvent};
use actix::prelude::*;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Where the node is in its start/stop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, MessageResponse)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Why a start or stop awaiter did not complete normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// A newer call of the same kind took over the pending slot
    Superseded,
    /// The node stopped before the acknowledgment arrived
    NodeStopped,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::Superseded => write!(f, "superseded by a newer request"),
            LifecycleError::NodeStopped => write!(f, "node stopped before acknowledgment"),
        }
    }
}

impl std::error::Error for LifecycleError {}

impl From<MailboxError> for LifecycleError {
    fn from(_: MailboxError) -> Self {
        LifecycleError::NodeStopped
    }
}

type Awaiter = oneshot::Sender<Result<(), LifecycleError>>;

#[derive(Message)]
#[rtype(result = "Result<(), LifecycleError>")]
pub struct Start;

#[derive(Message)]
#[rtype(result = "Result<(), LifecycleError>")]
pub struct Stop;

/// Forward truncation thresholds to the engine.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Configure(pub ProcessingSettings);

#[derive(Message)]
#[rtype(result = "()")]
pub struct TruncateBuffer;

/// Replace the transport settings; resolves to whether the transport was
/// recreated.
#[derive(Message)]
#[rtype(result = "BridgeResult<bool>")]
pub struct UpdateSettings(pub TransportSettings);

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetOutputNode(pub Option<Recipient<ReceivedVoice>>);

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetInternalCallback(pub Arc<dyn InternalCallback>);

#[derive(Message)]
#[rtype(result = "()")]
pub struct StartOutputRecording;

#[derive(Message)]
#[rtype(result = "Vec<f32>")]
pub struct StopOutputRecording;

#[derive(Message)]
#[rtype(result = "TransportSettings")]
pub struct GetSettings;

#[derive(Message)]
#[rtype(result = "NodeStats")]
pub struct GetStats;

#[derive(Message)]
#[rtype(result = "LifecycleState")]
pub struct GetState;

#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

pub struct VoiceChangerNode {
    engine: Box<dyn AudioEngine>,
    listener: Box<dyn WorkletListener>,
    accumulator: RequestAccumulator,
    dispatcher: TransportDispatcher,
    router: ResponseRouter,
    state: LifecycleState,

    /// Single-slot awaiters, one per operation kind
    pending_start: Option<Awaiter>,
    pending_stop: Option<Awaiter>,

    /// Start of the window currently being filled
    buffer_start: Instant,

    stats: NodeStats,
}

impl VoiceChangerNode {
    /// Create a node on the current arbiter and return a handle to it.
    ///
    /// The engine receives every directive and every locally played window;
    /// engine events are fed back through [`NodeHandle::engine_events`].
    pub fn spawn<E, L>(engine: E, listener: L, settings: TransportSettings) -> NodeHandle
    where
        E: AudioEngine + 'static,
        L: WorkletListener + 'static,
    {
        let addr = VoiceChangerNode::create(|ctx| {
            let events = ctx.address().recipient::<TransportEvent>();
            VoiceChangerNode {
                engine: Box::new(engine),
                listener: Box::new(listener),
                accumulator: RequestAccumulator::new(settings.input_chunk_num),
                dispatcher: TransportDispatcher::new(settings, events),
                router: ResponseRouter::new(),
                state: LifecycleState::Idle,
                pending_start: None,
                pending_stop: None,
                buffer_start: Instant::now(),
                stats: NodeStats::default(),
            }
        });
        NodeHandle { addr }
    }

    /// Encode one capture frame and dispatch a window once enough frames
    /// have accumulated.
    fn push_frame(&mut self, frame: &[f32]) {
        let format = self.dispatcher.sample_format();
        let Some(window) = self.accumulator.push(format.encode(frame)) else {
            return;
        };

        let bytes = window.len();
        match self.dispatcher.send(window) {
            Ok(()) => self.stats.record_window(bytes),
            Err(err) => self.report(err),
        }

        let buffering = self.buffer_start.elapsed().as_millis() as u64;
        self.listener.notify_send_buffering_time(buffering);
        self.buffer_start = Instant::now();
    }

    fn on_voice(
        &mut self,
        payload: Vec<u8>,
        format: SampleFormat,
        response_time_ms: u64,
        perf: Option<Vec<f64>>,
    ) {
        let samples = match format.decode(&payload) {
            Ok(samples) => samples,
            Err(err) => return self.report(err),
        };

        self.stats.record_response_time(response_time_ms);
        self.listener
            .notify_response_time(response_time_ms, perf.as_deref());

        let delivery = self.router.deliver(samples, self.engine.as_ref());
        self.stats.record_delivery();
        debug!(?delivery, bytes = payload.len(), "Response delivered");
    }

    fn acknowledge_start(&mut self) {
        match self.pending_start.take() {
            Some(awaiter) => {
                self.state = LifecycleState::Running;
                let _ = awaiter.send(Ok(()));
                info!("Node running");
            }
            None => debug!("start_ok without a pending start, ignored"),
        }
    }

    fn acknowledge_stop(&mut self) {
        match self.pending_stop.take() {
            Some(awaiter) => {
                self.state = LifecycleState::Idle;
                let _ = awaiter.send(Ok(()));
                info!("Node idle");
            }
            None => debug!("stop_ok without a pending stop, ignored"),
        }
    }

    /// Hand a runtime fault to the listener.
    fn report(&mut self, err: BridgeError) {
        self.stats.record_error();
        if matches!(err, BridgeError::ResponseTooShort(_)) {
            self.stats.record_rejection();
        }
        warn!(code = %err.exception(), error = %err, "Stream fault");
        self.listener.notify_exception(err.exception(), &err.to_string());
    }
}

/// Install a fresh awaiter in `slot`, releasing any caller already waiting.
fn replace_awaiter(slot: &mut Option<Awaiter>, kind: &str) -> oneshot::Receiver<Result<(), LifecycleError>> {
    let (tx, rx) = oneshot::channel();
    if let Some(previous) = slot.replace(tx) {
        warn!("{} requested while one is pending, earlier caller superseded", kind);
        let _ = previous.send(Err(LifecycleError::Superseded));
    }
    rx
}

impl Actor for VoiceChangerNode {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        let settings = self.dispatcher.settings();
        info!(
            protocol = %settings.protocol,
            url = %settings.server_url,
            chunks = settings.input_chunk_num,
            "Voice changer node started"
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.dispatcher.close();
        info!(
            windows = self.stats.windows_sent,
            delivered = self.stats.responses_delivered,
            errors = self.stats.error_count,
            "Voice changer node stopped"
        );
    }
}

impl Handler<EngineEvent> for VoiceChangerNode {
    type Result = ();

    fn handle(&mut self, event: EngineEvent, _ctx: &mut Self::Context) {
        match event {
            EngineEvent::Volume { volume } => self.listener.notify_volume(volume),
            EngineEvent::InputData { input_data } => self.push_frame(&input_data),
            EngineEvent::StartOk => self.acknowledge_start(),
            EngineEvent::StopOk => self.acknowledge_stop(),
            EngineEvent::Unknown => warn!("Unknown engine event dropped"),
        }
    }
}

impl Handler<TransportEvent> for VoiceChangerNode {
    type Result = ();

    fn handle(&mut self, event: TransportEvent, _ctx: &mut Self::Context) {
        match event {
            TransportEvent::Voice {
                payload,
                format,
                response_time_ms,
                perf,
            } => self.on_voice(payload, format, response_time_ms, perf),
            TransportEvent::DevicePerformance {
                response_time_ms,
                perf,
            } => self
                .listener
                .notify_response_time(response_time_ms, Some(perf.as_slice())),
            TransportEvent::Failure(err) => self.report(err),
        }
    }
}

impl Handler<ReceivedVoice> for VoiceChangerNode {
    type Result = ();

    fn handle(&mut self, msg: ReceivedVoice, _ctx: &mut Self::Context) {
        self.router.play_local(msg.samples, self.engine.as_ref());
    }
}

impl Handler<Start> for VoiceChangerNode {
    type Result = ResponseFuture<Result<(), LifecycleError>>;

    fn handle(&mut self, _msg: Start, _ctx: &mut Self::Context) -> Self::Result {
        let ack = replace_awaiter(&mut self.pending_start, "start");
        self.state = LifecycleState::Starting;
        self.engine.post(EngineRequest::Start);

        Box::pin(async move { ack.await.unwrap_or(Err(LifecycleError::NodeStopped)) })
    }
}

impl Handler<Stop> for VoiceChangerNode {
    type Result = ResponseFuture<Result<(), LifecycleError>>;

    fn handle(&mut self, _msg: Stop, _ctx: &mut Self::Context) -> Self::Result {
        let ack = replace_awaiter(&mut self.pending_stop, "stop");
        self.state = LifecycleState::Stopping;
        self.engine.post(EngineRequest::Stop);

        Box::pin(async move { ack.await.unwrap_or(Err(LifecycleError::NodeStopped)) })
    }
}

impl Handler<Configure> for VoiceChangerNode {
    type Result = ();

    fn handle(&mut self, msg: Configure, _ctx: &mut Self::Context) {
        self.engine.post(EngineRequest::from(&msg.0));
    }
}

impl Handler<TruncateBuffer> for VoiceChangerNode {
    type Result = ();

    fn handle(&mut self, _msg: TruncateBuffer, _ctx: &mut Self::Context) {
        self.engine.post(EngineRequest::TruncateBuffer);
        let discarded = self.accumulator.flush();
        debug!(discarded, "Buffered frames truncated");
    }
}

impl Handler<UpdateSettings> for VoiceChangerNode {
    type Result = BridgeResult<bool>;

    fn handle(&mut self, msg: UpdateSettings, _ctx: &mut Self::Context) -> Self::Result {
        let settings = msg.0;
        settings.validate()?;

        let previous_format = self.dispatcher.sample_format();
        self.accumulator.set_chunk_count(settings.input_chunk_num);
        let recreated = self.dispatcher.update(settings);

        // frames encoded for the old wire format cannot join a new window
        if recreated && self.dispatcher.sample_format() != previous_format {
            let discarded = self.accumulator.flush();
            debug!(discarded, "Sample format changed, buffered frames dropped");
        }

        Ok(recreated)
    }
}

impl Handler<SetOutputNode> for VoiceChangerNode {
    type Result = ();

    fn handle(&mut self, msg: SetOutputNode, _ctx: &mut Self::Context) {
        self.router.set_output(msg.0);
    }
}

impl Handler<SetInternalCallback> for VoiceChangerNode {
    type Result = ();

    fn handle(&mut self, msg: SetInternalCallback, _ctx: &mut Self::Context) {
        self.dispatcher.set_callback(msg.0);
    }
}

impl Handler<StartOutputRecording> for VoiceChangerNode {
    type Result = ();

    fn handle(&mut self, _msg: StartOutputRecording, _ctx: &mut Self::Context) {
        self.router.start_recording();
    }
}

impl Handler<StopOutputRecording> for VoiceChangerNode {
    type Result = MessageResult<StopOutputRecording>;

    fn handle(&mut self, _msg: StopOutputRecording, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.router.stop_recording())
    }
}

impl Handler<GetSettings> for VoiceChangerNode {
    type Result = MessageResult<GetSettings>;

    fn handle(&mut self, _msg: GetSettings, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.dispatcher.settings().clone())
    }
}

impl Handler<GetStats> for VoiceChangerNode {
    type Result = NodeStats;

    fn handle(&mut self, _msg: GetStats, _ctx: &mut Self::Context) -> Self::Result {
        self.stats.clone()
    }
}

impl Handler<GetState> for VoiceChangerNode {
    type Result = LifecycleState;

    fn handle(&mut self, _msg: GetState, _ctx: &mut Self::Context) -> Self::Result {
        self.state
    }
}

impl Handler<Shutdown> for VoiceChangerNode {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) {
        ctx.stop();
    }
}

/// Cloneable front door to a running node.
#[derive(Clone)]
pub struct NodeHandle {
    addr: Addr<VoiceChangerNode>,
}

impl NodeHandle {
    pub fn addr(&self) -> &Addr<VoiceChangerNode> {
        &self.addr
    }

    /// Where the engine delivers its events.
    pub fn engine_events(&self) -> Recipient<EngineEvent> {
        self.addr.clone().recipient()
    }

    /// Ask the engine to start; resolves on `start_ok`.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        self.addr.send(Start).await?
    }

    /// Ask the engine to stop; resolves on `stop_ok`.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        self.addr.send(Stop).await?
    }

    pub fn configure(&self, settings: ProcessingSettings) {
        self.addr.do_send(Configure(settings));
    }

    pub fn truncate_buffer(&self) {
        self.addr.do_send(TruncateBuffer);
    }

    /// Apply new transport settings. Returns `true` if the transport was
    /// recreated.
    pub async fn update_settings(&self, settings: TransportSettings) -> BridgeResult<bool> {
        self.addr
            .send(UpdateSettings(settings))
            .await
            .map_err(|e| BridgeError::Config(format!("node unavailable: {}", e)))?
    }

    /// Route this node's output into `next` instead of the local engine.
    pub fn set_output_node(&self, next: Option<&NodeHandle>) {
        let output = next.map(|node| node.addr.clone().recipient::<ReceivedVoice>());
        self.addr.do_send(SetOutputNode(output));
    }

    pub fn set_internal_callback(&self, callback: Arc<dyn InternalCallback>) {
        self.addr.do_send(SetInternalCallback(callback));
    }

    pub fn start_output_recording(&self) {
        self.addr.do_send(StartOutputRecording);
    }

    pub async fn stop_output_recording(&self) -> Result<Vec<f32>, LifecycleError> {
        Ok(self.addr.send(StopOutputRecording).await?)
    }

    pub async fn settings(&self) -> Result<TransportSettings, LifecycleError> {
        Ok(self.addr.send(GetSettings).await?)
    }

    pub async fn stats(&self) -> Result<NodeStats, LifecycleError> {
        Ok(self.addr.send(GetStats).await?)
    }

    pub async fn state(&self) -> Result<LifecycleState, LifecycleError> {
        Ok(self.addr.send(GetState).await?)
    }

    pub fn shutdown(&self) {
        self.addr.do_send(Shutdown);
    }
}
