//! # WAV Driver
//!
//! Stands in for the real-time audio engine when running the bridge from the
//! command line: it plays a WAV file into a node at real-time pace, one
//! fixed-size frame per tick, and "renders" whatever the node sends back.
//!
//! ## Engine Behaviour:
//! - **start / stop**: begin or pause capture, acknowledged with
//!   `start_ok` / `stop_ok`
//! - **config**: thresholds for silence gating on capture and for playback
//!   queue truncation
//! - **trancateBuffer**: drop queued playback audio
//! - **voice**: queue a converted window for playback
//!
//! Every captured frame is preceded by a `volume` event carrying its RMS.

use crate::audio::codec::{from_pcm16, to_pcm16};
use crate::config::ProcessingSettings;
use crate::engine::{EngineEvent, EngineRequest};
use crate::error::{BridgeError, BridgeResult};
use actix::Recipient;
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use wav::BitDepth;

/// Mono input loaded from disk.
#[derive(Debug, Clone)]
pub struct WavSource {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Load a WAV file as mono f32; multi-channel files keep their first channel.
pub fn read_wav(path: &Path) -> BridgeResult<WavSource> {
    let mut file = File::open(path)?;
    let (header, data) = wav::read(&mut file)?;

    if header.sampling_rate == 0 {
        return Err(BridgeError::Config(format!(
            "{} has a sample rate of 0",
            path.display()
        )));
    }

    let interleaved: Vec<f32> = match data {
        BitDepth::Eight(raw) => raw.into_iter().map(|s| (s as f32 - 128.0) / 128.0).collect(),
        BitDepth::Sixteen(raw) => raw.into_iter().map(from_pcm16).collect(),
        BitDepth::TwentyFour(raw) => raw.into_iter().map(|s| s as f32 / 8_388_608.0).collect(),
        BitDepth::ThirtyTwoFloat(raw) => raw,
        BitDepth::Empty => Vec::new(),
    };

    let channels = header.channel_count.max(1) as usize;
    let samples: Vec<f32> = interleaved.into_iter().step_by(channels).collect();

    info!(
        path = %path.display(),
        sample_rate = header.sampling_rate,
        channels,
        samples = samples.len(),
        "Input loaded"
    );

    Ok(WavSource {
        samples,
        sample_rate: header.sampling_rate,
    })
}

/// Write mono samples as a 16-bit PCM WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> BridgeResult<()> {
    let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, sample_rate, 16);
    let mut file = File::create(path)?;
    wav::write(header, &BitDepth::Sixteen(to_pcm16(samples)), &mut file)?;

    info!(path = %path.display(), samples = samples.len(), "Output written");
    Ok(())
}

/// Root mean square of one frame.
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f32 = frame.iter().map(|s| s * s).sum();
    (sum / frame.len() as f32).sqrt()
}

/// What the driver did over one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverReport {
    /// Frames handed to the node
    pub frames_pushed: usize,
    /// Silent frames held back by the volume gate
    pub frames_gated: usize,
    /// Converted windows received for playback
    pub windows_received: usize,
    /// Samples drained from the playback queue
    pub samples_rendered: usize,
    /// Times the playback queue overflowed and was cleared
    pub playback_truncations: usize,
}

pub struct WavDriver {
    source: WavSource,
    frame_size: usize,
    thresholds: ProcessingSettings,
    running: bool,
    position: usize,
    silent_run: u32,
    playback: VecDeque<Vec<f32>>,
    report: DriverReport,
}

impl WavDriver {
    pub fn new(source: WavSource, frame_size: usize) -> Self {
        Self {
            source,
            frame_size: frame_size.max(1),
            thresholds: ProcessingSettings::default(),
            running: false,
            position: 0,
            silent_run: 0,
            playback: VecDeque::new(),
            report: DriverReport::default(),
        }
    }

    /// Wall-clock length of one frame.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(self.frame_size as f64 / self.source.sample_rate.max(1) as f64)
    }

    fn exhausted(&self) -> bool {
        self.position >= self.source.samples.len()
    }

    /// Serve engine requests and stream the input until the request channel
    /// closes.
    ///
    /// `finished` fires once, when the last input frame has been pushed; the
    /// driver keeps answering requests afterwards so the node can still be
    /// stopped cleanly.
    pub async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<EngineRequest>,
        node: Recipient<EngineEvent>,
        finished: oneshot::Sender<DriverReport>,
    ) -> DriverReport {
        let mut finished = Some(finished);
        let mut ticker = interval(self.frame_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.apply(request, &node),
                    None => break,
                },
                _ = ticker.tick(), if self.running => {
                    self.render();
                    self.capture(&node);

                    if self.exhausted() {
                        self.running = false;
                        info!(frames = self.report.frames_pushed, "Input exhausted");
                        if let Some(tx) = finished.take() {
                            let _ = tx.send(self.report.clone());
                        }
                    }
                }
            }
        }

        debug!(report = ?self.report, "Driver finished");
        self.report
    }

    fn apply(&mut self, request: EngineRequest, node: &Recipient<EngineEvent>) {
        match request {
            EngineRequest::Start => {
                self.running = !self.exhausted();
                node.do_send(EngineEvent::StartOk);
            }
            EngineRequest::Stop => {
                self.running = false;
                node.do_send(EngineEvent::StopOk);
            }
            EngineRequest::Config {
                num_trancate_treshold,
                vol_trancate_threshold,
                vol_trancate_length,
            } => {
                self.thresholds = ProcessingSettings {
                    num_trancate_treshold,
                    vol_trancate_threshold,
                    vol_trancate_length,
                };
                debug!(thresholds = ?self.thresholds, "Driver configured");
            }
            EngineRequest::TruncateBuffer => {
                let dropped = self.playback.len();
                self.playback.clear();
                debug!(dropped, "Playback queue truncated");
            }
            EngineRequest::Voice { voice } => {
                self.report.windows_received += 1;
                if self.playback.len() >= self.thresholds.num_trancate_treshold.max(1) as usize {
                    self.playback.clear();
                    self.report.playback_truncations += 1;
                }
                self.playback.push_back(voice);
            }
        }
    }

    /// Push the next input frame, zero-padding the tail of the file.
    fn capture(&mut self, node: &Recipient<EngineEvent>) {
        let end = (self.position + self.frame_size).min(self.source.samples.len());
        let mut frame = self.source.samples[self.position..end].to_vec();
        frame.resize(self.frame_size, 0.0);
        self.position = end;

        let volume = rms(&frame);
        node.do_send(EngineEvent::Volume { volume });

        if volume < self.thresholds.vol_trancate_threshold {
            self.silent_run += 1;
        } else {
            self.silent_run = 0;
        }

        if self.silent_run > self.thresholds.vol_trancate_length {
            self.report.frames_gated += 1;
            return;
        }

        node.do_send(EngineEvent::InputData { input_data: frame });
        self.report.frames_pushed += 1;
    }

    /// Drain one frame's worth of samples from the playback queue.
    fn render(&mut self) {
        let mut wanted = self.frame_size;
        while wanted > 0 {
            let Some(front) = self.playback.front_mut() else {
                break;
            };
            let take = wanted.min(front.len());
            front.drain(..take);
            wanted -= take;
            self.report.samples_rendered += take;
            if front.is_empty() {
                self.playback.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix::{Actor, Context, Handler};
    use std::sync::{Arc, Mutex};

    struct Collector {
        events: Arc<Mutex<Vec<EngineEvent>>>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<EngineEvent> for Collector {
        type Result = ();

        fn handle(&mut self, event: EngineEvent, _ctx: &mut Self::Context) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn collector() -> (Recipient<EngineEvent>, Arc<Mutex<Vec<EngineEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let addr = Collector {
            events: events.clone(),
        }
        .start();
        (addr.recipient(), events)
    }

    fn source(samples: Vec<f32>) -> WavSource {
        // 128 samples per millisecond keeps the tests fast
        WavSource {
            samples,
            sample_rate: 128_000,
        }
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.5, -0.5, 0.5, -0.5]), 0.5);
    }

    #[test]
    fn test_frame_period() {
        let driver = WavDriver::new(
            WavSource {
                samples: vec![],
                sample_rate: 48_000,
            },
            480,
        );
        assert_eq!(driver.frame_period(), Duration::from_millis(10));
    }

    #[actix::test]
    async fn test_streams_file_after_start() {
        let (node, events) = collector();
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        tx.send(EngineRequest::Start).unwrap();
        let driver = WavDriver::new(source(vec![0.25; 300]), 128);
        actix::spawn(driver.run(rx, node, done_tx));

        let report = done_rx.await.unwrap();
        assert_eq!(report.frames_pushed, 3);
        assert_eq!(report.frames_gated, 0);

        // the driver still answers after the input ran out
        tx.send(EngineRequest::Stop).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let events = events.lock().unwrap();
        assert_eq!(events.first(), Some(&EngineEvent::StartOk));
        assert_eq!(events.last(), Some(&EngineEvent::StopOk));

        let frames: Vec<&Vec<f32>> = events
            .iter()
            .filter_map(|event| match event {
                EngineEvent::InputData { input_data } => Some(input_data),
                _ => None,
            })
            .collect();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|frame| frame.len() == 128));
        assert_eq!(frames[2][43], 0.25);
        assert_eq!(frames[2][44], 0.0);
    }

    #[actix::test]
    async fn test_silence_is_gated() {
        let (node, _events) = collector();
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        tx.send(EngineRequest::Config {
            num_trancate_treshold: 100,
            vol_trancate_threshold: 0.0005,
            vol_trancate_length: 1,
        })
        .unwrap();
        tx.send(EngineRequest::Start).unwrap();
        actix::spawn(WavDriver::new(source(vec![0.0; 640]), 128).run(rx, node, done_tx));

        let report = done_rx.await.unwrap();
        assert_eq!(report.frames_pushed, 1);
        assert_eq!(report.frames_gated, 4);
    }

    #[actix::test]
    async fn test_playback_queue_truncation() {
        let (node, _events) = collector();
        let mut driver = WavDriver::new(source(vec![]), 128);

        driver.apply(
            EngineRequest::Config {
                num_trancate_treshold: 2,
                vol_trancate_threshold: 0.0,
                vol_trancate_length: 32,
            },
            &node,
        );
        for _ in 0..3 {
            driver.apply(EngineRequest::Voice { voice: vec![0.1; 200] }, &node);
        }
        assert_eq!(driver.report.playback_truncations, 1);
        assert_eq!(driver.playback.len(), 1);

        driver.render();
        assert_eq!(driver.report.samples_rendered, 128);
        driver.render();
        assert_eq!(driver.report.samples_rendered, 200);
        assert!(driver.playback.is_empty());
    }

    #[test]
    fn test_wav_file_round_trip() {
        let path = std::env::temp_dir().join(format!("voice-bridge-test-{}.wav", std::process::id()));
        let samples: Vec<f32> = (0..1000).map(|i| ((i as f32) / 1000.0) - 0.5).collect();

        write_wav(&path, &samples, 16_000).unwrap();
        let loaded = read_wav(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.sample_rate, 16_000);
        assert_eq!(loaded.samples.len(), 1000);
        assert!(loaded
            .samples
            .iter()
            .zip(&samples)
            .all(|(a, b)| (a - b).abs() <= 1.0 / 32767.0));
    }
}
