//! # Voice Bridge - Command Line Entry Point
//!
//! Streams a WAV file through a voice-conversion server and writes the
//! converted result back to disk.
//!
//! ## What happens on a run:
//! 1. **Configuration** is loaded from `config.toml`, `APP_*` environment
//!    variables and `SERVER_URL`
//! 2. **A node** is spawned with the configured transport
//! 3. **The WAV driver** plays the input file into the node at real-time
//!    pace, standing in for the audio engine
//! 4. **Converted output** is recorded until the input ends or Ctrl+C
//! 5. **The recording** is written to `io.output_wav`
//!
//! ## Environment Variables:
//! - `RUST_LOG`: log filter, defaults to `voice_bridge=debug`
//! - `SERVER_URL`: quick override of `transport.server_url`

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice_bridge::config::BridgeConfig;
use voice_bridge::driver::{read_wav, write_wav, WavDriver};
use voice_bridge::listener::TracingListener;
use voice_bridge::node::VoiceChangerNode;

/// Time allowed for in-flight windows to come back once the input has ended.
const DRAIN_DELAY: Duration = Duration::from_millis(500);

#[actix::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = BridgeConfig::load()?;
    config.validate()?;

    info!("Starting voice-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        protocol = %config.transport.protocol,
        url = %config.transport.server_url,
        chunks = config.transport.input_chunk_num,
        "Configuration loaded"
    );

    let source = read_wav(&config.io.input_wav)
        .with_context(|| format!("failed to read {}", config.io.input_wav.display()))?;
    let sample_rate = source.sample_rate;

    // The driver owns the receiving end; the node posts into the sender.
    let (engine_tx, engine_rx) = mpsc::unbounded_channel();
    let node = VoiceChangerNode::spawn(engine_tx, TracingListener, config.transport.clone());

    let (finished_tx, finished_rx) = oneshot::channel();
    let driver = WavDriver::new(source, config.io.frame_size);
    actix::spawn(driver.run(engine_rx, node.engine_events(), finished_tx));

    node.configure(config.processing.clone());
    node.start_output_recording();
    node.start().await?;
    info!("Streaming started");

    tokio::select! {
        report = finished_rx => {
            match report {
                Ok(report) => info!(?report, "Input finished"),
                Err(_) => warn!("Driver ended before the input finished"),
            }
            tokio::time::sleep(DRAIN_DELAY).await;
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping stream...");
        }
    }

    node.stop().await?;
    let recorded = node.stop_output_recording().await?;

    let stats = node.stats().await?;
    info!(
        windows = stats.windows_sent,
        delivered = stats.responses_delivered,
        rejected = stats.responses_rejected,
        errors = stats.error_count,
        avg_response_ms = stats.average_response_time_ms(),
        loss_rate = stats.loss_rate(),
        uptime_secs = stats.uptime().as_secs_f64(),
        "Stream statistics"
    );

    write_wav(&config.io.output_wav, &recorded, sample_rate)
        .with_context(|| format!("failed to write {}", config.io.output_wav.display()))?;

    node.shutdown();
    info!("voice-bridge stopped");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// `RUST_LOG` controls what gets logged; without it the bridge logs at debug
/// level and everything else is filtered out.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Resolve on Ctrl+C, or on SIGTERM where the platform has it.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
