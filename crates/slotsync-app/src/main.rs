//! # slotsync
//!
//! Loops the default microphone back to the default speaker through the
//! capture and render synchronizers.
//!
//! ```text
//! slotsync [CONFIG.json]
//! slotsync --list-devices
//! ```

mod config;

use anyhow::{Context, Result};
use config::AppConfig;
use slotsync_audio::driver::{
    default_input_device_name, default_output_device_name, list_input_devices, list_output_devices,
};
use slotsync_audio::{AudioDriver, AudioRenderer, CaptureStream, CpalDriver};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slotsync=info,slotsync_audio=info".into()),
        )
        .init();

    info!("Starting slotsync v{}", env!("CARGO_PKG_VERSION"));

    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("--list-devices") {
        return list_devices();
    }

    let config = AppConfig::load(arg.as_deref().map(Path::new))?;
    run_loopback(&config)
}

fn list_devices() -> Result<()> {
    let default_input = default_input_device_name();
    let default_output = default_output_device_name();

    println!("Input devices:");
    for name in list_input_devices()? {
        let marker = if default_input.as_ref() == Some(&name) { "*" } else { " " };
        println!(" {marker} {name}");
    }
    println!("Output devices:");
    for name in list_output_devices()? {
        let marker = if default_output.as_ref() == Some(&name) { "*" } else { " " };
        println!(" {marker} {name}");
    }
    Ok(())
}

fn run_loopback(config: &AppConfig) -> Result<()> {
    let mut driver = CpalDriver::new();
    if let Some(name) = &config.input_device {
        driver = driver.with_input_device(name.clone());
    }
    if let Some(name) = &config.output_device {
        driver = driver.with_output_device(name.clone());
    }
    let driver: Arc<dyn AudioDriver> = Arc::new(driver);

    let renderer = AudioRenderer::new(driver.clone(), config.format, config.sync.clone());
    let capture = Arc::new(CaptureStream::new(
        driver,
        config.format,
        config.sync.clone(),
    ));

    renderer.start().context("starting playback")?;
    capture.start().context("starting capture")?;
    info!(
        "Looping {} back for {}s",
        config.format, config.duration_secs
    );

    // Stopping the capture stream ends the loop below
    let timer = {
        let capture = capture.clone();
        let duration = Duration::from_secs(config.duration_secs);
        thread::Builder::new()
            .name("slotsync-timer".into())
            .spawn(move || {
                thread::sleep(duration);
                if let Err(e) = capture.stop() {
                    warn!("Failed to stop capture: {e}");
                }
            })
            .context("spawning timer thread")?
    };

    let result = pump(&capture, &renderer, config).map(|_frames| ());

    if result.is_ok() && timer.join().is_err() {
        warn!("Timer thread panicked");
    }
    capture.disconnect();
    if let Err(e) = renderer.stop() {
        warn!("Failed to stop playback: {e}");
    }
    renderer.close();
    result
}

/// Move captured frames to the renderer until capture stops. Frames the
/// renderer rejects without breaking the stream are skipped. Returns the
/// number of frames forwarded.
fn pump(capture: &CaptureStream, renderer: &AudioRenderer, config: &AppConfig) -> Result<u64> {
    let mut frame = Vec::new();
    let mut frames = 0u64;
    let mut skipped = 0u64;
    loop {
        capture.read_frame(&mut frame)?;
        if frame.is_empty() {
            break;
        }
        match renderer.process_buffer(Some(&config.format), &frame) {
            Ok(()) => frames += 1,
            Err(e) if !e.is_fatal_to_stream() => {
                skipped += 1;
                debug!("Skipped frame: {e}");
            }
            Err(e) => return Err(e).context("rendering captured frame"),
        }
    }
    info!(frames, skipped, "Loopback finished");
    Ok(frames)
}
