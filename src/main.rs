//! Framecast demo runner
//!
//! Drives the built-in test pattern through the capture pipeline, serves the
//! live preview, optionally records, then verifies the written file.
//!
//! Usage:
//!   framecast [OPTIONS]
//!
//! Options:
//!   --config <path>       Config file (default: <config dir>/framecast/config.toml)
//!   --seconds <n>         How long to run (default 5)
//!   --record <path>       Record to this file
//!   --format <avi|raw>    Recording format (default from config)
//!   --max-bytes <n>       Stop recording after n bytes (0 = unlimited)
//!   --pattern <fourcc>    Test pattern pixel format (YUYV, UYVY, RGB3, BGR3, GREY, MJPG)
//!   --verbose             Extra debug output

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use framecast_lib::capture::TestPatternSource;
use framecast_lib::config::{default_config_path, Config};
use framecast_lib::recording::{probe_avi, probe_raw, RecorderEvent, RecordingFormat};
use framecast_lib::stream::ViewerClient;
use framecast_lib::CapturePipeline;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let value = |flag: &str| {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };

    // Init logging
    let verbose = args.iter().any(|a| a == "--verbose");
    let log_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config_path = value("--config")
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let mut config = Config::load_or_default(&config_path);
    if let Some(pattern) = value("--pattern") {
        config.capture.pixel_format = pattern;
    }

    let seconds: f64 = match value("--seconds") {
        Some(s) => s.parse().with_context(|| format!("invalid --seconds '{}'", s))?,
        None => 5.0,
    };
    let format = match value("--format") {
        Some(f) => RecordingFormat::parse(&f).with_context(|| format!("unknown --format '{}'", f))?,
        None => config.recording.format,
    };
    let max_bytes: u64 = match value("--max-bytes") {
        Some(s) => s.parse().with_context(|| format!("invalid --max-bytes '{}'", s))?,
        None => config.recording.max_bytes,
    };
    let record = value("--record").map(PathBuf::from);

    println!("\n=== Framecast ===\n");

    let pipeline = CapturePipeline::new(config.stream.clone(), config.recording.jpeg_quality);
    let recorder_events = pipeline.recorder().subscribe();
    let port = pipeline
        .start_streaming()
        .context("failed to start the live preview")?;
    println!("  Live preview: ws://{}:{}/", config.stream.bind_address, port);

    let source = TestPatternSource::new(config.capture.clone());
    if let Some(path) = &record {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        pipeline.recorder().start(
            path,
            format,
            source.width(),
            source.height(),
            config.recording.fps,
            max_bytes,
        )?;
        println!("  Recording {} -> {}", format, path.display());
    }
    source
        .start(pipeline.observer())
        .context("failed to start the test pattern")?;

    let mut viewer = match ViewerClient::connect(port) {
        Ok(viewer) => Some(viewer),
        Err(e) => {
            log::warn!("Self-check viewer could not connect: {}", e);
            None
        }
    };

    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    let mut received: u64 = 0;
    let mut last_frame_id: Option<u64> = None;
    let mut last_report = Instant::now();

    while Instant::now() < deadline {
        let mut viewer_failed = false;
        match viewer.as_mut() {
            Some(client) => match client.next_frame(Duration::from_millis(100)) {
                Ok(Some(frame)) => {
                    if last_frame_id.is_some_and(|id| frame.frame_id <= id) {
                        log::warn!("Frame {} arrived out of order", frame.frame_id);
                    }
                    last_frame_id = Some(frame.frame_id);
                    received += 1;
                    if client.ack().is_err() {
                        viewer_failed = true;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Self-check viewer failed: {}", e);
                    viewer_failed = true;
                }
            },
            None => std::thread::sleep(Duration::from_millis(100)),
        }
        if viewer_failed {
            viewer = None;
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            if let Some(info) = pipeline.info().take_update() {
                println!(
                    "  frame {} ({}x{}), {} fps, {} bytes recorded",
                    info.frame_id,
                    info.width,
                    info.height,
                    info.frames_since_last,
                    pipeline.recorder().bytes_written()
                );
            }
        }
    }

    source.stop();
    if let Some(client) = viewer.take() {
        client.close();
    }
    pipeline.shutdown();

    println!();
    println!("  Viewer received {} frames", received);
    println!(
        "  Source delivered {} frames, {} starved, {} outstanding",
        source.delivered(),
        source.starved(),
        source.outstanding()
    );

    for event in recorder_events.try_iter() {
        if let RecorderEvent::Stopped { reason, summary } = event {
            println!(
                "  Recording stopped ({}): {} frames, {} bytes",
                reason, summary.frame_count, summary.bytes_written
            );
        }
    }
    if let Some(path) = &record {
        verify(path, format)?;
    }

    Ok(())
}

fn verify(path: &Path, format: RecordingFormat) -> anyhow::Result<()> {
    match format {
        RecordingFormat::AviMjpeg => {
            let probe = probe_avi(path).with_context(|| format!("{} failed validation", path.display()))?;
            println!(
                "  AVI ok: {}x{}, {} frames, {:.2}s",
                probe.width,
                probe.height,
                probe.frame_count,
                probe.duration_secs()
            );
        }
        RecordingFormat::Raw => {
            let probe = probe_raw(path).with_context(|| format!("{} failed validation", path.display()))?;
            println!(
                "  RAW ok: {}x{}, {} frames, {} payload bytes",
                probe.header.width, probe.header.height, probe.header.frame_count, probe.payload_bytes
            );
        }
    }
    Ok(())
}
