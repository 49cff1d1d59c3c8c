use std::time::{Duration, Instant};

use framecast_lib::capture::{TestPatternConfig, TestPatternSource};
use framecast_lib::recording::{probe_avi, probe_raw, RecordingFormat, StopReason};
use framecast_lib::stream::{StreamConfig, ViewerClient};
use framecast_lib::CapturePipeline;

fn small_pattern(pixel_format: &str) -> TestPatternConfig {
    TestPatternConfig {
        width: 64,
        height: 48,
        fps: 60.0,
        pixel_format: pixel_format.to_string(),
        buffer_count: 3,
    }
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn every_buffer_is_requeued_after_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pattern.avi");

    let pipeline = CapturePipeline::new(StreamConfig::default(), 85);
    let port = pipeline.start_streaming().unwrap();
    let source = TestPatternSource::new(small_pattern("YUYV"));

    pipeline
        .recorder()
        .start(&path, RecordingFormat::AviMjpeg, 64, 48, 60.0, 0)
        .unwrap();
    source.start(pipeline.observer()).unwrap();

    let mut viewer = ViewerClient::connect(port).unwrap();
    let mut received = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    while received < 5 && Instant::now() < deadline {
        if let Some(frame) = viewer.next_frame(Duration::from_millis(200)).unwrap() {
            assert_eq!((frame.width, frame.height), (64, 48));
            received += 1;
            viewer.ack().unwrap();
        }
    }
    assert_eq!(received, 5);
    wait_until("recorded frames", || pipeline.recorder().bytes_written() > 224 + 1000);

    source.stop();
    viewer.close();
    let summary = pipeline.shutdown().expect("recording was open");
    assert_eq!(summary.reason, StopReason::Complete);
    assert!(summary.frame_count > 0);

    assert_eq!(source.outstanding(), 0);
    assert!(source.delivered() >= summary.frame_count as u64);

    let probe = probe_avi(&path).unwrap();
    assert_eq!(probe.frame_count, summary.frame_count);
    assert_eq!((probe.width, probe.height), (64, 48));
}

#[test]
fn stop_streaming_releases_retained_frames() {
    let pipeline = CapturePipeline::new(StreamConfig::default(), 85);
    let port = pipeline.start_streaming().unwrap();
    let source = TestPatternSource::new(small_pattern("RGB3"));
    source.start(pipeline.observer()).unwrap();

    wait_until("a snapshot frame", || pipeline.snapshot().latest_frame_id().is_some());
    assert!(pipeline.info().take_update().is_some());

    pipeline.stop_streaming().unwrap();
    assert!(!pipeline.is_streaming());
    assert_eq!(pipeline.stream().port(), Some(port));

    // With the gates closed the snapshot is never refilled
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(pipeline.snapshot().latest_frame_id(), None);

    // Server never went away
    assert_eq!(pipeline.start_streaming().unwrap(), port);
    wait_until("snapshot refill", || pipeline.snapshot().latest_frame_id().is_some());

    source.stop();
    pipeline.shutdown();
    assert_eq!(source.outstanding(), 0);
}

#[test]
fn mjpeg_source_records_raw_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pattern.raw");

    let pipeline = CapturePipeline::new(StreamConfig::default(), 85);
    let source = TestPatternSource::new(small_pattern("MJPG"));
    pipeline
        .recorder()
        .start(&path, RecordingFormat::Raw, 64, 48, 60.0, 0)
        .unwrap();
    source.start(pipeline.observer()).unwrap();

    wait_until("raw frames", || pipeline.recorder().bytes_written() > 2000);
    source.stop();
    let summary = pipeline.shutdown().unwrap();

    let probe = probe_raw(&path).unwrap();
    assert_eq!(probe.header.frame_count, summary.frame_count);
    assert_eq!(probe.header.width, 64);
    assert_eq!(source.outstanding(), 0);
}

#[test]
fn size_limit_stops_recording_mid_capture() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capped.avi");

    let pipeline = CapturePipeline::new(StreamConfig::default(), 85);
    let events = pipeline.recorder().subscribe();
    let source = TestPatternSource::new(small_pattern("GREY"));
    pipeline
        .recorder()
        .start(&path, RecordingFormat::AviMjpeg, 64, 48, 60.0, 4096)
        .unwrap();
    source.start(pipeline.observer()).unwrap();

    wait_until("size limit", || !pipeline.recorder().is_recording());
    source.stop();
    assert!(pipeline.shutdown().is_none());

    let stopped = events.try_iter().any(|e| {
        matches!(
            e,
            framecast_lib::recording::RecorderEvent::Stopped {
                reason: StopReason::SizeLimit,
                ..
            }
        )
    });
    assert!(stopped);
    let probe = probe_avi(&path).unwrap();
    assert!(probe.frame_count > 0);
    assert!(probe.file_len >= 4096);
}
