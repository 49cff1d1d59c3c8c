use crossbeam_channel::Receiver;
use framecast_lib::recording::{
    probe_avi, probe_raw, raw, RecorderError, RecorderEvent, RecordingFormat, StopReason, VideoRecorder,
};

fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

#[test]
fn avi_round_trip_indexes_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.avi");
    let recorder = VideoRecorder::new();
    let events = recorder.subscribe();

    recorder
        .start(&path, RecordingFormat::AviMjpeg, 320, 240, 25.0, 0)
        .unwrap();
    assert!(recorder.is_recording());
    assert_eq!(recorder.bytes_written(), 224);

    let sizes = [101usize, 64, 3, 250, 1, 88, 77];
    for (i, &size) in sizes.iter().enumerate() {
        recorder.write_encoded_frame(&payload(size, i as u8)).unwrap();
    }

    let summary = recorder.stop().unwrap().unwrap();
    assert_eq!(summary.reason, StopReason::Complete);
    assert_eq!(summary.frame_count, sizes.len() as u32);
    assert!(!recorder.is_recording());

    let probe = probe_avi(&path).unwrap();
    assert_eq!(probe.width, 320);
    assert_eq!(probe.height, 240);
    assert_eq!(probe.micros_per_frame, 40_000);
    assert_eq!(probe.frame_count, sizes.len() as u32);
    assert_eq!(probe.file_len, summary.bytes_written);
    assert_eq!(probe.index[0].offset, 0);
    for (entry, &size) in probe.index.iter().zip(sizes.iter()) {
        assert_eq!(entry.size as usize, size);
    }
    for pair in probe.index.windows(2) {
        assert!(pair[0].offset < pair[1].offset);
        // Every chunk starts at an even offset
        assert_eq!(pair[1].offset % 2, 0);
    }

    // Chunk payloads are byte-exact
    let bytes = std::fs::read(&path).unwrap();
    let third = probe.index[3];
    let start = 224 + third.offset as usize + 8;
    assert_eq!(&bytes[start..start + 250], &payload(250, 3)[..]);

    let stopped = events
        .try_iter()
        .find_map(|e| match e {
            RecorderEvent::Stopped { reason, .. } => Some(reason),
            _ => None,
        })
        .unwrap();
    assert_eq!(stopped, StopReason::Complete);
}

fn stop_reasons(events: &Receiver<RecorderEvent>) -> Vec<StopReason> {
    events
        .try_iter()
        .filter_map(|e| match e {
            RecorderEvent::Stopped { reason, .. } => Some(reason),
            _ => None,
        })
        .collect()
}

#[test]
fn byte_ceiling_stops_and_finalizes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("limited.avi");
    let recorder = VideoRecorder::new();
    let events = recorder.subscribe();

    // Each 100-byte frame takes 108 bytes on disk; the third crosses 500
    recorder
        .start(&path, RecordingFormat::AviMjpeg, 16, 16, 30.0, 500)
        .unwrap();
    for i in 0..3 {
        recorder.write_encoded_frame(&payload(100, i)).unwrap();
    }
    assert!(!recorder.is_recording());
    assert!(matches!(
        recorder.write_encoded_frame(&payload(100, 9)),
        Err(RecorderError::NotRecording)
    ));
    assert!(recorder.stop().unwrap().is_none());

    let probe = probe_avi(&path).unwrap();
    assert_eq!(probe.frame_count, 3);
    assert_eq!(probe.index.len(), 3);

    assert_eq!(stop_reasons(&events), vec![StopReason::SizeLimit]);
}

#[test]
fn byte_ceiling_finalizes_raw_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("limited.raw");
    let recorder = VideoRecorder::new();
    let events = recorder.subscribe();

    // Header plus two 12-byte frames stays under the limit, the third reaches it
    let header_len = raw::header_bytes(2, 2, 0, 0).len() as u64;
    recorder
        .start(&path, RecordingFormat::Raw, 2, 2, 30.0, header_len + 30)
        .unwrap();
    for i in 0..2 {
        recorder.write_raw_frame(&payload(12, i)).unwrap();
        assert!(recorder.is_recording());
    }
    recorder.write_raw_frame(&payload(12, 2)).unwrap();
    assert!(!recorder.is_recording());
    assert_eq!(stop_reasons(&events), vec![StopReason::SizeLimit]);

    let probe = probe_raw(&path).unwrap();
    assert_eq!(probe.header.frame_count, 3);
    assert_eq!(probe.payload_bytes, 36);
    assert_eq!(probe.header.bytes_per_frame, (header_len + 36) / 3);
}

#[cfg(target_os = "linux")]
#[test]
fn write_failure_stops_the_session() {
    let recorder = VideoRecorder::new();
    let events = recorder.subscribe();
    recorder
        .start("/dev/full", RecordingFormat::AviMjpeg, 16, 16, 30.0, 0)
        .unwrap();

    // Larger than the write buffer, so the device is hit immediately
    let result = recorder.write_encoded_frame(&payload(20 * 1024, 0));
    assert!(matches!(result, Err(RecorderError::Io(_))), "{:?}", result);
    assert!(!recorder.is_recording());
    assert_eq!(stop_reasons(&events), vec![StopReason::WriteFailed]);

    assert!(matches!(
        recorder.write_encoded_frame(&payload(10, 1)),
        Err(RecorderError::NotRecording)
    ));
    assert!(recorder.stop().unwrap().is_none());
}

#[test]
fn stop_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = VideoRecorder::new();
    assert!(recorder.stop().unwrap().is_none());

    recorder
        .start(dir.path().join("empty.avi"), RecordingFormat::AviMjpeg, 8, 8, 30.0, 0)
        .unwrap();
    let summary = recorder.stop().unwrap().unwrap();
    assert_eq!(summary.frame_count, 0);
    assert!(recorder.stop().unwrap().is_none());
    assert_eq!(recorder.bytes_written(), summary.bytes_written);

    // A zero-frame file is still well formed
    let probe = probe_avi(&dir.path().join("empty.avi")).unwrap();
    assert_eq!(probe.frame_count, 0);
    assert!(probe.index.is_empty());
}

#[test]
fn wrong_frame_kind_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = VideoRecorder::new();

    recorder
        .start(dir.path().join("a.raw"), RecordingFormat::Raw, 2, 2, 30.0, 0)
        .unwrap();
    assert!(matches!(
        recorder.write_encoded_frame(&[0xFF, 0xD8]),
        Err(RecorderError::FormatMismatch {
            session: RecordingFormat::Raw,
            frame: RecordingFormat::AviMjpeg
        })
    ));
    assert!(recorder.is_recording());
    recorder.stop().unwrap();

    recorder
        .start(dir.path().join("b.avi"), RecordingFormat::AviMjpeg, 2, 2, 30.0, 0)
        .unwrap();
    assert!(matches!(
        recorder.write_raw_frame(&[0; 12]),
        Err(RecorderError::FormatMismatch { .. })
    ));
    recorder.stop().unwrap();
}

#[test]
fn second_start_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = VideoRecorder::new();
    let first = dir.path().join("first.avi");

    recorder
        .start(&first, RecordingFormat::AviMjpeg, 4, 4, 30.0, 0)
        .unwrap();
    assert!(matches!(
        recorder.start(dir.path().join("second.avi"), RecordingFormat::Raw, 4, 4, 30.0, 0),
        Err(RecorderError::AlreadyRecording)
    ));
    recorder.write_encoded_frame(&payload(10, 1)).unwrap();

    let summary = recorder.stop().unwrap().unwrap();
    assert_eq!(summary.path, first);
    assert_eq!(summary.frame_count, 1);
    assert!(!dir.path().join("second.avi").exists());
}

#[test]
fn unwritable_path_leaves_recorder_idle() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = VideoRecorder::new();
    let err = recorder
        .start(dir.path().join("missing").join("x.avi"), RecordingFormat::AviMjpeg, 4, 4, 30.0, 0)
        .unwrap_err();
    assert!(matches!(err, RecorderError::Create { .. }));
    assert!(!recorder.is_recording());
}

#[test]
fn raw_stream_header_is_finalized() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frames.raw");
    let recorder = VideoRecorder::new();

    recorder
        .start(&path, RecordingFormat::Raw, 2, 2, 30.0, 0)
        .unwrap();
    let header_len = recorder.bytes_written();
    for i in 0..3 {
        recorder.write_raw_frame(&payload(12, i)).unwrap();
    }
    assert_eq!(recorder.bytes_written(), header_len + 36);
    let summary = recorder.stop().unwrap().unwrap();

    let probe = probe_raw(&path).unwrap();
    assert_eq!(probe.header.width, 2);
    assert_eq!(probe.header.frame_count, 3);
    assert_eq!(probe.payload_bytes, 36);
    assert_eq!(probe.header.bytes_per_frame, summary.bytes_written / 3);

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[probe.header.header_len..probe.header.header_len + 12], &payload(12, 0)[..]);
}

#[test]
fn progress_every_tenth_frame() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = VideoRecorder::new();
    let events = recorder.subscribe();

    recorder
        .start(dir.path().join("p.avi"), RecordingFormat::AviMjpeg, 4, 4, 30.0, 0)
        .unwrap();
    for i in 0..25 {
        recorder.write_encoded_frame(&payload(20, i)).unwrap();
    }
    recorder.stop().unwrap();

    let progress: Vec<u64> = events
        .try_iter()
        .filter_map(|e| match e {
            RecorderEvent::Progress { bytes_written, .. } => Some(bytes_written),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![224 + 10 * 28, 224 + 20 * 28]);
}
