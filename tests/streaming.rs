use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use framecast_lib::frame::{FrameBuffer, PixelFormat, ReleaseToken};
use framecast_lib::stream::{StreamConfig, StreamEngine, StreamEvent, ViewerClient};

const TIMEOUT: Duration = Duration::from_secs(5);

fn rgb_frame(id: u64) -> FrameBuffer {
    FrameBuffer {
        data: Arc::from(vec![(id * 10) as u8; 8 * 6 * 3]),
        width: 8,
        height: 6,
        pixel_format: PixelFormat::RGB24,
        bytes_per_line: 24,
        payload_size: 8 * 6 * 3,
        frame_id: id,
    }
}

fn token(id: u64, released: &Arc<AtomicUsize>) -> ReleaseToken {
    let counter = released.clone();
    ReleaseToken::new(id, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

fn wait_for(events: &Receiver<StreamEvent>, what: impl Fn(&StreamEvent) -> bool) -> StreamEvent {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) if what(&event) => return event,
            Ok(_) => continue,
            Err(_) => panic!("timed out waiting for stream event"),
        }
    }
}

/// Connect and wait until the dispatcher has registered the viewer and read its first ack
fn connect(engine: &StreamEngine, port: u16, events: &Receiver<StreamEvent>) -> ViewerClient {
    let viewer = ViewerClient::connect(port).unwrap();
    wait_for(events, |e| matches!(e, StreamEvent::ViewerConnected { .. }));
    std::thread::sleep(Duration::from_millis(100));
    assert!(engine.is_running());
    viewer
}

#[test]
fn viewer_receives_frames_paced_by_acks() {
    let engine = StreamEngine::new(StreamConfig::default());
    let events = engine.subscribe();
    let port = engine.start().unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    let mut viewer = connect(&engine, port, &events);

    engine.push(rgb_frame(1), token(1, &released));
    let first = viewer.next_frame(TIMEOUT).unwrap().expect("first frame");
    assert_eq!(first.frame_id, 1);
    assert_eq!((first.width, first.height), (8, 6));
    assert_eq!(&first.jpeg[..2], &[0xFF, 0xD8]);

    // Without an ack nothing else is sent, only the newest push survives
    for id in 2..=4 {
        engine.push(rgb_frame(id), token(id, &released));
    }
    assert!(viewer.next_frame(Duration::from_millis(300)).unwrap().is_none());

    viewer.ack().unwrap();
    let next = viewer.next_frame(TIMEOUT).unwrap().expect("frame after ack");
    assert_eq!(next.frame_id, 4);

    engine.stop();
    assert_eq!(released.load(Ordering::SeqCst), 4);
    assert_eq!(engine.port(), None);
}

#[test]
fn disconnect_does_not_affect_other_viewers() {
    let engine = StreamEngine::new(StreamConfig::default());
    let events = engine.subscribe();
    let port = engine.start().unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    let leaving = connect(&engine, port, &events);
    let mut staying = connect(&engine, port, &events);

    leaving.close();
    wait_for(&events, |e| matches!(e, StreamEvent::ViewerDisconnected { .. }));

    engine.push(rgb_frame(7), token(7, &released));
    let frame = staying.next_frame(TIMEOUT).unwrap().expect("frame");
    assert_eq!(frame.frame_id, 7);

    engine.stop();
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn broadcast_order_follows_capture_order() {
    let engine = Arc::new(StreamEngine::new(StreamConfig::default()));
    let events = engine.subscribe();
    let port = engine.start().unwrap();
    let released = Arc::new(AtomicUsize::new(0));
    let mut viewer = connect(&engine, port, &events);

    let producer = {
        let engine = engine.clone();
        let released = released.clone();
        std::thread::spawn(move || {
            for id in 1..=200u64 {
                engine.push(rgb_frame(id), token(id, &released));
                std::thread::sleep(Duration::from_millis(1));
            }
        })
    };

    // The newest frame always survives in the mailbox, so 200 arrives last
    let mut ids = Vec::new();
    let deadline = Instant::now() + TIMEOUT;
    while ids.last() != Some(&200) {
        assert!(Instant::now() < deadline, "frame 200 never arrived: {:?}", ids);
        if let Some(frame) = viewer.next_frame(Duration::from_millis(100)).unwrap() {
            ids.push(frame.frame_id);
            viewer.ack().unwrap();
        }
    }
    producer.join().unwrap();

    assert!(ids.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", ids);

    engine.stop();
    assert_eq!(released.load(Ordering::SeqCst), 200);
}

#[test]
fn flush_keeps_listener_and_viewers() {
    let engine = StreamEngine::new(StreamConfig::default());
    let events = engine.subscribe();
    let port = engine.start().unwrap();
    let released = Arc::new(AtomicUsize::new(0));
    let mut viewer = connect(&engine, port, &events);

    engine.push(rgb_frame(1), token(1, &released));
    assert_eq!(viewer.next_frame(TIMEOUT).unwrap().unwrap().frame_id, 1);

    // Not acked: frame 2 stays in the mailbox until the flush drops it
    engine.push(rgb_frame(2), token(2, &released));
    engine.flush().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 2);
    assert_eq!(engine.port(), Some(port));

    // Fresh state counts as ready
    engine.push(rgb_frame(3), token(3, &released));
    assert_eq!(viewer.next_frame(TIMEOUT).unwrap().unwrap().frame_id, 3);

    let mut late = connect(&engine, port, &events);
    viewer.ack().unwrap();
    engine.push(rgb_frame(4), token(4, &released));
    assert_eq!(late.next_frame(TIMEOUT).unwrap().unwrap().frame_id, 4);

    engine.stop();
    assert_eq!(released.load(Ordering::SeqCst), 4);
}

#[test]
fn stop_closes_viewers_and_allows_restart() {
    let engine = StreamEngine::new(StreamConfig::default());
    let events = engine.subscribe();
    let port = engine.start().unwrap();
    let mut viewer = connect(&engine, port, &events);

    engine.stop();
    engine.stop();
    assert!(viewer.next_frame(TIMEOUT).is_err());

    let port = engine.start().unwrap();
    let released = Arc::new(AtomicUsize::new(0));
    let mut viewer = connect(&engine, port, &events);
    engine.push(rgb_frame(9), token(9, &released));
    assert_eq!(viewer.next_frame(TIMEOUT).unwrap().unwrap().frame_id, 9);
    drop(engine);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}
