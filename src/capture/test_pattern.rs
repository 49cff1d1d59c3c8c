// Synthetic camera: moving colour bars from a fixed pool of buffer slots
//
// Mirrors how a V4L2-style source behaves: frames are only produced when a
// slot has been requeued, and the frame counter keeps running while the
// source is starved, so identifiers stay monotonic but are not contiguous.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use image::RgbImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::FrameObserver;
use crate::convert::encode_jpeg;
use crate::frame::{FrameBuffer, PixelFormat};

/// Test-pattern source parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestPatternConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Fourcc of the delivered frames (YUYV, UYVY, RGB3, BGR3, GREY, MJPG)
    pub pixel_format: String,
    /// Number of buffer slots shared with consumers
    pub buffer_count: usize,
}

impl Default for TestPatternConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30.0,
            pixel_format: "YUYV".to_string(),
            buffer_count: 5,
        }
    }
}

/// Counters shared with the generator thread
#[derive(Default)]
struct SourceCounters {
    outstanding: AtomicUsize,
    delivered: AtomicU64,
    starved: AtomicU64,
}

pub struct TestPatternSource {
    config: TestPatternConfig,
    pixel_format: PixelFormat,
    counters: Arc<SourceCounters>,
    stop_flag: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TestPatternSource {
    pub fn new(config: TestPatternConfig) -> Self {
        let pixel_format = PixelFormat::parse(&config.pixel_format).unwrap_or_else(|| {
            log::warn!(
                "Unknown test pattern format '{}', using YUYV",
                config.pixel_format
            );
            PixelFormat::YUYV
        });
        Self {
            config,
            pixel_format,
            counters: Arc::new(SourceCounters::default()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }

    pub fn fps(&self) -> f64 {
        self.config.fps
    }

    /// Buffer slots handed out and not yet requeued
    pub fn outstanding(&self) -> usize {
        self.counters.outstanding.load(Ordering::SeqCst)
    }

    /// Frames delivered to the observer
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::SeqCst)
    }

    /// Frame ticks skipped because every slot was still held by consumers
    pub fn starved(&self) -> u64 {
        self.counters.starved.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }

    /// Start generating frames into `observer`
    pub fn start(&self, observer: Arc<FrameObserver>) -> std::io::Result<()> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Ok(());
        }
        self.stop_flag.store(false, Ordering::SeqCst);

        let stop_flag = self.stop_flag.clone();
        let counters = self.counters.clone();
        let config = self.config.clone();
        let pixel_format = self.pixel_format;

        let handle = std::thread::Builder::new()
            .name("framecast-test-pattern".into())
            .spawn(move || generator_loop(config, pixel_format, observer, counters, stop_flag))?;

        *thread = Some(handle);
        log::info!(
            "[Capture] Test pattern started ({}x{} {} @ {:.1} fps)",
            self.config.width,
            self.config.height,
            self.pixel_format,
            self.config.fps
        );
        Ok(())
    }

    /// Stop the generator and wait for it to exit
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("[Capture] Test pattern thread panicked");
            }
            log::info!(
                "[Capture] Test pattern stopped ({} delivered, {} starved, {} outstanding)",
                self.delivered(),
                self.starved(),
                self.outstanding()
            );
        }
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn generator_loop(
    config: TestPatternConfig,
    pixel_format: PixelFormat,
    observer: Arc<FrameObserver>,
    counters: Arc<SourceCounters>,
    stop_flag: Arc<AtomicBool>,
) {
    let interval = Duration::from_secs_f64(1.0 / config.fps.max(0.1));
    let slots = config.buffer_count.max(1);
    let mut frame_id: u64 = 0;
    let mut next_tick = Instant::now();

    while !stop_flag.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now < next_tick {
            std::thread::sleep((next_tick - now).min(Duration::from_millis(10)));
            continue;
        }
        next_tick += interval;
        frame_id += 1;

        // Claim a free slot or skip this tick
        let claimed = counters
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < slots).then_some(n + 1))
            .is_ok();
        if !claimed {
            counters.starved.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let frame = match render_frame(&config, pixel_format, frame_id) {
            Some(frame) => frame,
            None => {
                counters.outstanding.fetch_sub(1, Ordering::AcqRel);
                continue;
            }
        };

        counters.delivered.fetch_add(1, Ordering::Relaxed);
        let requeue_counters = counters.clone();
        observer.deliver(frame, move || {
            requeue_counters.outstanding.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

/// Render one frame of vertical bars scrolled by `frame_id`
pub fn render_frame(config: &TestPatternConfig, format: PixelFormat, frame_id: u64) -> Option<FrameBuffer> {
    const BARS: [[u8; 3]; 8] = [
        [235, 235, 235],
        [235, 235, 16],
        [16, 235, 235],
        [16, 235, 16],
        [235, 16, 235],
        [235, 16, 16],
        [16, 16, 235],
        [16, 16, 16],
    ];

    let width = config.width.max(2) & !1;
    let height = config.height.max(1);
    let shift = (frame_id as u32).wrapping_mul(4);
    let bar_width = (width / BARS.len() as u32).max(1);

    let rgb = RgbImage::from_fn(width, height, |x, _y| {
        let bar = ((x + shift) / bar_width) as usize % BARS.len();
        image::Rgb(BARS[bar])
    });

    let (data, bytes_per_line) = match format {
        PixelFormat::RGB24 => (rgb.into_raw(), width * 3),
        PixelFormat::BGR24 => {
            let mut raw = rgb.into_raw();
            raw.chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
            (raw, width * 3)
        }
        PixelFormat::GREY => (
            rgb.pixels().map(|px| luma(px.0)).collect(),
            width,
        ),
        PixelFormat::YUYV | PixelFormat::UYVY => (pack_yuv422(&rgb, format == PixelFormat::UYVY), width * 2),
        PixelFormat::MJPEG => match encode_jpeg(&rgb, 85) {
            Ok(jpeg) => (jpeg, 0),
            Err(e) => {
                log::debug!("[Capture] Test pattern JPEG encode failed: {}", e);
                return None;
            }
        },
        other => {
            log::debug!("[Capture] Test pattern cannot render {}", other);
            return None;
        }
    };

    let payload_size = data.len() as u32;
    Some(FrameBuffer {
        data: Arc::from(data),
        width,
        height,
        pixel_format: format,
        bytes_per_line,
        payload_size,
        frame_id,
    })
}

fn luma(rgb: [u8; 3]) -> u8 {
    ((66 * rgb[0] as u32 + 129 * rgb[1] as u32 + 25 * rgb[2] as u32 + 128) >> 8) as u8 + 16
}

fn pack_yuv422(rgb: &RgbImage, uyvy: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(rgb.as_raw().len() / 3 * 2);
    for row in rgb.rows() {
        let pixels: Vec<[u8; 3]> = row.map(|px| px.0).collect();
        for pair in pixels.chunks_exact(2) {
            let y0 = luma(pair[0]);
            let y1 = luma(pair[1]);
            let (r, g, b) = (pair[0][0] as i32, pair[0][1] as i32, pair[0][2] as i32);
            let u = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
            let v = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
            if uyvy {
                out.extend_from_slice(&[u, y0, v, y1]);
            } else {
                out.extend_from_slice(&[y0, u, y1, v]);
            }
        }
    }
    out
}
