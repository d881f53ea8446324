//! 检测器 (Detector)
//! 职责: 采集线程读帧 → 单槽帧队列 → 检测线程 (检测 → 跟踪 → 计数 → 发布快照)
//!
//! 跟踪器与计数器只由检测线程持有和修改; 其他线程通过
//! `DetectionCache` 快照和共享事件日志读取结果。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::FixedOffset;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use image::RgbImage;
use serde::Serialize;

use super::cache::{DetectionCache, FrameSlot};
use super::stats::{Counters, DetectionRateStats, LogRecord, SharedEventLog};
use super::tracker::{PersonTracker, TrackingStats};
use super::types::{DetectionSnapshot, Frame, Timestamp};
use crate::config::CounterConfig;
use crate::error::Result;
use crate::input::VideoSource;
use crate::models::DetectionAdapter;
use crate::renderer;

/// 每N帧统计一次采集FPS
const FPS_SAMPLE_FRAMES: u64 = 60;
/// 每N个检测周期输出一次性能日志
const PERF_LOG_CYCLES: u64 = 60;
/// 检测线程等待新帧的超时
const FRAME_WAIT: Duration = Duration::from_millis(10);

/// 性能统计
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub capture_fps: f64,
    /// 读帧失败次数 (累计)
    pub capture_failures: u64,
    pub detection_fps_target: u32,
    pub person_detector_available: bool,
    pub face_detector_available: bool,
    pub current_people: usize,
    pub current_faces: usize,
    pub log_size: usize,
    pub detection_rate: DetectionRateStats,
    pub tracking: TrackingStats,
}

/// 采集FPS (f64 按位存入原子变量)
#[derive(Default)]
struct FpsGauge(AtomicU64);

impl FpsGauge {
    fn set(&self, fps: f64) {
        self.0.store(fps.to_bits(), Ordering::Relaxed);
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

pub struct Detector {
    config: CounterConfig,
    offset: FixedOffset,
    session_start: Timestamp,
    person_available: bool,
    face_available: bool,

    running: Arc<AtomicBool>,
    cache: Arc<DetectionCache>,
    frames: Arc<FrameSlot>,
    capture_fps: Arc<FpsGauge>,
    capture_failures: Arc<AtomicU64>,
    event_log: SharedEventLog,

    workers: Vec<JoinHandle<()>>,
    done_rx: Receiver<&'static str>,
}

impl Detector {
    /// 启动采集线程和检测线程
    pub fn start(
        config: CounterConfig,
        source: Box<dyn VideoSource>,
        adapter: DetectionAdapter,
    ) -> Result<Self> {
        config.validate()?;
        log::info!("🔍 检测模块启动, 输入源: {}", source.name());

        let offset = config.clock_offset();
        let session_start = crate::now_in(offset);
        let tracker = PersonTracker::new(&config, session_start);
        let counters = Counters::new(&config);

        let running = Arc::new(AtomicBool::new(true));
        let cache = Arc::new(DetectionCache::new());
        let frames = Arc::new(FrameSlot::new());
        let capture_fps = Arc::new(FpsGauge::default());
        let capture_failures = Arc::new(AtomicU64::new(0));
        let event_log = counters.event_log();
        let person_available = adapter.person_available();
        let face_available = adapter.face_available();

        // 单槽帧队列: 检测线程总是处理最新帧
        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<Frame>(1);
        let (done_tx, done_rx) = crossbeam_channel::unbounded();

        let capture = CaptureWorker {
            source,
            frame_tx,
            overflow_rx: frame_rx.clone(),
            frames: Arc::clone(&frames),
            capture_fps: Arc::clone(&capture_fps),
            failures: Arc::clone(&capture_failures),
            running: Arc::clone(&running),
            retry: Duration::from_millis(config.capture_retry_ms),
        };
        let detection = DetectionWorker {
            adapter,
            tracker,
            counters,
            frame_rx,
            cache: Arc::clone(&cache),
            capture_fps: Arc::clone(&capture_fps),
            running: Arc::clone(&running),
            interval: config.detection_interval(),
            offset,
        };

        let mut workers = Vec::with_capacity(2);
        let tx = done_tx.clone();
        workers.push(
            thread::Builder::new()
                .name("capture".into())
                .spawn(move || {
                    capture.run();
                    let _ = tx.send("capture");
                })?,
        );
        let tx = done_tx;
        let spawned = thread::Builder::new()
            .name("detection".into())
            .spawn(move || {
                detection.run();
                let _ = tx.send("detection");
            });
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(e) => {
                running.store(false, Ordering::Release);
                return Err(e.into());
            }
        }

        Ok(Self {
            config,
            offset,
            session_start,
            person_available,
            face_available,
            running,
            cache,
            frames,
            capture_fps,
            capture_failures,
            event_log,
            workers,
            done_rx,
        })
    }

    /// 停止工作线程, 最多等待 `stop_timeout_ms`
    ///
    /// 正在进行的检测周期会执行完毕; 超时未退出的线程被分离。
    pub fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.running.store(false, Ordering::Release);

        let deadline = Instant::now() + Duration::from_millis(self.config.stop_timeout_ms);
        let mut exited = 0;
        while exited < self.workers.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.done_rx.recv_timeout(remaining) {
                Ok(name) => {
                    log::debug!("工作线程已退出: {}", name);
                    exited += 1;
                }
                Err(_) => break,
            }
        }

        if exited == self.workers.len() {
            for handle in self.workers.drain(..) {
                let _ = handle.join();
            }
            log::info!("检测模块已停止");
        } else {
            log::warn!(
                "{}个工作线程未在{}ms内退出, 已分离",
                self.workers.len() - exited,
                self.config.stop_timeout_ms
            );
            self.workers.clear();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 是否已完成至少一个检测周期
    pub fn is_ready(&self) -> bool {
        self.cache.is_ready()
    }

    // ========== 查询接口 ==========

    pub fn get_current_count(&self) -> usize {
        self.cache.read().people_count
    }

    pub fn get_total_entries(&self) -> u64 {
        self.cache.read().total_entries
    }

    pub fn get_total_exits(&self) -> u64 {
        self.cache.read().total_exits
    }

    pub fn session_start(&self) -> Timestamp {
        self.session_start
    }

    pub fn get_session_duration(&self) -> chrono::Duration {
        self.now().signed_duration_since(self.session_start)
    }

    /// 最近 `limit` 条日志记录, 旧的在前、最新的在最后
    pub fn get_recent_events(&self, limit: usize) -> Vec<LogRecord> {
        self.event_log.read().recent(limit)
    }

    /// 完整的保留日志
    pub fn event_log(&self) -> Vec<LogRecord> {
        self.event_log.read().to_vec()
    }

    pub fn get_detection_rate_stats(&self) -> DetectionRateStats {
        self.cache.read().detection_rate
    }

    pub fn get_tracking_stats(&self) -> TrackingStats {
        let snapshot = self.cache.read();
        TrackingStats {
            total_entries: snapshot.total_entries,
            total_exits: snapshot.total_exits,
            current_persons: snapshot.people_count,
            session_start: self.session_start,
            session_duration: self.get_session_duration().num_milliseconds() as f64 / 1000.0,
        }
    }

    pub fn get_performance_stats(&self) -> PerformanceStats {
        let snapshot = self.cache.read();
        PerformanceStats {
            capture_fps: self.capture_fps(),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            detection_fps_target: self.config.detection_fps,
            person_detector_available: self.person_available,
            face_detector_available: self.face_available,
            current_people: snapshot.people_count,
            current_faces: snapshot.faces_count,
            log_size: self.event_log.read().len(),
            detection_rate: snapshot.detection_rate,
            tracking: self.get_tracking_stats(),
        }
    }

    /// 最近一次发布的检测快照
    pub fn latest_detections(&self) -> Arc<DetectionSnapshot> {
        self.cache.read()
    }

    /// 最新采集帧 (不影响检测线程取帧)
    pub fn latest_frame(&self) -> Option<Frame> {
        self.frames.latest()
    }

    /// 最新帧 + 最近一次检测结果的标注画面
    pub fn annotated_frame(&self) -> RgbImage {
        let frame = self.latest_frame();
        renderer::annotate(
            frame.as_ref().map(|f| f.image.as_ref()),
            &self.cache.read(),
            self.capture_fps(),
        )
    }

    pub fn capture_fps(&self) -> f64 {
        self.capture_fps.get()
    }

    fn now(&self) -> Timestamp {
        crate::now_in(self.offset)
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        self.stop();
    }
}

// ========== 采集线程 ==========

struct CaptureWorker {
    source: Box<dyn VideoSource>,
    frame_tx: Sender<Frame>,
    overflow_rx: Receiver<Frame>,
    frames: Arc<FrameSlot>,
    capture_fps: Arc<FpsGauge>,
    failures: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    retry: Duration,
}

impl CaptureWorker {
    fn run(mut self) {
        let mut index = 0u64;
        let mut fps_count = 0u64;
        let mut fps_last = Instant::now();

        while self.running.load(Ordering::Acquire) {
            let Some(image) = self.source.read_frame() else {
                self.failures.fetch_add(1, Ordering::Relaxed);
                thread::sleep(self.retry);
                continue;
            };

            let frame = Frame {
                image: Arc::new(image),
                index,
                captured_at: Instant::now(),
            };
            index += 1;
            self.frames.store(frame.clone());

            // 队列满时丢弃旧帧
            match self.frame_tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(frame)) => {
                    let _ = self.overflow_rx.try_recv();
                    let _ = self.frame_tx.try_send(frame);
                }
                Err(TrySendError::Disconnected(_)) => break,
            }

            fps_count += 1;
            if fps_count >= FPS_SAMPLE_FRAMES {
                let elapsed = fps_last.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    self.capture_fps.set(fps_count as f64 / elapsed);
                }
                fps_count = 0;
                fps_last = Instant::now();
            }
        }

        log::debug!("采集线程退出, 共 {} 帧 ({})", index, self.source.name());
    }
}

// ========== 检测线程 ==========

struct DetectionWorker {
    adapter: DetectionAdapter,
    tracker: PersonTracker,
    counters: Counters,
    frame_rx: Receiver<Frame>,
    cache: Arc<DetectionCache>,
    capture_fps: Arc<FpsGauge>,
    running: Arc<AtomicBool>,
    interval: Duration,
    offset: FixedOffset,
}

impl DetectionWorker {
    fn run(mut self) {
        let mut last_cycle: Option<Instant> = None;
        let mut cycle_time_total = Duration::ZERO;

        while self.running.load(Ordering::Acquire) {
            // 频率限制
            if let Some(last) = last_cycle {
                let elapsed = last.elapsed();
                if elapsed < self.interval {
                    thread::sleep(self.interval - elapsed);
                    continue;
                }
            }

            let frame = match self.frame_rx.recv_timeout(FRAME_WAIT) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let frame = self.frame_rx.try_iter().last().unwrap_or(frame);

            let started = Instant::now();
            last_cycle = Some(started);
            self.process(&frame);
            cycle_time_total += started.elapsed();

            let cycles = self.counters.cycles();
            if cycles % PERF_LOG_CYCLES == 0 {
                let avg_ms = cycle_time_total.as_secs_f64() * 1000.0 / PERF_LOG_CYCLES as f64;
                let rate = self.counters.rate();
                log::debug!(
                    "📊 检测周期 {} | 平均耗时 {:.1}ms | 当前 {} 人 | 进 {} 出 {} | {:.1} det/s",
                    cycles,
                    avg_ms,
                    self.counters.current_count(),
                    self.tracker.total_entries(),
                    self.tracker.total_exits(),
                    rate.detections_per_second(),
                );
                cycle_time_total = Duration::ZERO;
            }
        }

        log::debug!("检测线程退出, 共 {} 个周期", self.counters.cycles());
    }

    /// 一个检测周期: 检测 → 跟踪 → 计数 → 发布快照
    fn process(&mut self, frame: &Frame) {
        let detections = self.adapter.run(&frame.image);
        let now = crate::now_in(self.offset);

        let outcome = self.tracker.update_at(&detections.people, now);
        for entry in outcome.entries() {
            log::info!(
                "➡️  ENTRY {} (#{}) 当前 {} 人, 累计进入 {}",
                entry.slot,
                entry.person_id,
                entry.current_count,
                entry.total_entries
            );
        }
        for exit in outcome.exits() {
            log::info!(
                "⬅️  EXIT #{} 停留 {} 当前 {} 人, 累计离开 {}",
                exit.person_id,
                exit.duration_formatted,
                exit.current_count,
                exit.total_exits
            );
        }

        let faces_count = detections.faces.len();
        self.counters
            .record_cycle(outcome, &self.tracker, faces_count, now);

        self.cache.publish(DetectionSnapshot {
            people_count: self.counters.current_count(),
            faces_count,
            people_boxes: detections.people,
            face_boxes: detections.faces,
            total_entries: self.tracker.total_entries(),
            total_exits: self.tracker.total_exits(),
            cycle: self.counters.cycles(),
            detection_rate: self.counters.rate().stats(self.capture_fps.get()),
            last_update: Some(now),
            ready: true,
        });
    }
}
