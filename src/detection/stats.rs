//! 计数统计 (Counters / Stats Aggregator)
//!
//! 把跟踪器每个周期的输出折算为对外统计:
//! - 实时人数 / 累计通过人数
//! - 有界事件日志 (ENTRY / EXIT / 周期快照)
//! - 检测速率滚动窗口

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use super::tracker::{EntryEvent, ExitEvent, PersonTracker, TrackEvent, TrackingOutcome};
use super::types::Timestamp;
use crate::config::CounterConfig;

// ========== 事件日志 ==========

/// 周期快照记录
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SnapshotRecord {
    pub timestamp: Timestamp,
    pub current: usize,
    pub total_passed: u64,
    pub total_entries: u64,
    pub total_exits: u64,
}

/// 日志记录
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogRecord {
    Snapshot(SnapshotRecord),
    Entry(EntryEvent),
    Exit(ExitEvent),
}

impl LogRecord {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            LogRecord::Snapshot(r) => r.timestamp,
            LogRecord::Entry(e) => e.timestamp,
            LogRecord::Exit(e) => e.timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LogRecord::Snapshot(_) => "SNAPSHOT",
            LogRecord::Entry(_) => "ENTRY",
            LogRecord::Exit(_) => "EXIT",
        }
    }
}

impl From<TrackEvent> for LogRecord {
    fn from(event: TrackEvent) -> Self {
        match event {
            TrackEvent::Entry(e) => LogRecord::Entry(e),
            TrackEvent::Exit(e) => LogRecord::Exit(e),
        }
    }
}

/// 有界事件日志, 只保留最近 `capacity` 条 (按追加顺序, 旧 → 新)
#[derive(Clone, Debug)]
pub struct EventLog {
    records: VecDeque<LogRecord>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: LogRecord) {
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    pub fn extend<I: IntoIterator<Item = LogRecord>>(&mut self, records: I) {
        for record in records {
            self.push(record);
        }
    }

    /// 最近 `limit` 条记录, 旧的在前、最新的在最后
    pub fn recent(&self, limit: usize) -> Vec<LogRecord> {
        let skip = self.records.len().saturating_sub(limit);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<LogRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// 检测线程写入, 查询方读取
pub type SharedEventLog = Arc<RwLock<EventLog>>;

// ========== 检测速率 ==========

/// 检测速率统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct DetectionRateStats {
    pub detections_per_second: f64,
    pub total_detections: u64,
    pub detection_efficiency: f64,
}

/// 检测速率滚动窗口
#[derive(Clone, Debug)]
pub struct DetectionRateTracker {
    window: VecDeque<(Timestamp, usize)>,
    window_span: chrono::Duration,
    average_span: chrono::Duration,
    total_detections: u64,
    detections_per_second: f64,
    last_detection_time: Option<Timestamp>,
}

impl DetectionRateTracker {
    pub fn new(window_secs: f64, average_secs: f64) -> Self {
        Self {
            window: VecDeque::new(),
            window_span: secs_to_duration(window_secs),
            average_span: secs_to_duration(average_secs),
            total_detections: 0,
            detections_per_second: 0.0,
            last_detection_time: None,
        }
    }

    /// 记录一个周期的检测数 (人体 + 人脸)
    pub fn record(&mut self, now: Timestamp, people_count: usize, faces_count: usize) {
        let detections = people_count + faces_count;
        self.window.push_back((now, detections));

        while let Some((t, _)) = self.window.front() {
            if now.signed_duration_since(*t) > self.window_span {
                self.window.pop_front();
            } else {
                break;
            }
        }

        let recent: Vec<usize> = self
            .window
            .iter()
            .filter(|(t, _)| now.signed_duration_since(*t) <= self.average_span)
            .map(|(_, n)| *n)
            .collect();
        if !recent.is_empty() {
            self.detections_per_second =
                recent.iter().sum::<usize>() as f64 / recent.len() as f64;
        }

        if detections > 0 {
            self.total_detections += detections as u64;
            self.last_detection_time = Some(now);
        }
    }

    pub fn detections_per_second(&self) -> f64 {
        self.detections_per_second
    }

    pub fn total_detections(&self) -> u64 {
        self.total_detections
    }

    pub fn last_detection_time(&self) -> Option<Timestamp> {
        self.last_detection_time
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// 检测效率 = 检测速率 / 采集FPS, 限制在 [0, 100]
    pub fn efficiency(&self, capture_fps: f64) -> f64 {
        if capture_fps > 0.0 {
            (self.detections_per_second / capture_fps * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }

    pub fn stats(&self, capture_fps: f64) -> DetectionRateStats {
        DetectionRateStats {
            detections_per_second: self.detections_per_second,
            total_detections: self.total_detections,
            detection_efficiency: self.efficiency(capture_fps),
        }
    }
}

fn secs_to_duration(secs: f64) -> chrono::Duration {
    chrono::Duration::milliseconds((secs * 1000.0).round() as i64)
}

// ========== 计数器 ==========

/// 计数汇总
pub struct Counters {
    log: SharedEventLog,
    rate: DetectionRateTracker,
    snapshot_stride: u64,
    cycles: u64,
    current_count: usize,
    total_passed: u64,
}

impl Counters {
    pub fn new(config: &CounterConfig) -> Self {
        Self {
            log: Arc::new(RwLock::new(EventLog::new(config.log_capacity))),
            rate: DetectionRateTracker::new(config.rate_window_secs, config.rate_average_secs),
            snapshot_stride: config.snapshot_stride.max(1),
            cycles: 0,
            current_count: 0,
            total_passed: 0,
        }
    }

    /// 折算一个检测周期: 事件入日志, 按间隔追加快照, 更新检测速率
    pub fn record_cycle(
        &mut self,
        outcome: TrackingOutcome,
        tracker: &PersonTracker,
        faces_count: usize,
        now: Timestamp,
    ) {
        self.current_count = outcome.live_count;
        self.total_passed = tracker.total_entries();

        {
            let mut log = self.log.write();
            log.extend(outcome.events.into_iter().map(LogRecord::from));

            if self.cycles % self.snapshot_stride == 0 {
                log.push(LogRecord::Snapshot(SnapshotRecord {
                    timestamp: now,
                    current: self.current_count,
                    total_passed: self.total_passed,
                    total_entries: tracker.total_entries(),
                    total_exits: tracker.total_exits(),
                }));
            }
        }
        self.cycles += 1;

        self.rate.record(now, self.current_count, faces_count);
    }

    pub fn current_count(&self) -> usize {
        self.current_count
    }

    pub fn total_passed(&self) -> u64 {
        self.total_passed
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn rate(&self) -> &DetectionRateTracker {
        &self.rate
    }

    pub fn event_log(&self) -> SharedEventLog {
        Arc::clone(&self.log)
    }

    pub fn recent_events(&self, limit: usize) -> Vec<LogRecord> {
        self.log.read().recent(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::BBox;
    use chrono::{Duration, FixedOffset, TimeZone};

    fn at(ms: i64) -> Timestamp {
        FixedOffset::west_opt(3 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .unwrap()
            + Duration::milliseconds(ms)
    }

    fn snapshot_record(n: usize) -> LogRecord {
        LogRecord::Snapshot(SnapshotRecord {
            timestamp: at(n as i64),
            current: n,
            total_passed: 0,
            total_entries: 0,
            total_exits: 0,
        })
    }

    #[test]
    fn test_log_bounded_keeps_most_recent() {
        let mut log = EventLog::new(500);
        for n in 0..1_234 {
            log.push(snapshot_record(n));
            assert!(log.len() <= 500);
        }
        assert_eq!(log.len(), 500);
        let all = log.to_vec();
        match (&all[0], &all[499]) {
            (LogRecord::Snapshot(first), LogRecord::Snapshot(last)) => {
                assert_eq!(first.current, 734);
                assert_eq!(last.current, 1_233);
            }
            _ => panic!("unexpected record kinds"),
        }
    }

    #[test]
    fn test_recent_is_oldest_first() {
        let mut log = EventLog::new(10);
        for n in 0..5 {
            log.push(snapshot_record(n));
        }
        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp(), at(3));
        assert_eq!(recent[1].timestamp(), at(4));
        assert_eq!(log.recent(100).len(), 5);
    }

    #[test]
    fn test_record_serializes_with_event_tag() {
        let json = serde_json::to_value(snapshot_record(2)).unwrap();
        assert_eq!(json["event"], "SNAPSHOT");
        assert_eq!(json["current"], 2);
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00.002-03:00");
    }

    #[test]
    fn test_snapshot_every_stride_cycles() {
        let config = CounterConfig {
            snapshot_stride: 3,
            ..Default::default()
        };
        let mut tracker = PersonTracker::new(&config, at(0));
        let mut counters = Counters::new(&config);
        for cycle in 0..7 {
            let outcome = tracker.update_at(&[], at(cycle * 33));
            counters.record_cycle(outcome, &tracker, 0, at(cycle * 33));
        }
        // 周期 0, 3, 6
        let log = counters.recent_events(100);
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|r| r.kind() == "SNAPSHOT"));
        assert_eq!(counters.cycles(), 7);
    }

    #[test]
    fn test_entry_events_precede_snapshot() {
        let config = CounterConfig::default();
        let mut tracker = PersonTracker::new(&config, at(0));
        let mut counters = Counters::new(&config);
        let boxes = [BBox::new(0, 0, 10, 10), BBox::new(20, 0, 30, 10)];
        let outcome = tracker.update_at(&boxes, at(0));
        counters.record_cycle(outcome, &tracker, 1, at(0));

        let kinds: Vec<_> = counters.recent_events(10).iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec!["ENTRY", "ENTRY", "SNAPSHOT"]);
        assert_eq!(counters.current_count(), 2);
        assert_eq!(counters.total_passed(), 2);
        match &counters.recent_events(1)[0] {
            LogRecord::Snapshot(s) => {
                assert_eq!(s.total_entries, 2);
                assert_eq!(s.total_exits, 0);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_detection_rate_average_and_window() {
        let mut rate = DetectionRateTracker::new(60.0, 5.0);
        rate.record(at(0), 10, 0);
        rate.record(at(1_000), 2, 2);
        // at(0) 仍在5秒内: (10 + 4) / 2
        assert!((rate.detections_per_second() - 7.0).abs() < 1e-9);

        rate.record(at(7_000), 1, 0);
        // 只剩 at(7000) 在5秒内
        assert!((rate.detections_per_second() - 1.0).abs() < 1e-9);
        assert_eq!(rate.total_detections(), 15);
        assert_eq!(rate.window_len(), 3);

        rate.record(at(62_000), 0, 0);
        // at(0), at(1000) 超出60秒窗口
        assert_eq!(rate.window_len(), 2);
        assert_eq!(rate.detections_per_second(), 0.0);
        assert_eq!(rate.total_detections(), 15);
        assert_eq!(rate.last_detection_time(), Some(at(7_000)));
    }

    #[test]
    fn test_detection_efficiency_clamped() {
        let mut rate = DetectionRateTracker::new(60.0, 5.0);
        rate.record(at(0), 3, 0);
        assert_eq!(rate.efficiency(0.0), 0.0);
        assert!((rate.efficiency(30.0) - 10.0).abs() < 1e-9);
        assert_eq!(rate.efficiency(1.0), 100.0);
        let stats = rate.stats(30.0);
        assert_eq!(stats.total_detections, 3);
    }
}
