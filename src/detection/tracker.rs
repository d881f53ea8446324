//! 人员跟踪与进出统计 (Person Tracker)
//!
//! 基于启发式的槽位匹配, 不做重识别:
//! - 每个周期按检测结果中的位置给框分配槽位 (P1, P2, ...)
//! - 槽位首次出现 → 新人进入 (ENTRY)
//! - 槽位持续出现 → 同一人, 刷新 `last_seen` 与检测框
//! - 槽位消失超过宽限期 → 离开 (EXIT), 停留时长按 `last_seen - entry_time` 计算
//!
//! 两人在检测结果中交换先后顺序时, 槽位匹配会产生一对 EXIT+ENTRY,
//! 需要连续性时可切换到 [`AssignmentStrategy::GreedyIou`]。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use super::types::{BBox, Timestamp};
use crate::config::{AssignmentStrategy, CounterConfig};

// ========== 公共数据结构 ==========

/// 跟踪槽位 (Positional 下为检测结果中的位置, GreedyIou 下为人员ID)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey(pub u64);

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// 跟踪中的人员
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackedPerson {
    /// 唯一人员ID, 只分配一次, 不复用
    pub person_id: u64,
    pub slot: String,
    pub entry_time: Timestamp,
    pub last_seen: Timestamp,
    /// 最近一次的检测框
    pub bbox: BBox,
    pub session_id: String,
}

/// 进入事件
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntryEvent {
    pub timestamp: Timestamp,
    pub person_id: u64,
    pub session_id: String,
    pub slot: String,
    pub bbox: BBox,
    pub current_count: usize,
    pub total_entries: u64,
}

/// 离开事件
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExitEvent {
    /// 最后一次被看到的时间 (不是判定离开的时间)
    pub timestamp: Timestamp,
    pub person_id: u64,
    pub session_id: String,
    pub entry_time: Timestamp,
    pub exit_time: Timestamp,
    pub duration_seconds: f64,
    pub duration_formatted: String,
    pub bbox: BBox,
    pub current_count: usize,
    pub total_exits: u64,
}

/// 跟踪事件
#[derive(Clone, Debug, PartialEq)]
pub enum TrackEvent {
    Entry(EntryEvent),
    Exit(ExitEvent),
}

/// 单个周期的跟踪结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackingOutcome {
    /// 本周期出现的不同槽位数量
    pub live_count: usize,
    pub events: Vec<TrackEvent>,
}

impl TrackingOutcome {
    pub fn entries(&self) -> impl Iterator<Item = &EntryEvent> {
        self.events.iter().filter_map(|e| match e {
            TrackEvent::Entry(entry) => Some(entry),
            TrackEvent::Exit(_) => None,
        })
    }

    pub fn exits(&self) -> impl Iterator<Item = &ExitEvent> {
        self.events.iter().filter_map(|e| match e {
            TrackEvent::Exit(exit) => Some(exit),
            TrackEvent::Entry(_) => None,
        })
    }
}

/// 跟踪统计
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackingStats {
    pub total_entries: u64,
    pub total_exits: u64,
    pub current_persons: usize,
    pub session_start: Timestamp,
    pub session_duration: f64,
}

// ========== 跟踪器 ==========

/// 人员跟踪器
///
/// 只由检测线程写入; 对外的访问器都返回副本。
pub struct PersonTracker {
    active_persons: BTreeMap<SlotKey, TrackedPerson>,
    person_counter: u64,
    total_entries: u64,
    total_exits: u64,
    current_session_persons: usize,
    session_start: Timestamp,

    grace_period: chrono::Duration,
    strategy: AssignmentStrategy,
    min_iou: f32,
}

impl PersonTracker {
    pub fn new(config: &CounterConfig, session_start: Timestamp) -> Self {
        Self {
            active_persons: BTreeMap::new(),
            person_counter: 0,
            total_entries: 0,
            total_exits: 0,
            current_session_persons: 0,
            session_start,
            grace_period: config.grace_period(),
            strategy: config.assignment,
            min_iou: config.min_iou,
        }
    }

    /// 处理一个检测周期的人体框, 返回本周期的实时人数与产生的事件
    pub fn update_at(&mut self, boxes: &[BBox], now: Timestamp) -> TrackingOutcome {
        let mut events = Vec::new();

        let seen = match self.strategy {
            AssignmentStrategy::Positional => self.assign_positional(boxes, now, &mut events),
            AssignmentStrategy::GreedyIou => self.assign_greedy_iou(boxes, now, &mut events),
        };

        self.sweep_departed(&seen, now, &mut events);

        self.current_session_persons = seen.len();
        TrackingOutcome {
            live_count: seen.len(),
            events,
        }
    }

    /// 槽位 = 检测结果中的位置
    fn assign_positional(
        &mut self,
        boxes: &[BBox],
        now: Timestamp,
        events: &mut Vec<TrackEvent>,
    ) -> BTreeSet<SlotKey> {
        let mut seen = BTreeSet::new();
        for (i, bbox) in boxes.iter().enumerate() {
            let key = SlotKey(i as u64 + 1);
            seen.insert(key);

            if let Some(person) = self.active_persons.get_mut(&key) {
                person.last_seen = now;
                person.bbox = *bbox;
                continue;
            }
            events.push(self.admit(key, *bbox, now, seen.len()));
        }
        seen
    }

    /// 按IOU从高到低贪心匹配已有人员, 未匹配的框视为新进入
    fn assign_greedy_iou(
        &mut self,
        boxes: &[BBox],
        now: Timestamp,
        events: &mut Vec<TrackEvent>,
    ) -> BTreeSet<SlotKey> {
        let mut pairs: Vec<(f32, SlotKey, usize)> = Vec::new();
        for (key, person) in &self.active_persons {
            for (j, bbox) in boxes.iter().enumerate() {
                let iou = person.bbox.iou(bbox);
                if iou > 0.0 && iou >= self.min_iou {
                    pairs.push((iou, *key, j));
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut seen = BTreeSet::new();
        let mut matched_boxes = vec![false; boxes.len()];
        for (_, key, j) in pairs {
            if seen.contains(&key) || matched_boxes[j] {
                continue;
            }
            if let Some(person) = self.active_persons.get_mut(&key) {
                person.last_seen = now;
                person.bbox = boxes[j];
            }
            seen.insert(key);
            matched_boxes[j] = true;
        }

        for (j, bbox) in boxes.iter().enumerate() {
            if matched_boxes[j] {
                continue;
            }
            let key = SlotKey(self.person_counter + 1);
            seen.insert(key);
            events.push(self.admit(key, *bbox, now, seen.len()));
        }
        seen
    }

    /// 登记新人员并生成 ENTRY 事件
    fn admit(&mut self, key: SlotKey, bbox: BBox, now: Timestamp, current_count: usize) -> TrackEvent {
        self.person_counter += 1;
        self.total_entries += 1;

        let session_id = session_label(&now);
        let person = TrackedPerson {
            person_id: self.person_counter,
            slot: key.to_string(),
            entry_time: now,
            last_seen: now,
            bbox,
            session_id: session_id.clone(),
        };
        self.active_persons.insert(key, person);

        log::debug!(
            "人员进入: #{} 槽位{} (累计进入 {})",
            self.person_counter,
            key,
            self.total_entries
        );

        TrackEvent::Entry(EntryEvent {
            timestamp: now,
            person_id: self.person_counter,
            session_id,
            slot: key.to_string(),
            bbox,
            current_count,
            total_entries: self.total_entries,
        })
    }

    /// 本周期未出现且超过宽限期的人员判定为离开
    fn sweep_departed(
        &mut self,
        seen: &BTreeSet<SlotKey>,
        now: Timestamp,
        events: &mut Vec<TrackEvent>,
    ) {
        let departed: Vec<SlotKey> = self
            .active_persons
            .iter()
            .filter(|(key, person)| {
                !seen.contains(key) && now.signed_duration_since(person.last_seen) > self.grace_period
            })
            .map(|(key, _)| *key)
            .collect();

        for key in departed {
            let Some(person) = self.active_persons.remove(&key) else {
                continue;
            };
            self.total_exits += 1;

            let duration = person.last_seen.signed_duration_since(person.entry_time);
            let seconds = duration.num_milliseconds().max(0) as f64 / 1000.0;

            log::debug!(
                "人员离开: #{} 停留 {:.2}s (累计离开 {})",
                person.person_id,
                seconds,
                self.total_exits
            );

            events.push(TrackEvent::Exit(ExitEvent {
                timestamp: person.last_seen,
                person_id: person.person_id,
                session_id: person.session_id,
                entry_time: person.entry_time,
                exit_time: person.last_seen,
                duration_seconds: (seconds * 100.0).round() / 100.0,
                duration_formatted: format_duration(seconds),
                bbox: person.bbox,
                current_count: seen.len(),
                total_exits: self.total_exits,
            }));
        }
    }

    // ========== 只读访问器 ==========

    pub fn current_count(&self) -> usize {
        self.current_session_persons
    }

    pub fn total_entries(&self) -> u64 {
        self.total_entries
    }

    pub fn total_exits(&self) -> u64 {
        self.total_exits
    }

    pub fn session_start(&self) -> Timestamp {
        self.session_start
    }

    pub fn session_duration(&self, now: Timestamp) -> chrono::Duration {
        now.signed_duration_since(self.session_start)
    }

    /// 当前活跃人员 (含宽限期内暂未检测到的)
    pub fn active_persons(&self) -> Vec<TrackedPerson> {
        self.active_persons.values().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active_persons.len()
    }

    pub fn stats(&self, now: Timestamp) -> TrackingStats {
        TrackingStats {
            total_entries: self.total_entries,
            total_exits: self.total_exits,
            current_persons: self.current_session_persons,
            session_start: self.session_start,
            session_duration: self.session_duration(now).num_milliseconds() as f64 / 1000.0,
        }
    }
}

/// 由进入时间生成的会话标签
pub fn session_label(t: &Timestamp) -> String {
    t.format("%Y%m%d_%H%M%S").to_string()
}

/// 停留时长 "Xm Ys"
pub fn format_duration(seconds: f64) -> String {
    let whole = seconds.max(0.0) as u64;
    format!("{}m {}s", whole / 60, whole % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, TimeZone};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn t0() -> Timestamp {
        FixedOffset::west_opt(3 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .unwrap()
    }

    fn at(ms: i64) -> Timestamp {
        t0() + Duration::milliseconds(ms)
    }

    fn bx(n: i32) -> BBox {
        BBox::new(n * 100, 10, n * 100 + 50, 200)
    }

    fn tracker() -> PersonTracker {
        PersonTracker::new(&CounterConfig::default(), t0())
    }

    #[test]
    fn test_two_new_arrivals() {
        let mut tracker = tracker();
        let outcome = tracker.update_at(&[bx(0), bx(1)], at(0));

        assert_eq!(outcome.live_count, 2);
        let entries: Vec<_> = outcome.entries().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].person_id, 1);
        assert_eq!(entries[1].person_id, 2);
        assert_eq!(entries[0].slot, "P1");
        assert_eq!(entries[1].slot, "P2");
        assert_eq!(entries[1].current_count, 2);
        assert_eq!(entries[1].total_entries, 2);
        assert_eq!(tracker.total_entries(), 2);
        assert_eq!(tracker.current_count(), 2);
    }

    #[test]
    fn test_continuity_without_duplication() {
        let mut tracker = tracker();
        tracker.update_at(&[bx(0)], at(0));
        let moved = BBox::new(5, 12, 55, 205);
        let outcome = tracker.update_at(&[moved], at(500));

        assert!(outcome.events.is_empty());
        assert_eq!(tracker.total_entries(), 1);
        let active = tracker.active_persons();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].bbox, moved);
        assert_eq!(active[0].last_seen, at(500));
        assert_eq!(active[0].entry_time, at(0));
    }

    #[test]
    fn test_grace_period_boundary() {
        let mut tracker = tracker();
        tracker.update_at(&[bx(0)], at(0));

        let outcome = tracker.update_at(&[], at(2_900));
        assert!(outcome.events.is_empty());
        assert_eq!(tracker.active_count(), 1);
        assert_eq!(tracker.total_exits(), 0);

        let outcome = tracker.update_at(&[], at(3_100));
        let exits: Vec<_> = outcome.exits().collect();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].person_id, 1);
        assert_eq!(exits[0].exit_time, at(0));
        assert_eq!(exits[0].duration_seconds, 0.0);
        assert_eq!(exits[0].total_exits, 1);
        assert_eq!(tracker.active_count(), 0);

        // 已离开的人员不会再次触发 EXIT
        let outcome = tracker.update_at(&[], at(10_000));
        assert!(outcome.events.is_empty());
        assert_eq!(tracker.total_exits(), 1);
    }

    #[test]
    fn test_exactly_at_grace_is_not_exit() {
        let mut tracker = tracker();
        tracker.update_at(&[bx(0)], at(0));
        let outcome = tracker.update_at(&[], at(3_000));
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_exit_duration_uses_last_seen() {
        let mut tracker = tracker();
        tracker.update_at(&[bx(0)], at(0));
        tracker.update_at(&[bx(0)], at(65_250));
        let outcome = tracker.update_at(&[], at(70_000));

        let exit = outcome.exits().next().unwrap().clone();
        assert_eq!(exit.entry_time, at(0));
        assert_eq!(exit.exit_time, at(65_250));
        assert_eq!(exit.timestamp, at(65_250));
        assert_eq!(exit.duration_seconds, 65.25);
        assert_eq!(exit.duration_formatted, "1m 5s");
        assert_eq!(exit.session_id, "20240501_120000");
    }

    #[test]
    fn test_empty_cycle_within_grace() {
        let mut tracker = tracker();
        tracker.update_at(&[bx(0), bx(1), bx(2)], at(0));
        let outcome = tracker.update_at(&[], at(1_000));

        assert_eq!(outcome.live_count, 0);
        assert!(outcome.events.is_empty());
        assert_eq!(tracker.total_entries(), 3);
        assert_eq!(tracker.total_exits(), 0);
        assert_eq!(tracker.current_count(), 0);
        assert_eq!(tracker.active_count(), 3);
    }

    #[test]
    fn test_returning_slot_within_grace_keeps_identity() {
        let mut tracker = tracker();
        tracker.update_at(&[bx(0)], at(0));
        tracker.update_at(&[], at(1_500));
        let outcome = tracker.update_at(&[bx(0)], at(2_500));
        assert!(outcome.events.is_empty());
        assert_eq!(tracker.active_persons()[0].person_id, 1);
    }

    #[test]
    fn test_fewer_boxes_expire_trailing_slot() {
        let mut tracker = tracker();
        tracker.update_at(&[bx(0), bx(1)], at(0));
        tracker.update_at(&[bx(1)], at(1_000));
        let outcome = tracker.update_at(&[bx(1)], at(3_500));

        // 位置匹配: 剩下的人落在 P1, 原 P2 超时离开
        let exits: Vec<_> = outcome.exits().collect();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].person_id, 2);
        assert_eq!(exits[0].current_count, 1);
        assert_eq!(tracker.total_entries(), 2);
    }

    #[test]
    fn test_greedy_iou_survives_order_swap() {
        let config = CounterConfig {
            assignment: AssignmentStrategy::GreedyIou,
            ..Default::default()
        };
        let mut tracker = PersonTracker::new(&config, t0());
        tracker.update_at(&[bx(0), bx(3)], at(0));
        let outcome = tracker.update_at(&[bx(3), bx(0)], at(100));
        assert!(outcome.events.is_empty());
        assert_eq!(tracker.total_entries(), 2);

        let outcome = tracker.update_at(&[bx(3), bx(0), bx(6)], at(200));
        let entries: Vec<_> = outcome.entries().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].person_id, 3);
        assert_eq!(entries[0].bbox, bx(6));
        assert_eq!(outcome.live_count, 3);
    }

    #[test]
    fn test_invariants_hold_over_random_cycles() {
        for strategy in [AssignmentStrategy::Positional, AssignmentStrategy::GreedyIou] {
            let config = CounterConfig {
                assignment: strategy,
                ..Default::default()
            };
            let mut tracker = PersonTracker::new(&config, t0());
            let mut rng = StdRng::seed_from_u64(7);
            let mut now_ms = 0;
            let mut last_entries = 0;
            let mut last_exits = 0;
            let mut max_id = 0;

            for _ in 0..2_000 {
                now_ms += rng.gen_range(10..800);
                let n = rng.gen_range(0..5);
                let boxes: Vec<BBox> = (0..n).map(|_| bx(rng.gen_range(0..8))).collect();
                let outcome = tracker.update_at(&boxes, at(now_ms));

                for entry in outcome.entries() {
                    assert!(entry.person_id > max_id);
                    max_id = entry.person_id;
                }
                for exit in outcome.exits() {
                    assert!(exit.exit_time >= exit.entry_time);
                    assert!(exit.duration_seconds >= 0.0);
                }
                assert!(tracker.total_entries() >= last_entries);
                assert!(tracker.total_exits() >= last_exits);
                assert!(tracker.total_exits() <= tracker.total_entries());
                assert!(tracker.total_entries() >= tracker.current_count() as u64);
                assert_eq!(
                    tracker.total_entries() - tracker.total_exits(),
                    tracker.active_count() as u64
                );
                last_entries = tracker.total_entries();
                last_exits = tracker.total_exits();
            }
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.4), "0m 0s");
        assert_eq!(format_duration(59.9), "0m 59s");
        assert_eq!(format_duration(125.0), "2m 5s");
    }
}
