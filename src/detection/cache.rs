//! 检测结果缓存 (Detection Cache)
//!
//! 检测线程每个周期发布一份完整快照, 视频编码/统计查询等读取方随时读取。
//! 锁只在替换 `Arc` 指针时持有, 不覆盖检测计算本身。

use std::sync::Arc;

use parking_lot::Mutex;

use super::types::{DetectionSnapshot, Frame};

/// 单槽快照缓存
#[derive(Default)]
pub struct DetectionCache {
    current: Mutex<Arc<DetectionSnapshot>>,
}

impl DetectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 原子替换当前快照
    pub fn publish(&self, snapshot: DetectionSnapshot) {
        let next = Arc::new(snapshot);
        let previous = std::mem::replace(&mut *self.current.lock(), next);
        // 旧快照在锁外释放
        drop(previous);
    }

    /// 读取最新快照; 尚未发布时返回 `ready == false` 的默认快照
    pub fn read(&self) -> Arc<DetectionSnapshot> {
        Arc::clone(&self.current.lock())
    }

    pub fn is_ready(&self) -> bool {
        self.current.lock().ready
    }
}

/// 最新采集帧 (供渲染方预览, 不与检测线程争抢帧队列)
#[derive(Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Frame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, frame: Frame) {
        *self.latest.lock() = Some(frame);
    }

    pub fn latest(&self) -> Option<Frame> {
        self.latest.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::BBox;
    use std::thread;

    fn snapshot(n: usize) -> DetectionSnapshot {
        DetectionSnapshot {
            people_boxes: vec![BBox::new(0, 0, 10, 10); n],
            people_count: n,
            total_entries: n as u64,
            cycle: n as u64,
            ready: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_read_before_publish_is_not_ready() {
        let cache = DetectionCache::new();
        let snap = cache.read();
        assert!(!snap.ready);
        assert!(snap.people_boxes.is_empty());
        assert!(!cache.is_ready());
    }

    #[test]
    fn test_repeated_reads_identical() {
        let cache = DetectionCache::new();
        cache.publish(snapshot(2));
        let a = cache.read();
        let b = cache.read();
        assert_eq!(*a, *b);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_publish_replaces_snapshot() {
        let cache = DetectionCache::new();
        cache.publish(snapshot(1));
        let old = cache.read();
        cache.publish(snapshot(3));
        assert_eq!(old.people_count, 1);
        assert_eq!(cache.read().people_count, 3);
    }

    #[test]
    fn test_publish_releases_unreferenced_snapshot() {
        let cache = DetectionCache::new();
        cache.publish(snapshot(4));
        let weak = Arc::downgrade(&cache.read());
        cache.publish(snapshot(5));
        assert!(weak.upgrade().is_none());

        // 读取方持有的旧快照不受影响, 且发布后仍可立即加锁
        let held = cache.read();
        cache.publish(snapshot(6));
        assert_eq!(held.people_count, 5);
        assert!(cache.current.try_lock().is_some());
        assert_eq!(cache.read().people_count, 6);
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_snapshot() {
        let cache = Arc::new(DetectionCache::new());
        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for n in 0..500 {
                    cache.publish(snapshot(n % 7));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snap = cache.read();
                        assert_eq!(snap.people_boxes.len(), snap.people_count);
                        assert_eq!(snap.total_entries, snap.people_count as u64);
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
