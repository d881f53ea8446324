/// 检测系统 (Detection System)
///
/// 独立工作线程, 负责人数统计
/// - Detector: 采集/检测线程与查询接口
/// - Tracker:  进出场跟踪 (ENTRY / EXIT)
/// - Stats:    计数、事件日志、检测速率
/// - Cache:    单槽检测结果快照
pub mod cache;
pub mod detector;
pub mod stats;
pub mod tracker;
pub mod types;

pub use cache::{DetectionCache, FrameSlot};
pub use detector::{Detector, PerformanceStats};
pub use stats::{Counters, DetectionRateStats, DetectionRateTracker, EventLog, LogRecord};
pub use tracker::{EntryEvent, ExitEvent, PersonTracker, TrackEvent, TrackingOutcome, TrackingStats};
pub use types::{BBox, DetectionSnapshot, Frame, PersonDetection, Timestamp};
