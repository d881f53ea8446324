use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, FixedOffset};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::stats::DetectionRateStats;
/// 人数统计系统数据结构定义
/// Data structures for the people counting system

/// 带时区的墙钟时间戳
pub type Timestamp = DateTime<FixedOffset>;

// ========== 数据结构 ==========

/// 检测框 (源帧像素坐标, 左上/右下)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> i64 {
        self.width().max(0) as i64 * self.height().max(0) as i64
    }

    /// 获取中心点
    pub fn center(&self) -> (f32, f32) {
        (
            (self.x1 + self.x2) as f32 / 2.0,
            (self.y1 + self.y2) as f32 / 2.0,
        )
    }

    /// 右下角严格位于左上角右下方
    pub fn is_valid(&self) -> bool {
        self.x2 > self.x1 && self.y2 > self.y1
    }

    /// 按比例缩放 (检测分辨率 → 源分辨率)
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: (self.x1 as f32 * sx) as i32,
            y1: (self.y1 as f32 * sy) as i32,
            x2: (self.x2 as f32 * sx) as i32,
            y2: (self.y2 as f32 * sy) as i32,
        }
    }

    /// 计算两个边界框的IOU (Intersection over Union)
    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) as i64 * (y2 - y1) as i64;
        let union = self.area() + other.area() - intersection;
        if union <= 0 {
            return 0.0;
        }

        intersection as f32 / union as f32
    }
}

impl From<(i32, i32, i32, i32)> for BBox {
    fn from((x1, y1, x2, y2): (i32, i32, i32, i32)) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

/// 人体检测结果 (检测框 + 置信度)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonDetection {
    pub bbox: BBox,
    pub confidence: f32,
}

impl PersonDetection {
    pub fn new(bbox: BBox, confidence: f32) -> Self {
        Self { bbox, confidence }
    }
}

/// 采集帧 (采集线程 → 检测线程)
#[derive(Clone)]
pub struct Frame {
    pub image: Arc<RgbImage>, // 使用Arc共享数据,避免复制
    pub index: u64,           // 帧序号
    pub captured_at: Instant,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// 检测结果快照 (检测线程 → 读取方)
///
/// 每个检测周期整体替换,读取方只会看到完整的某一周期结果。
/// `ready == false` 表示尚未完成任何检测周期。
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionSnapshot {
    pub people_boxes: Vec<BBox>,
    pub face_boxes: Vec<BBox>,
    pub people_count: usize,
    pub faces_count: usize,
    pub total_entries: u64,
    pub total_exits: u64,
    pub cycle: u64,
    pub detection_rate: DetectionRateStats,
    pub last_update: Option<Timestamp>,
    pub ready: bool,
}
