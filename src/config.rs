//! 配置 - 命令行参数 + JSON文件调整计数参数

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{CounterError, Result};

/// 人数统计终端参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Shomer - 实时人数统计终端", long_about = None)]
pub struct Args {
    /// 视频源: 摄像头索引 / http(s) 快照地址 / 预设名 (webcam, droidcam, test)
    #[arg(short, long, default_value = "test")]
    pub source: String,

    /// 计数参数配置文件 (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 运行时长(秒), 0 表示一直运行
    #[arg(short, long, default_value_t = 0)]
    pub duration: u64,

    /// 统计信息打印间隔(秒)
    #[arg(long, default_value_t = 5)]
    pub stats_interval: u64,

    /// 退出时导出事件日志 (JSON)
    #[arg(long)]
    pub log_json: Option<PathBuf>,

    /// 模拟人群规模 (无模型时使用模拟检测器)
    #[arg(long, default_value_t = 3)]
    pub simulate: usize,

    /// 覆盖离开判定宽限期(秒)
    #[arg(long)]
    pub grace: Option<f64>,

    /// 禁用人脸检测
    #[arg(long)]
    pub no_faces: bool,
}

/// 跨帧身份分配策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// 按检测结果中的位置分配槽位 (P1, P2, ...)
    #[default]
    Positional,
    /// 按IOU贪心匹配上一周期的检测框
    GreedyIou,
}

/// 计数参数配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    // === 跟踪参数 ===
    pub grace_period_secs: f64,               // 未检测到多久判定为离开
    pub assignment: AssignmentStrategy,       // 身份分配策略
    pub min_iou: f32,                         // GreedyIou 最小匹配IOU

    // === 统计参数 ===
    pub snapshot_stride: u64,                 // 每N个周期记录一次快照
    pub log_capacity: usize,                  // 事件日志保留条数
    pub rate_window_secs: f64,                // 检测速率滚动窗口
    pub rate_average_secs: f64,               // 检测速率平均区间

    // === 检测参数 ===
    pub detection_fps: u32,                   // 检测频率上限
    pub conf_threshold: f32,                  // 人体置信度阈值
    pub detection_width: u32,                 // 检测前缩放宽度
    pub utc_offset_hours: i32,                // 时间戳时区

    // === 线程参数 ===
    pub capture_retry_ms: u64,                // 读帧失败后休眠
    pub stop_timeout_ms: u64,                 // 停止时等待工作线程的上限
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 3.0,
            assignment: AssignmentStrategy::Positional,
            min_iou: 0.3,

            snapshot_stride: 50,
            log_capacity: 500,
            rate_window_secs: 60.0,
            rate_average_secs: 5.0,

            detection_fps: 30,
            conf_threshold: 0.5,
            detection_width: 320,
            utc_offset_hours: -3,

            capture_retry_ms: 2,
            stop_timeout_ms: 1000,
        }
    }
}

impl CounterConfig {
    /// 从JSON文件加载配置
    ///
    /// 文件不存在时写入默认配置; 解析失败时使用默认值。
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<CounterConfig>(&json) {
                Ok(config) => match config.validate() {
                    Ok(()) => {
                        log::info!("配置已从 {} 加载", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("配置无效: {}, 使用默认值", e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    log::warn!("保存默认配置失败: {}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        log::info!("配置已保存到 {}", path.display());
        Ok(())
    }

    /// 默认配置路径: <config_dir>/shomer/counter.json
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("shomer").join("counter.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.grace_period_secs.is_finite() || self.grace_period_secs < 0.0 {
            return Err(CounterError::config("grace_period_secs must be >= 0"));
        }
        if self.snapshot_stride == 0 {
            return Err(CounterError::config("snapshot_stride must be > 0"));
        }
        if self.log_capacity == 0 {
            return Err(CounterError::config("log_capacity must be > 0"));
        }
        if self.detection_fps == 0 {
            return Err(CounterError::config("detection_fps must be > 0"));
        }
        if self.detection_width == 0 {
            return Err(CounterError::config("detection_width must be > 0"));
        }
        if self.rate_average_secs <= 0.0 || self.rate_window_secs < self.rate_average_secs {
            return Err(CounterError::config(
                "rate window must be positive and cover the averaging interval",
            ));
        }
        if self.fixed_offset().is_none() {
            return Err(CounterError::config("utc_offset_hours must be within -23..=23"));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.grace_period_secs * 1000.0).round() as i64)
    }

    /// 两次检测之间的最小间隔
    pub fn detection_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.detection_fps.max(1) as f64)
    }

    pub fn clock_offset(&self) -> FixedOffset {
        self.fixed_offset().unwrap_or_else(|| Utc.fix())
    }

    fn fixed_offset(&self) -> Option<FixedOffset> {
        self.utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        log::info!("当前计数配置:");
        log::info!("  离开宽限期: {:.1}s", self.grace_period_secs);
        log::info!("  分配策略: {:?}", self.assignment);
        log::info!("  快照间隔: 每{}个周期", self.snapshot_stride);
        log::info!("  日志保留: {}条", self.log_capacity);
        log::info!("  检测频率: {}fps (缩放宽度 {})", self.detection_fps, self.detection_width);
        log::info!("  置信度阈值: {:.2}", self.conf_threshold);
    }
}
