// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 计数参数与命令行参数
pub mod detection; // 检测、跟踪与计数
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod models; // 检测模型接口与适配器
pub mod renderer; // 帧标注

use chrono::{FixedOffset, Utc};

pub use crate::config::{Args, AssignmentStrategy, CounterConfig};
pub use crate::detection::{Detector, LogRecord, PerformanceStats};
pub use crate::error::{CounterError, Result};

/// 指定时区的当前时间
pub fn now_in(offset: FixedOffset) -> detection::Timestamp {
    Utc::now().with_timezone(&offset)
}

/// 以分隔符连接的时间字符串, 用于生成文件名
pub fn gen_time_string(offset: FixedOffset, delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    now_in(offset).format(&fmt).to_string()
}
