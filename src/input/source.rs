//! 输入源 - 解析与打开

use std::fmt;

use image::RgbImage;
use once_cell::sync::Lazy;
use phf::phf_map;
use regex::Regex;

use super::{IpCameraSource, TestPatternSource};
use crate::error::{CounterError, Result};

/// 视频源
///
/// `read_frame` 返回 `None` 表示本次读取失败, 调用方稍后重试, 不视为流结束。
pub trait VideoSource: Send {
    fn name(&self) -> &str;

    fn read_frame(&mut self) -> Option<RgbImage>;
}

/// 预设输入源
static SOURCE_PRESETS: phf::Map<&'static str, &'static str> = phf_map! {
    "webcam" => "0",
    "droidcam" => "http://192.168.15.5:4747/shot.jpg",
    "ipwebcam" => "http://192.168.1.100:8080/shot.jpg",
    "test" => "test",
};

static CAMERA_INDEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,3}$").unwrap());
static HTTP_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?i)https?://\S+$").unwrap());
static STREAM_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?i)(rtsp|rtmp)://").unwrap());

/// 输入源类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// 本地摄像头索引
    Camera(usize),
    /// HTTP 快照地址
    Http(String),
    /// 测试画面
    TestPattern,
}

impl InputSource {
    /// 解析命令行输入源: 预设名 / 摄像头索引 / http(s) 地址 / "test"
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let resolved = SOURCE_PRESETS
            .get(text.to_lowercase().as_str())
            .copied()
            .unwrap_or(text);

        if resolved.eq_ignore_ascii_case("test") {
            return Ok(InputSource::TestPattern);
        }
        if CAMERA_INDEX.is_match(resolved) {
            let index = resolved
                .parse()
                .map_err(|_| CounterError::video_source(format!("无效的摄像头索引: {}", resolved)))?;
            return Ok(InputSource::Camera(index));
        }
        if HTTP_URL.is_match(resolved) {
            return Ok(InputSource::Http(resolved.to_string()));
        }
        if STREAM_URL.is_match(resolved) {
            return Err(CounterError::video_source(format!(
                "不支持的流协议 (请使用 HTTP 快照地址): {}",
                resolved
            )));
        }
        Err(CounterError::video_source(format!("无法识别的输入源: {}", text)))
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Camera(index) => write!(f, "camera #{}", index),
            InputSource::Http(url) => write!(f, "{}", url),
            InputSource::TestPattern => write!(f, "test pattern"),
        }
    }
}

/// 打开输入源; 无法打开时回退到测试画面
pub fn open_source(source: &InputSource) -> Box<dyn VideoSource> {
    match source {
        InputSource::TestPattern => Box::new(TestPatternSource::new(640, 480)),
        InputSource::Camera(index) => {
            log::warn!("本地摄像头 #{} 无可用采集后端, 使用测试画面", index);
            Box::new(TestPatternSource::new(640, 480))
        }
        InputSource::Http(url) => match IpCameraSource::connect(url) {
            Ok(camera) => {
                log::info!("IP摄像头连接成功: {}", url);
                Box::new(camera)
            }
            Err(e) => {
                log::warn!("IP摄像头连接失败: {}, 使用测试画面", e);
                Box::new(TestPatternSource::new(640, 480))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_presets_and_index() {
        assert_eq!(InputSource::parse("test").unwrap(), InputSource::TestPattern);
        assert_eq!(InputSource::parse("TEST").unwrap(), InputSource::TestPattern);
        assert_eq!(InputSource::parse("webcam").unwrap(), InputSource::Camera(0));
        assert_eq!(InputSource::parse(" 2 ").unwrap(), InputSource::Camera(2));
        assert_eq!(
            InputSource::parse("droidcam").unwrap(),
            InputSource::Http("http://192.168.15.5:4747/shot.jpg".to_string())
        );
    }

    #[test]
    fn test_parse_urls() {
        assert_eq!(
            InputSource::parse("http://10.0.0.2:8080/shot.jpg").unwrap(),
            InputSource::Http("http://10.0.0.2:8080/shot.jpg".to_string())
        );
        assert!(matches!(
            InputSource::parse("rtsp://cam/stream"),
            Err(CounterError::Source(_))
        ));
        assert!(InputSource::parse("not a source").is_err());
    }

    #[test]
    fn test_camera_falls_back_to_test_pattern() {
        let mut source = open_source(&InputSource::Camera(0));
        assert_eq!(source.name(), "test-pattern");
        assert!(source.read_frame().is_some());
    }
}
