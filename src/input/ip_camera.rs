//! HTTP IP摄像头 - 轮询 JPEG 快照
//!
//! DroidCam / IP Webcam 等手机摄像头提供 `/shot.jpg` 之类的单帧接口。

use std::io::Read;
use std::time::Duration;

use image::RgbImage;

use super::source::VideoSource;
use crate::error::{CounterError, Result};

/// 单帧最大字节数
const MAX_SNAPSHOT_BYTES: u64 = 16 * 1024 * 1024;

/// IP摄像头快照源
pub struct IpCameraSource {
    url: String,
    agent: ureq::Agent,
    failures: u64,
}

impl IpCameraSource {
    /// 连接并读取一帧验证地址可用
    pub fn connect(url: &str) -> Result<Self> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(3))
            .timeout_read(Duration::from_secs(5))
            .build();
        let source = Self {
            url: url.to_string(),
            agent,
            failures: 0,
        };
        source.fetch()?;
        Ok(source)
    }

    fn fetch(&self) -> Result<RgbImage> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(|e| CounterError::Http(e.to_string()))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES)
            .read_to_end(&mut bytes)?;

        Ok(decode_snapshot(&bytes)?)
    }
}

/// JPEG/PNG 字节 → RGB 图像
pub fn decode_snapshot(bytes: &[u8]) -> std::result::Result<RgbImage, image::ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

impl VideoSource for IpCameraSource {
    fn name(&self) -> &str {
        &self.url
    }

    fn read_frame(&mut self) -> Option<RgbImage> {
        match self.fetch() {
            Ok(frame) => Some(frame),
            Err(e) => {
                self.failures += 1;
                if self.failures % 100 == 1 {
                    log::warn!("IP摄像头读帧失败 (累计{}次): {}", self.failures, e);
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    #[test]
    fn test_decode_png_snapshot() {
        let img = RgbImage::from_pixel(8, 6, Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        let decoded = decode_snapshot(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (8, 6));
        assert_eq!(decoded.get_pixel(3, 3), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_snapshot(b"not an image").is_err());
    }

    #[test]
    fn test_connect_unreachable_fails() {
        // 保留地址, 不会有服务监听
        assert!(IpCameraSource::connect("http://127.0.0.1:9/shot.jpg").is_err());
    }
}
