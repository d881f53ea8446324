//! 测试画面 - 彩色动态背景
//!
//! 没有可用摄像头时的回退输入源, 按固定帧率产生帧。

use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use super::source::VideoSource;

/// 测试画面源
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_interval: Duration,
    started: Instant,
    next_frame: Instant,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_fps(width, height, 30)
    }

    pub fn with_fps(width: u32, height: u32, fps: u32) -> Self {
        let now = Instant::now();
        Self {
            width: width.max(1),
            height: height.max(1),
            frame_interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            started: now,
            next_frame: now,
        }
    }

    /// 生成 t 秒时刻的画面 (4x4 像素块, 正弦色彩)
    pub fn render(&self, t: f32) -> RgbImage {
        let mut frame = RgbImage::from_fn(self.width, self.height, |x, y| {
            let (bx, by) = ((x / 4 * 4) as f32, (y / 4 * 4) as f32);
            Rgb([
                (128.0 + 64.0 * (0.01 * bx + t).sin()) as u8,
                (128.0 + 64.0 * (0.01 * by + t + 2.0).sin()) as u8,
                (128.0 + 64.0 * (0.01 * (bx + by) + t + 4.0).sin()) as u8,
            ])
        });

        // 顶部标题栏
        let bar_height = (self.height / 12).max(1);
        draw_filled_rect_mut(
            &mut frame,
            Rect::at(0, 0).of_size(self.width, bar_height),
            Rgb([0, 0, 0]),
        );
        frame
    }
}

impl VideoSource for TestPatternSource {
    fn name(&self) -> &str {
        "test-pattern"
    }

    fn read_frame(&mut self) -> Option<RgbImage> {
        let now = Instant::now();
        if now < self.next_frame {
            std::thread::sleep(self.next_frame - now);
        }
        self.next_frame = self.next_frame.max(now) + self.frame_interval;
        let t = self.started.elapsed().as_secs_f32();
        Some(self.render(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_dimensions() {
        let mut source = TestPatternSource::with_fps(64, 48, 1000);
        let frame = source.read_frame().unwrap();
        assert_eq!(frame.dimensions(), (64, 48));
        // 标题栏为黑色
        assert_eq!(frame.get_pixel(10, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_pattern_animates() {
        let source = TestPatternSource::new(32, 32);
        assert_ne!(source.render(0.0), source.render(1.0));
    }

    #[test]
    fn test_paced_by_fps() {
        let mut source = TestPatternSource::with_fps(16, 16, 50);
        let start = Instant::now();
        for _ in 0..6 {
            source.read_frame();
        }
        // 第一帧立即返回, 之后每帧 20ms
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
