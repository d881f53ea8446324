// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 模拟检测器 - 无模型时的随机游走人群
//!
//! 人体检测器每次调用推进一步场景, 人脸检测器返回当前每个人的头部区域。

use std::sync::Arc;

use image::RgbImage;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FaceDetector, PersonDetector};
use crate::detection::types::{BBox, PersonDetection};
use crate::error::Result;

/// 单个模拟行人 (检测帧坐标, 以帧宽高为单位的比例)
#[derive(Clone, Debug)]
struct Walker {
    x: f32,
    y: f32,
    vx: f32,
    w: f32,
    h: f32,
    confidence: f32,
}

/// 模拟场景
struct SimulatedScene {
    walkers: Vec<Walker>,
    max_persons: usize,
    rng: StdRng,
}

impl SimulatedScene {
    fn new(max_persons: usize, seed: u64) -> Self {
        Self {
            walkers: Vec::new(),
            max_persons,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// 推进一步: 行人移动, 走出画面的移除, 按概率补充新人
    fn step(&mut self) {
        for walker in &mut self.walkers {
            walker.x += walker.vx;
        }
        self.walkers.retain(|w| w.x > -w.w && w.x < 1.0);

        if self.walkers.len() < self.max_persons && self.rng.gen_bool(0.05) {
            let from_left = self.rng.gen_bool(0.5);
            let speed = self.rng.gen_range(0.002..0.01);
            let w = self.rng.gen_range(0.08..0.15);
            self.walkers.push(Walker {
                x: if from_left { -w + 0.001 } else { 0.999 },
                y: self.rng.gen_range(0.1..0.4),
                vx: if from_left { speed } else { -speed },
                w,
                h: self.rng.gen_range(0.4..0.55),
                confidence: self.rng.gen_range(0.6..0.99),
            });
        }
    }

    fn person_boxes(&self, width: u32, height: u32) -> Vec<PersonDetection> {
        self.walkers
            .iter()
            .filter_map(|w| {
                let bbox = clip(w.x, w.y, w.x + w.w, w.y + w.h, width, height)?;
                Some(PersonDetection::new(bbox, w.confidence))
            })
            .collect()
    }

    fn face_boxes(&self, width: u32, height: u32) -> Vec<BBox> {
        self.walkers
            .iter()
            .filter_map(|w| {
                let fw = w.w * 0.5;
                let fx = w.x + (w.w - fw) / 2.0;
                clip(fx, w.y, fx + fw, w.y + w.h * 0.2, width, height)
            })
            .collect()
    }
}

/// 比例坐标 → 像素框, 完全在画面外时返回 None
fn clip(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Option<BBox> {
    let (fw, fh) = (width as f32, height as f32);
    let bbox = BBox::new(
        (x1.max(0.0) * fw) as i32,
        (y1.max(0.0) * fh) as i32,
        (x2.min(1.0) * fw) as i32,
        (y2.min(1.0) * fh) as i32,
    );
    bbox.is_valid().then_some(bbox)
}

/// 模拟人体检测器
pub struct SimulatedPersonDetector {
    scene: Arc<Mutex<SimulatedScene>>,
}

/// 模拟人脸检测器
pub struct SimulatedFaceDetector {
    scene: Arc<Mutex<SimulatedScene>>,
}

/// 创建共享同一场景的人体/人脸检测器
pub fn simulated_pair(max_persons: usize, seed: u64) -> (SimulatedPersonDetector, SimulatedFaceDetector) {
    let scene = Arc::new(Mutex::new(SimulatedScene::new(max_persons, seed)));
    (
        SimulatedPersonDetector {
            scene: Arc::clone(&scene),
        },
        SimulatedFaceDetector { scene },
    )
}

impl PersonDetector for SimulatedPersonDetector {
    fn name(&self) -> &str {
        "simulated-crowd"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<PersonDetection>> {
        let mut scene = self.scene.lock();
        scene.step();
        Ok(scene.person_boxes(frame.width(), frame.height()))
    }
}

impl FaceDetector for SimulatedFaceDetector {
    fn name(&self) -> &str {
        "simulated-faces"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BBox>> {
        Ok(self.scene.lock().face_boxes(frame.width(), frame.height()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crowd_bounded_and_valid() {
        let (mut person, mut face) = simulated_pair(4, 1);
        let frame = RgbImage::new(320, 240);
        let mut max_seen = 0;
        for _ in 0..2_000 {
            let people = person.detect(&frame).unwrap();
            let faces = face.detect(&frame).unwrap();
            assert!(people.len() <= 4);
            assert!(faces.len() <= people.len());
            for p in &people {
                assert!(p.bbox.is_valid());
                assert!(p.bbox.x1 >= 0 && p.bbox.x2 <= 320);
                assert!(p.confidence >= 0.6);
            }
            max_seen = max_seen.max(people.len());
        }
        assert!(max_seen > 0);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let frame = RgbImage::new(320, 240);
        let (mut a, _) = simulated_pair(3, 9);
        let (mut b, _) = simulated_pair(3, 9);
        for _ in 0..200 {
            assert_eq!(a.detect(&frame).unwrap(), b.detect(&frame).unwrap());
        }
    }
}
