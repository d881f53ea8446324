/// 检测模型接口与适配器
///
/// # 架构说明
///
/// 人体/人脸检测模型本身是外部组件, 本模块只定义统一接口并处理模型输入输出:
/// - **PersonDetector**: 返回人体框 + 置信度
/// - **FaceDetector**: 返回人脸框 (只计数, 不跟踪)
/// - **DetectionAdapter**: 缩放到检测分辨率 → 调用模型 → 校验 → 过滤 → 坐标还原
///
/// 模型未加载时对应检测结果恒为空, 与"本周期未检测到人"一致。
/// 单个周期的模型错误或非有限置信度只记录日志, 该周期按空结果处理;
/// 宽或高为0的退化框单独丢弃。
///
/// ## 使用示例
/// ```rust
/// use shomer_rs::models::{simulated_pair, DetectionAdapter};
///
/// let (person, face) = simulated_pair(3, 42);
/// let mut adapter = DetectionAdapter::new(Some(Box::new(person)), Some(Box::new(face)), 0.5, 320);
/// let frame = image::RgbImage::new(640, 480);
/// let result = adapter.run(&frame);
/// assert!(result.people.len() <= 3);
/// ```
pub mod simulated;

use fast_image_resize as fr;
use image::RgbImage;

use crate::detection::types::{BBox, PersonDetection};
use crate::error::{CounterError, Result};

pub use simulated::{simulated_pair, SimulatedFaceDetector, SimulatedPersonDetector};

/// 人体检测模型
pub trait PersonDetector: Send {
    fn name(&self) -> &str;

    /// 检测一帧中的人体
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<PersonDetection>>;
}

/// 人脸检测模型
pub trait FaceDetector: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BBox>>;
}

/// 单帧检测结果 (源帧坐标)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameDetections {
    pub people: Vec<BBox>,
    pub faces: Vec<BBox>,
}

/// 检测适配器
pub struct DetectionAdapter {
    person: Option<Box<dyn PersonDetector>>,
    face: Option<Box<dyn FaceDetector>>,
    conf_threshold: f32,
    detection_width: u32,
    resizer: fr::Resizer,
}

impl DetectionAdapter {
    pub fn new(
        person: Option<Box<dyn PersonDetector>>,
        face: Option<Box<dyn FaceDetector>>,
        conf_threshold: f32,
        detection_width: u32,
    ) -> Self {
        match &person {
            Some(model) => log::info!("人体检测模型: {}", model.name()),
            None => log::warn!("人体检测模型不可用, 人数将始终为0"),
        }
        match &face {
            Some(model) => log::info!("人脸检测模型: {}", model.name()),
            None => log::warn!("人脸检测模型不可用"),
        }

        Self {
            person,
            face,
            conf_threshold,
            detection_width: detection_width.max(1),
            resizer: fr::Resizer::new(),
        }
    }

    pub fn person_available(&self) -> bool {
        self.person.is_some()
    }

    pub fn face_available(&self) -> bool {
        self.face.is_some()
    }

    /// 对一帧执行人体 + 人脸检测
    pub fn run(&mut self, frame: &RgbImage) -> FrameDetections {
        if self.person.is_none() && self.face.is_none() {
            return FrameDetections::default();
        }
        if frame.width() == 0 || frame.height() == 0 {
            return FrameDetections::default();
        }

        // 宽度超过检测分辨率时先缩放, 检测框再按比例还原
        let downscaled = if frame.width() > self.detection_width {
            match self.downscale(frame) {
                Ok(v) => Some(v),
                Err(e) => {
                    log::warn!("检测帧缩放失败, 使用原始分辨率: {}", e);
                    None
                }
            }
        } else {
            None
        };
        let (input, sx, sy) = match &downscaled {
            Some((small, sx, sy)) => (small, *sx, *sy),
            None => (frame, 1.0, 1.0),
        };

        let people = self
            .detect_people(input)
            .unwrap_or_else(|e| {
                log::warn!("人体检测失败: {}", e);
                Vec::new()
            })
            .into_iter()
            .map(|b| b.scaled(sx, sy))
            .collect();

        let faces = self
            .detect_faces(input)
            .unwrap_or_else(|e| {
                log::warn!("人脸检测失败: {}", e);
                Vec::new()
            })
            .into_iter()
            .map(|b| b.scaled(sx, sy))
            .collect();

        FrameDetections { people, faces }
    }

    fn detect_people(&mut self, input: &RgbImage) -> Result<Vec<BBox>> {
        let Some(model) = self.person.as_mut() else {
            return Ok(Vec::new());
        };
        let detections = model.detect(input)?;

        // 置信度非法说明模型输出整体不可信, 整个周期按空结果处理
        if let Some(bad) = detections.iter().find(|d| !d.confidence.is_finite()) {
            return Err(CounterError::MalformedDetection(format!("{:?}", bad)));
        }

        Ok(detections
            .into_iter()
            .filter(|d| d.confidence >= self.conf_threshold)
            .filter(|d| {
                let valid = d.bbox.is_valid();
                if !valid {
                    log::debug!("丢弃退化人体框: {:?}", d.bbox);
                }
                valid
            })
            .map(|d| d.bbox)
            .collect())
    }

    fn detect_faces(&mut self, input: &RgbImage) -> Result<Vec<BBox>> {
        let Some(model) = self.face.as_mut() else {
            return Ok(Vec::new());
        };
        let mut faces = model.detect(input)?;
        faces.retain(BBox::is_valid);
        Ok(faces)
    }

    /// 缩放到检测宽度 (Nearest 插值, 保持宽高比)
    fn downscale(&mut self, frame: &RgbImage) -> Result<(RgbImage, f32, f32)> {
        let (w, h) = frame.dimensions();
        let dw = self.detection_width;
        let dh = ((h as u64 * dw as u64) / w as u64).max(1) as u32;

        let src = fr::images::Image::from_vec_u8(w, h, frame.as_raw().clone(), fr::PixelType::U8x3)
            .map_err(|e| CounterError::detection(format!("源图像创建失败: {}", e)))?;
        let mut dst = fr::images::Image::new(dw, dh, fr::PixelType::U8x3);

        self.resizer
            .resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Nearest),
            )
            .map_err(|e| CounterError::detection(format!("缩放失败: {}", e)))?;

        let small = RgbImage::from_raw(dw, dh, dst.buffer().to_vec())
            .ok_or_else(|| CounterError::detection("RGB图像转换失败"))?;
        Ok((small, w as f32 / dw as f32, h as f32 / dh as f32))
    }
}
