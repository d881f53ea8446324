//! 帧标注 (Frame Annotation)
//!
//! 在最新采集帧上叠加最近一次检测结果, 供预览/视频编码使用:
//! - 人体框: 黄色
//! - 人脸框: 蓝色
//! - 左上角黑色信息面板: 实时人数 / 人脸数 / 进出累计 / 采集FPS
//!
//! 文字使用内置 5x7 点阵字体绘制, 不依赖字体文件。

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detection::types::{BBox, DetectionSnapshot};
use crate::input::TestPatternSource;

pub const PERSON_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
pub const FACE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const PANEL_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const BOX_THICKNESS: i32 = 2;
const GLYPH_W: i32 = 5;
const GLYPH_H: i32 = 7;
const TEXT_SCALE: i32 = 2;
const LINE_HEIGHT: i32 = (GLYPH_H + 3) * TEXT_SCALE;
const PANEL_MARGIN: i32 = 6;

/// 无可用帧时的画面尺寸
const FALLBACK_SIZE: (u32, u32) = (640, 480);

/// 标注一帧; `frame` 为 `None` 时在测试画面上标注
pub fn annotate(frame: Option<&RgbImage>, snapshot: &DetectionSnapshot, capture_fps: f64) -> RgbImage {
    let mut canvas = match frame {
        Some(frame) => frame.clone(),
        None => {
            let (w, h) = FALLBACK_SIZE;
            TestPatternSource::new(w, h).render(0.0)
        }
    };

    for bbox in &snapshot.people_boxes {
        draw_box(&mut canvas, bbox, PERSON_COLOR, BOX_THICKNESS);
    }
    for bbox in &snapshot.face_boxes {
        draw_box(&mut canvas, bbox, FACE_COLOR, BOX_THICKNESS);
    }

    let mut lines = vec![
        format!("PEOPLE {}", snapshot.people_count),
        format!("FACES {}", snapshot.faces_count),
        format!("IN {} OUT {}", snapshot.total_entries, snapshot.total_exits),
        format!("FPS {:.1}", capture_fps),
    ];
    if frame.is_none() {
        lines.push("NO FRAME".to_string());
    }
    draw_info_panel(&mut canvas, &lines);

    canvas
}

/// 粗边框 (向外扩展 `thickness` 像素), 超出画面部分自动裁剪
pub fn draw_box(img: &mut RgbImage, bbox: &BBox, color: Rgb<u8>, thickness: i32) {
    if !bbox.is_valid() {
        return;
    }
    for offset in 0..thickness.max(1) {
        let rect = Rect::at(bbox.x1 - offset, bbox.y1 - offset).of_size(
            (bbox.width() + offset * 2) as u32,
            (bbox.height() + offset * 2) as u32,
        );
        draw_hollow_rect_mut(img, rect, color);
    }
}

fn draw_info_panel(img: &mut RgbImage, lines: &[String]) {
    let longest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as i32;
    let width = longest * (GLYPH_W + 1) * TEXT_SCALE + PANEL_MARGIN * 2;
    let height = lines.len() as i32 * LINE_HEIGHT + PANEL_MARGIN * 2;
    draw_filled_rect_mut(
        img,
        Rect::at(0, 0).of_size(width as u32, height as u32),
        PANEL_COLOR,
    );

    for (row, line) in lines.iter().enumerate() {
        let y = PANEL_MARGIN + row as i32 * LINE_HEIGHT;
        draw_text(img, line, PANEL_MARGIN, y, TEXT_COLOR);
    }
}

/// 点阵文字, 每个点放大为 TEXT_SCALE x TEXT_SCALE
fn draw_text(img: &mut RgbImage, text: &str, x: i32, y: i32, color: Rgb<u8>) {
    let (w, h) = (img.width() as i32, img.height() as i32);
    for (i, ch) in text.chars().enumerate() {
        let gx = x + i as i32 * (GLYPH_W + 1) * TEXT_SCALE;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_W {
                if (bits >> (GLYPH_W - 1 - col)) & 1 == 0 {
                    continue;
                }
                for dy in 0..TEXT_SCALE {
                    for dx in 0..TEXT_SCALE {
                        let px = gx + col * TEXT_SCALE + dx;
                        let py = y + row as i32 * TEXT_SCALE + dy;
                        if px >= 0 && py >= 0 && px < w && py < h {
                            img.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
    }
}

fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        _ => [0; 7],
    }
}
