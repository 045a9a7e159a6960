// 该文件是 Huishou （回收） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::info;

use crate::{
  frame::{RgbFrame, ToRgbImage},
  model::{Detection, ModelLoadError},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const PALETTE_SIZE: usize = 20;

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: Option<FontArc>,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    // 按色相均匀取色，每个类别一种颜色
    let colors: Vec<Rgb<u8>> = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font: None,
      colors,
    }
  }
}

impl Draw {
  /// 使用 TTF/OTF 字体绘制标签文字；不设置字体时只画框
  pub fn with_font_file(mut self, path: &Path) -> Result<Self, ModelLoadError> {
    let data = std::fs::read(path).map_err(|source| ModelLoadError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let font = FontArc::try_from_vec(data)
      .map_err(|e| ModelLoadError::Font(format!("{}: {}", path.display(), e)))?;
    info!("加载标签字体: {}", path.display());
    self.font = Some(font);
    Ok(self)
  }

  fn color_of(&self, class_id: u32) -> Rgb<u8> {
    self.colors[class_id as usize % self.colors.len()]
  }

  // 在图像上绘制一个矩形边框，bbox 为归一化坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, det: &Detection) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    if w < 1.0 || h < 1.0 {
      return;
    }
    let color = self.color_of(det.class_id);

    let x_min = ((det.bbox[0] * w).floor() as i32).clamp(0, w as i32 - 1);
    let y_min = ((det.bbox[1] * h).floor() as i32).clamp(0, h as i32 - 1);
    let x_max = ((det.bbox[2] * w).ceil() as i32).clamp(0, w as i32 - 1);
    let y_max = ((det.bbox[3] * h).ceil() as i32).clamp(0, h as i32 - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 绘制边框（加粗）
    for thickness in 0..BOX_THICKNESS {
      let width = (x_max - x_min + 1 - 2 * thickness).max(0) as u32;
      let height = (y_max - y_min + 1 - 2 * thickness).max(0) as u32;
      if width == 0 || height == 0 {
        break;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width, height);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };

    let label = format!("{} {:.2}", det.label, det.score);
    let scale = PxScale::from(self.font_size);
    let text_color = Rgb([255u8, 255u8, 255u8]);

    // 估算文本大小（粗略估计）
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 标签背景放在边框上方，贴边时放在框内
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);

    let max_width = (w as i32 - label_x).max(0);
    let label_width = text_width.min(max_width) as u32;
    let label_height = text_height as u32;

    if label_width > 0 && label_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, color);

      draw_text_mut(
        image,
        text_color,
        label_x,
        label_y + self.label_text_vertical_padding,
        scale,
        font,
        &label,
      );
    }
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, detections: &[Detection]) {
    for det in detections {
      self.draw_bbox_with_label(image, det);
    }
  }

  /// 在帧的副本上绘制，原帧不变
  pub fn draw_detection<F: ToRgbImage>(&self, frame: &F, detections: &[Detection]) -> RgbFrame {
    let mut image = frame.to_rgb_image();
    self.draw_detections_on_image(&mut image, detections);
    RgbFrame::from(image)
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(class_id: u32, bbox: [f32; 4]) -> Detection {
    Detection {
      class_id,
      label: "Metal".to_string(),
      score: 0.5,
      bbox,
    }
  }

  #[test]
  fn box_outline_only() {
    let draw = Draw::default();
    let mut image = RgbImage::new(100, 100);
    draw.draw_detections_on_image(&mut image, &[detection(0, [0.1, 0.2, 0.5, 0.6])]);

    let color = draw.color_of(0);
    assert_eq!(*image.get_pixel(10, 20), color);
    assert_eq!(*image.get_pixel(11, 21), color);
    assert_eq!(*image.get_pixel(50, 60), color);
    assert_eq!(*image.get_pixel(30, 40), Rgb([0, 0, 0]));
  }

  #[test]
  fn degenerate_boxes_are_skipped() {
    let draw = Draw::default();
    let mut image = RgbImage::new(10, 10);
    draw.draw_detections_on_image(
      &mut image,
      &[
        detection(1, [0.5, 0.5, 0.5, 0.5]),
        detection(1, [2.0, 2.0, 3.0, 3.0]),
      ],
    );
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn palette_is_not_black() {
    let draw = Draw::default();
    assert!(draw.colors.iter().all(|c| *c != Rgb([0, 0, 0])));
    assert_eq!(draw.color_of(0), draw.color_of(PALETTE_SIZE as u32));
  }
}
