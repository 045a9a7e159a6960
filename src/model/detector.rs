// 该文件是 Huishou （回收） 项目的一部分。
// src/model/detector.rs - 检测器与推理适配
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

use std::time::Instant;

use tracing::{debug, info};

use crate::{
  frame::RgbFrame,
  model::{DetectResult, InferenceError, Labels, Model},
  output::draw::Draw,
};

/// 一个带类别名称的检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_id: u32,
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，按原图归一化
}

/// 检测器的输出：叠加了框与标签的图像，以及结构化的检测列表
#[derive(Debug, Clone)]
pub struct DetectionResult {
  pub annotated: RgbFrame,
  pub detections: Vec<Detection>,
}

/// 检测器：一次调用把图像映射为检测结果。
///
/// 实现必须可重入，同一个实例会被多个请求同时调用。
pub trait Detector: Send + Sync {
  fn name(&self) -> &str;

  fn detect(&self, frame: &RgbFrame) -> Result<DetectionResult, InferenceError>;
}

/// 把只给出结构化结果的模型包装成检测器，自行绘制标注图像
pub struct RenderingDetector<M> {
  name: String,
  model: M,
  labels: Labels,
  draw: Draw,
}

impl<M> RenderingDetector<M> {
  pub fn new(name: impl Into<String>, model: M, labels: Labels, draw: Draw) -> Self {
    Self {
      name: name.into(),
      model,
      labels,
      draw,
    }
  }
}

impl<M> Detector for RenderingDetector<M>
where
  M: Model<Input = RgbFrame, Output = DetectResult, Error = InferenceError> + Send + Sync,
{
  fn name(&self) -> &str {
    &self.name
  }

  fn detect(&self, frame: &RgbFrame) -> Result<DetectionResult, InferenceError> {
    let result = self.model.infer(frame)?;

    let detections: Vec<Detection> = result
      .items
      .iter()
      .map(|item| Detection {
        class_id: item.class_id,
        label: self.labels.name(item.class_id),
        score: item.score,
        bbox: item.bbox,
      })
      .collect();

    let annotated = self.draw.draw_detection(frame, &detections);
    Ok(DetectionResult {
      annotated,
      detections,
    })
  }
}

/// 推理适配：同步调用检测器，并检查标注图像与输入同尺寸
pub fn detect<D: Detector + ?Sized>(
  detector: &D,
  frame: &RgbFrame,
) -> Result<DetectionResult, InferenceError> {
  debug!("调用检测器 {}", detector.name());
  let now = Instant::now();
  let result = detector.detect(frame)?;
  let elapsed = now.elapsed();

  if result.annotated.dimensions() != frame.dimensions() {
    return Err(InferenceError::SizeMismatch {
      expected: frame.dimensions(),
      actual: result.annotated.dimensions(),
    });
  }

  info!(
    "推理完成，耗时: {:.2?}，检测到 {} 个物体",
    elapsed,
    result.detections.len()
  );
  for det in &result.detections {
    debug!(
      "  - {}: {:.2}% at [{:.3}, {:.3}, {:.3}, {:.3}]",
      det.label,
      det.score * 100.0,
      det.bbox[0],
      det.bbox[1],
      det.bbox[2],
      det.bbox[3]
    );
  }

  Ok(result)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  struct FixedModel;

  impl Model for FixedModel {
    type Input = RgbFrame;
    type Output = DetectResult;
    type Error = InferenceError;

    fn infer(&self, _input: &RgbFrame) -> Result<DetectResult, InferenceError> {
      Ok(DetectResult {
        items: vec![DetectItem {
          class_id: 2,
          score: 0.9,
          bbox: [0.25, 0.25, 0.75, 0.75],
        }]
        .into_boxed_slice(),
      })
    }
  }

  struct ShrinkingDetector;

  impl Detector for ShrinkingDetector {
    fn name(&self) -> &str {
      "shrinking"
    }

    fn detect(&self, _frame: &RgbFrame) -> Result<DetectionResult, InferenceError> {
      Ok(DetectionResult {
        annotated: RgbFrame::with_shape(1, 1),
        detections: Vec::new(),
      })
    }
  }

  #[test]
  fn rendering_detector_labels_and_draws() {
    let detector = RenderingDetector::new("fixed", FixedModel, Labels::default(), Draw::default());
    let frame = RgbFrame::with_shape(40, 40);

    let result = detect(&detector, &frame).unwrap();
    assert_eq!(result.detections.len(), 1);
    assert_eq!(result.detections[0].label, "Glass");
    assert_eq!(result.annotated.dimensions(), (40, 40));
    // 框的左上角被涂上颜色，原图未被修改
    assert_ne!(result.annotated.pixel(10, 10), Some([0, 0, 0]));
    assert_eq!(frame.pixel(10, 10), Some([0, 0, 0]));
    // 框内部保持原样
    assert_eq!(result.annotated.pixel(20, 20), Some([0, 0, 0]));
  }

  #[test]
  fn annotated_size_is_checked() {
    let frame = RgbFrame::with_shape(8, 8);
    let err = detect(&ShrinkingDetector, &frame).unwrap_err();
    assert!(matches!(err, InferenceError::SizeMismatch { .. }));
  }
}
