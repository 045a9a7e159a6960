// 该文件是 Huishou （回收） 项目的一部分。
// src/pipeline.rs - 上传、推理、保存、展示流水线
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

use std::fmt;

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  frame::RgbFrame,
  input::{DecodeError, UploadedImage},
  model::{DetectionResult, Detector, InferenceError, detect},
  output::{PersistenceError, Presentation, ResultPersister},
};

/// 一次运行所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Idle,
  Decoding,
  Inferring,
  Persisting,
  Displaying,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::Idle => "空闲",
      Stage::Decoding => "解码",
      Stage::Inferring => "推理",
      Stage::Persisting => "保存",
      Stage::Displaying => "展示",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
  /// 保存失败时仍带着内存中的标注结果，界面可以选择展示
  #[error("保存失败: {source}")]
  Persistence {
    source: PersistenceError,
    original: Box<RgbFrame>,
    result: Box<DetectionResult>,
  },
}

impl PipelineError {
  pub fn stage(&self) -> Stage {
    match self {
      PipelineError::Decode(_) => Stage::Decoding,
      PipelineError::Inference(_) => Stage::Inferring,
      PipelineError::Persistence { .. } => Stage::Persisting,
    }
  }

  /// 展示给用户的提示，只说明失败的阶段，不含内部细节
  pub fn user_message(&self) -> &'static str {
    match self {
      PipelineError::Decode(_) => {
        "Could not read the uploaded image. Please upload a valid JPEG or PNG file."
      }
      PipelineError::Inference(_) => "Detection failed. Please try again with this or another image.",
      PipelineError::Persistence { .. } => "The processed image could not be saved.",
    }
  }

  /// 保存失败时未能写入的标注结果
  pub fn unsaved_result(&self) -> Option<(&RgbFrame, &DetectionResult)> {
    match self {
      PipelineError::Persistence {
        original, result, ..
      } => Some((original, result)),
      _ => None,
    }
  }
}

/// 单次运行的流水线：解码 → 推理 → 保存 → 展示。
///
/// 各阶段严格顺序执行，任一阶段失败即中止，不重试。
pub struct Pipeline<'a> {
  detector: &'a dyn Detector,
  persister: &'a ResultPersister,
  clock: fn() -> DateTime<Local>,
}

impl<'a> Pipeline<'a> {
  pub fn new(detector: &'a dyn Detector, persister: &'a ResultPersister) -> Self {
    Self {
      detector,
      persister,
      clock: Local::now,
    }
  }

  /// 替换用于命名结果文件的时钟
  pub fn with_clock(mut self, clock: fn() -> DateTime<Local>) -> Self {
    self.clock = clock;
    self
  }

  pub fn run(&self, upload: UploadedImage) -> Result<Presentation, PipelineError> {
    self.run_observed(upload, |_| {})
  }

  /// 运行并报告每次阶段切换，结束时（无论成败）总会回到 `Stage::Idle`
  pub fn run_observed<F: FnMut(Stage)>(
    &self,
    upload: UploadedImage,
    mut observe: F,
  ) -> Result<Presentation, PipelineError> {
    let result = self.run_stages(upload, &mut observe);
    if let Err(e) = result.as_ref() {
      warn!("{}阶段失败: {}", e.stage(), e);
    }
    observe(Stage::Idle);
    result
  }

  fn run_stages<F: FnMut(Stage)>(
    &self,
    upload: UploadedImage,
    observe: &mut F,
  ) -> Result<Presentation, PipelineError> {
    let upload_name = upload.name().to_string();

    observe(Stage::Decoding);
    info!("解码上传图像: {} ({} 字节)", upload_name, upload.bytes().len());
    let original = upload.decode()?;

    observe(Stage::Inferring);
    info!(
      "输入图像 {}x{}，开始推理...",
      original.width(),
      original.height()
    );
    let result = detect(self.detector, &original)?;

    observe(Stage::Persisting);
    let artifact = match self.persister.persist_at(&result, (self.clock)()) {
      Ok(artifact) => artifact,
      Err(source) => {
        return Err(PipelineError::Persistence {
          source,
          original: Box::new(original),
          result: Box::new(result),
        });
      }
    };

    observe(Stage::Displaying);
    info!("运行 {} 完成", artifact.run_id);
    Ok(Presentation {
      original,
      annotated: result.annotated,
      detections: result.detections,
      artifact,
      upload_name,
    })
  }
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use image::{DynamicImage, ImageFormat, RgbImage};

  use super::*;

  struct Identity;

  impl Detector for Identity {
    fn name(&self) -> &str {
      "identity"
    }

    fn detect(&self, frame: &RgbFrame) -> Result<DetectionResult, InferenceError> {
      Ok(DetectionResult {
        annotated: frame.clone(),
        detections: Vec::new(),
      })
    }
  }

  struct Failing;

  impl Detector for Failing {
    fn name(&self) -> &str {
      "failing"
    }

    fn detect(&self, _frame: &RgbFrame) -> Result<DetectionResult, InferenceError> {
      Err(InferenceError::UnexpectedOutput("boom".into()))
    }
  }

  fn png_upload() -> UploadedImage {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(12, 6))
      .write_to(&mut buf, ImageFormat::Png)
      .unwrap();
    UploadedImage::new("can.png", Some("image/png".into()), buf.into_inner())
  }

  #[test]
  fn stages_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let persister = ResultPersister::new(dir.path());
    let pipeline = Pipeline::new(&Identity, &persister);

    let mut stages = Vec::new();
    let presentation = pipeline
      .run_observed(png_upload(), |s| stages.push(s))
      .unwrap();

    assert_eq!(
      stages,
      vec![
        Stage::Decoding,
        Stage::Inferring,
        Stage::Persisting,
        Stage::Displaying,
        Stage::Idle
      ]
    );
    assert_eq!(presentation.original.dimensions(), (12, 6));
    assert_eq!(presentation.download_name(), "processed_can.png");
    assert!(presentation.output_path().starts_with(dir.path()));
  }

  #[test]
  fn inference_failure_returns_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let persister = ResultPersister::new(dir.path().join("runs"));
    let pipeline = Pipeline::new(&Failing, &persister);

    let mut stages = Vec::new();
    let err = pipeline
      .run_observed(png_upload(), |s| stages.push(s))
      .unwrap_err();

    assert_eq!(err.stage(), Stage::Inferring);
    assert_eq!(stages.last(), Some(&Stage::Idle));
    assert!(!stages.contains(&Stage::Persisting));
    assert!(!dir.path().join("runs").exists());
  }

  #[test]
  fn persistence_failure_keeps_result() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("runs");
    std::fs::write(&blocker, b"").unwrap();
    let persister = ResultPersister::new(&blocker);
    let pipeline = Pipeline::new(&Identity, &persister);

    let err = pipeline.run(png_upload()).unwrap_err();
    assert_eq!(err.stage(), Stage::Persisting);
    let (original, result) = err.unsaved_result().unwrap();
    assert_eq!(original.dimensions(), (12, 6));
    assert_eq!(result.annotated.dimensions(), (12, 6));
  }

  #[test]
  fn user_messages_hide_details() {
    let err = PipelineError::from(InferenceError::UnexpectedOutput("tensor [1, 2]".into()));
    assert!(!err.user_message().contains("tensor"));
  }
}
