// 该文件是 Huishou （回收） 项目的一部分。
// src/task.rs - 命令行任务
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

use tracing::info;

use crate::{
  input::UploadedImage,
  model::Detector,
  output::{Presentation, ResultPersister},
  pipeline::Pipeline,
};

pub trait Task<I>: Sized {
  type Output;
  type Error;
  fn run_task(
    self,
    input: I,
    detector: &dyn Detector,
    persister: &ResultPersister,
  ) -> Result<Self::Output, Self::Error>;
}

/// 只处理输入中的第一张图像
pub struct OneShotTask;

impl<I: Iterator<Item = UploadedImage>> Task<I> for OneShotTask {
  type Output = Presentation;
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    detector: &dyn Detector,
    persister: &ResultPersister,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let upload = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    let now = std::time::Instant::now();
    let presentation = Pipeline::new(detector, persister).run(upload)?;
    info!(
      "处理完成，检测到 {} 个目标，耗时: {:.2?}",
      presentation.detections.len(),
      now.elapsed()
    );
    Ok(presentation)
  }
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use image::{DynamicImage, ImageFormat, RgbImage};

  use super::*;
  use crate::{
    frame::RgbFrame,
    model::{DetectionResult, InferenceError},
  };

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

  fn upload(name: &str) -> UploadedImage {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(4, 4))
      .write_to(&mut buf, ImageFormat::Png)
      .unwrap();
    UploadedImage::new(name, None, buf.into_inner())
  }

  #[test]
  fn one_shot_needs_input() {
    let dir = tempfile::tempdir().unwrap();
    let persister = ResultPersister::new(dir.path());
    let res = OneShotTask.run_task(std::iter::empty(), &Identity, &persister);
    assert!(res.is_err());

    let res = OneShotTask.run_task(std::iter::once(upload("a.png")), &Identity, &persister);
    assert!(res.unwrap().output_path().is_file());
  }

  #[test]
  fn one_shot_stops_on_bad_image() {
    let dir = tempfile::tempdir().unwrap();
    let persister = ResultPersister::new(dir.path().join("runs"));
    let inputs = vec![
      UploadedImage::new("bad.png", None, b"not an image".to_vec()),
      upload("b.png"),
    ];

    let res = OneShotTask.run_task(inputs.into_iter(), &Identity, &persister);
    assert!(res.is_err());
    assert!(!dir.path().join("runs").exists());
  }
}
