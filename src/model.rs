// 该文件是 Huishou （回收） 项目的一部分。
// src/model.rs - 模型
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

use std::path::{Path, PathBuf};

use thiserror::Error;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，按原图归一化
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型文件读取失败: {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("推理会话创建失败（{operation}）: {message}")]
  Session { operation: String, message: String },
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("标签文件无效: {path}: {source}")]
  Labels {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("参数无效: {0}")]
  InvalidParam(String),
  #[error("字体文件无效: {0}")]
  Font(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理运行时错误: {0}")]
  Runtime(#[from] ort::Error),
  #[error("张量形状错误: {0}")]
  Shape(#[from] ndarray::ShapeError),
  #[error("模型输出不符合预期: {0}")]
  UnexpectedOutput(String),
  #[error("标注图像尺寸 {actual:?} 与输入 {expected:?} 不一致")]
  SizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("推理会话不可用")]
  SessionPoisoned,
}

/// 原应用使用的垃圾类别
pub const WASTE_LABELS: [&str; 7] = [
  "General",
  "Plastic",
  "Glass",
  "Metal",
  "Paper",
  "Cardboard",
  "Biodegradable",
];

/// 类别名称表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
  names: Vec<String>,
}

impl Default for Labels {
  fn default() -> Self {
    Self {
      names: WASTE_LABELS.iter().map(|s| s.to_string()).collect(),
    }
  }
}

impl Labels {
  /// 从 JSON 字符串数组读取，例如 `["General", "Plastic"]`
  pub fn from_json_file(path: &Path) -> Result<Self, ModelLoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let names: Vec<String> =
      serde_json::from_str(&text).map_err(|source| ModelLoadError::Labels {
        path: path.to_path_buf(),
        source,
      })?;
    Ok(Self { names })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, class_id: u32) -> String {
    self
      .names
      .get(class_id as usize)
      .cloned()
      .unwrap_or_else(|| format!("class_{}", class_id))
  }
}

mod detector;
pub use self::detector::{Detection, DetectionResult, Detector, RenderingDetector, detect};

mod provider;
pub use self::provider::DetectorProvider;

mod yolov5;
pub use self::yolov5::{Yolov5, Yolov5Builder};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn label_lookup_falls_back_to_id() {
    let labels = Labels::default();
    assert_eq!(labels.name(1), "Plastic");
    assert_eq!(labels.name(42), "class_42");
  }

  #[test]
  fn labels_from_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels.json");
    std::fs::write(&path, r#"["can", "bottle"]"#).unwrap();

    let labels = Labels::from_json_file(&path).unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.name(1), "bottle");

    std::fs::write(&path, r#"{"not": "a list"}"#).unwrap();
    assert!(matches!(
      Labels::from_json_file(&path),
      Err(ModelLoadError::Labels { .. })
    ));
  }
}
