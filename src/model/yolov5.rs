// 该文件是 Huishou （回收） 项目的一部分。
// src/model/yolov5.rs - YOLOv5 ONNX 模型
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

use std::{path::PathBuf, sync::Mutex};

use image::{Rgb, RgbImage, imageops::FilterType};
use ndarray::{Array4, ArrayView2, ArrayViewD, Axis, Ix2};
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{RgbFrame, ToRgbImage},
  model::{
    DetectItem, DetectResult, InferenceError, Labels, Model, ModelLoadError, RenderingDetector,
  },
  output::draw::Draw,
  url_to_path,
};

const YOLOV5_DEFAULT_INPUT: u32 = 640;
const YOLOV5_DEFAULT_CONF: f32 = 0.25;
const YOLOV5_DEFAULT_IOU: f32 = 0.45;
const YOLOV5_MAX_DETECTIONS: usize = 300;
const YOLOV5_PAD_VALUE: u8 = 114;
// cx, cy, w, h, objectness
const YOLOV5_BOX_FIELDS: usize = 5;

pub struct Yolov5 {
  session: Mutex<Session>,
  input_name: String,
  input_w: u32,
  input_h: u32,
  conf_threshold: f32,
  iou_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct Yolov5Builder {
  model_path: PathBuf,
  labels_path: Option<PathBuf>,
  font_path: Option<PathBuf>,
  conf_threshold: f32,
  iou_threshold: f32,
  threads: usize,
}

impl FromUrlWithScheme for Yolov5Builder {
  const SCHEME: &'static str = "yolov5";
}

fn parse_threshold(key: &str, value: &str) -> Result<f32, ModelLoadError> {
  let v: f32 = value
    .parse()
    .map_err(|_| ModelLoadError::InvalidParam(format!("{}={}", key, value)))?;
  if !(0.0..=1.0).contains(&v) {
    return Err(ModelLoadError::InvalidParam(format!(
      "{} 必须在 0.0 - 1.0 之间，实际为 {}",
      key, v
    )));
  }
  Ok(v)
}

impl FromUrl for Yolov5Builder {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelLoadError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = Yolov5Builder {
      model_path: url_to_path(url),
      labels_path: None,
      font_path: None,
      conf_threshold: YOLOV5_DEFAULT_CONF,
      iou_threshold: YOLOV5_DEFAULT_IOU,
      threads: 4,
    };

    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "conf" => builder.conf_threshold = parse_threshold("conf", &v)?,
        "iou" => builder.iou_threshold = parse_threshold("iou", &v)?,
        "labels" => builder.labels_path = Some(PathBuf::from(v.as_ref())),
        "threads" => {
          builder.threads = v
            .parse()
            .map_err(|_| ModelLoadError::InvalidParam(format!("threads={}", v)))?;
        }
        _ => debug!("忽略未知的模型参数: {}={}", k, v),
      }
    }

    Ok(builder)
  }
}

fn session_error<E: std::fmt::Display>(operation: &str) -> impl FnOnce(E) -> ModelLoadError + '_ {
  move |e| ModelLoadError::Session {
    operation: operation.to_string(),
    message: e.to_string(),
  }
}

impl Yolov5Builder {
  pub fn font(mut self, path: PathBuf) -> Self {
    self.font_path = Some(path);
    self
  }

  pub fn model_path(&self) -> &PathBuf {
    &self.model_path
  }

  pub fn build(self) -> Result<RenderingDetector<Yolov5>, ModelLoadError> {
    if !self.model_path.is_file() {
      return Err(ModelLoadError::ModelPathError(format!(
        "模型文件不存在: {}",
        self.model_path.display()
      )));
    }

    let labels = match self.labels_path.as_ref() {
      Some(path) => Labels::from_json_file(path)?,
      None => Labels::default(),
    };
    debug!("类别数量: {}", labels.len());

    let mut draw = Draw::default();
    if let Some(font) = self.font_path.as_ref() {
      draw = draw.with_font_file(font)?;
    }

    info!("加载模型文件: {}", self.model_path.display());
    let session = Session::builder()
      .map_err(session_error("创建会话构建器"))?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(session_error("设置优化级别"))?
      .with_intra_threads(self.threads)
      .map_err(session_error("设置线程数"))?
      .commit_from_file(&self.model_path)
      .map_err(session_error("读取模型文件"))?;

    if session.inputs.len() != 1 {
      error!("预期模型输入数量为 1, 实际为 {}", session.inputs.len());
      return Err(ModelLoadError::ModelInvalid(format!(
        "预期模型输入数量为 1, 实际为 {}",
        session.inputs.len()
      )));
    }
    if session.outputs.is_empty() {
      return Err(ModelLoadError::ModelInvalid("模型没有输出".to_string()));
    }

    let input = &session.inputs[0];
    let shape: Vec<i64> = input
      .input_type
      .tensor_shape()
      .map(|s| s.to_vec())
      .ok_or_else(|| ModelLoadError::ModelInvalid("模型输入不是张量".to_string()))?;
    if shape.len() != 4 || (shape[1] > 0 && shape[1] != 3) {
      return Err(ModelLoadError::ModelInvalid(format!(
        "预期输入形状为 [1, 3, H, W]，实际为 {:?}",
        shape
      )));
    }

    // 动态尺寸（-1）时使用默认输入大小
    let dim = |d: i64| if d > 0 { d as u32 } else { YOLOV5_DEFAULT_INPUT };
    let (input_h, input_w) = (dim(shape[2]), dim(shape[3]));
    let input_name = input.name.clone();
    debug!(
      "模型输入: {} {}x{}, 输出: {}",
      input_name, input_w, input_h, session.outputs[0].name
    );
    info!("模型加载完成");

    let name = format!(
      "yolov5:{}",
      self
        .model_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
    );

    let model = Yolov5 {
      session: Mutex::new(session),
      input_name,
      input_w,
      input_h,
      conf_threshold: self.conf_threshold,
      iou_threshold: self.iou_threshold,
    };

    Ok(RenderingDetector::new(name, model, labels, draw))
  }
}

impl Model for Yolov5 {
  type Input = RgbFrame;
  type Output = DetectResult;
  type Error = InferenceError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let letterbox = Letterbox::new(input.width(), input.height(), self.input_w, self.input_h);

    debug!("设置模型输入");
    let tensor = Tensor::from_array(letterbox.apply(input))?;

    let items = {
      let mut session = self
        .session
        .lock()
        .map_err(|_| InferenceError::SessionPoisoned)?;

      debug!("执行模型推理");
      let outputs = session.run(ort::inputs![self.input_name.as_str() => tensor])?;
      let output = outputs[0].try_extract_array::<f32>()?;
      debug!("模型输出形状: {:?}", output.shape());

      decode_output(output, self.conf_threshold, &letterbox)?
    };

    let items = nms(items, self.iou_threshold);
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}

/// 保持长宽比缩放到模型输入尺寸，其余部分用灰色填充
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
  scale: f32,
  pad_x: u32,
  pad_y: u32,
  new_w: u32,
  new_h: u32,
  src_w: u32,
  src_h: u32,
  dst_w: u32,
  dst_h: u32,
}

impl Letterbox {
  pub(crate) fn new(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Self {
    let scale = (dst_w as f32 / src_w.max(1) as f32).min(dst_h as f32 / src_h.max(1) as f32);
    let new_w = ((src_w as f32 * scale).round() as u32).clamp(1, dst_w);
    let new_h = ((src_h as f32 * scale).round() as u32).clamp(1, dst_h);
    Self {
      scale,
      pad_x: (dst_w - new_w) / 2,
      pad_y: (dst_h - new_h) / 2,
      new_w,
      new_h,
      src_w,
      src_h,
      dst_w,
      dst_h,
    }
  }

  fn resized_dimensions(&self) -> (u32, u32) {
    (self.new_w, self.new_h)
  }

  /// 生成 [1, 3, H, W]、取值 0 - 1 的输入张量
  pub(crate) fn apply(&self, frame: &RgbFrame) -> Array4<f32> {
    let (new_w, new_h) = self.resized_dimensions();
    let resized = image::imageops::resize(
      &frame.to_rgb_image(),
      new_w,
      new_h,
      FilterType::Triangle,
    );

    let mut canvas = RgbImage::from_pixel(self.dst_w, self.dst_h, Rgb([YOLOV5_PAD_VALUE; 3]));
    image::imageops::overlay(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);

    Array4::from_shape_fn(
      (1, 3, self.dst_h as usize, self.dst_w as usize),
      |(_, c, y, x)| canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
    )
  }

  /// 模型坐标映射回原图，并归一化到 0 - 1
  pub(crate) fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
    let sx = (x - self.pad_x as f32) / self.scale;
    let sy = (y - self.pad_y as f32) / self.scale;
    (
      (sx / self.src_w.max(1) as f32).clamp(0.0, 1.0),
      (sy / self.src_h.max(1) as f32).clamp(0.0, 1.0),
    )
  }
}

/// 解析 [1, N, 5 + C] 的输出
pub(crate) fn decode_output(
  output: ArrayViewD<f32>,
  conf_threshold: f32,
  letterbox: &Letterbox,
) -> Result<Vec<DetectItem>, InferenceError> {
  let shape = output.shape().to_vec();
  if shape.len() != 3 || shape[0] != 1 || shape[2] <= YOLOV5_BOX_FIELDS {
    return Err(InferenceError::UnexpectedOutput(format!(
      "预期输出形状为 [1, N, 5 + C]，实际为 {:?}",
      shape
    )));
  }

  let rows: ArrayView2<f32> = output.index_axis_move(Axis(0), 0).into_dimensionality::<Ix2>()?;
  Ok(decode_rows(rows, conf_threshold, letterbox))
}

pub(crate) fn decode_rows(
  rows: ArrayView2<f32>,
  conf_threshold: f32,
  letterbox: &Letterbox,
) -> Vec<DetectItem> {
  let mut items = Vec::new();

  for row in rows.outer_iter() {
    let objectness = row[4];
    if objectness < conf_threshold {
      continue;
    }

    // 找到最高类别分数
    let (class_id, class_score) = row
      .iter()
      .skip(YOLOV5_BOX_FIELDS)
      .enumerate()
      .fold((0usize, f32::MIN), |best, (i, &s)| {
        if s > best.1 { (i, s) } else { best }
      });

    let score = objectness * class_score;
    if score < conf_threshold {
      continue;
    }

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    let (x_min, y_min) = letterbox.to_source(cx - w / 2.0, cy - h / 2.0);
    let (x_max, y_max) = letterbox.to_source(cx + w / 2.0, cy + h / 2.0);

    if x_max <= x_min || y_max <= y_min {
      continue;
    }

    items.push(DetectItem {
      class_id: class_id as u32,
      score,
      bbox: [x_min, y_min, x_max, y_max],
    });
  }

  items
}

/// 按类别进行的非极大值抑制
pub(crate) fn nms(mut items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  // 按置信度降序排序
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result: Vec<DetectItem> = Vec::new();
  for item in items {
    let suppressed = result
      .iter()
      .any(|kept| kept.class_id == item.class_id && iou(&kept.bbox, &item.bbox) >= iou_threshold);
    if !suppressed {
      result.push(item);
      if result.len() >= YOLOV5_MAX_DETECTIONS {
        break;
      }
    }
  }

  result
}

/// 计算两个边界框的 IoU
pub(crate) fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}
