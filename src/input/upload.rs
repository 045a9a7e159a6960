// 该文件是 Huishou （回收） 项目的一部分。
// src/input/upload.rs - 上传图像的解码
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

use image::ImageFormat;
use thiserror::Error;
use tracing::debug;

use crate::frame::RgbFrame;

pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
pub const ACCEPTED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];

// 浏览器无法判断类型时会发送这个，视同未声明
const UNDECLARED_MIME: &str = "application/octet-stream";

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("上传内容为空")]
  Empty,
  #[error("不支持的文件类型: {0}")]
  UnsupportedType(String),
  #[error("不支持的图像格式: {0}")]
  UnsupportedFormat(String),
  #[error("图像数据损坏: {0}")]
  Malformed(#[from] image::ImageError),
}

/// 一次上传的原始内容，只在一次运行中存在，解码后即被丢弃。
#[derive(Debug, Clone)]
pub struct UploadedImage {
  name: String,
  mime: Option<String>,
  bytes: Vec<u8>,
}

impl UploadedImage {
  pub fn new(name: impl Into<String>, mime: Option<String>, bytes: Vec<u8>) -> Self {
    Self {
      name: name.into(),
      mime,
      bytes,
    }
  }

  /// 上传时的文件名
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn mime(&self) -> Option<&str> {
    self.mime.as_deref()
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  /// 检查声明的扩展名与 MIME 类型，未声明的部分不检查
  pub fn check_declared_type(&self) -> Result<(), DecodeError> {
    if let Some(ext) = Path::new(&self.name).extension().and_then(|e| e.to_str()) {
      let ext = ext.to_lowercase();
      if !ACCEPTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(DecodeError::UnsupportedType(format!("扩展名 .{}", ext)));
      }
    }

    if let Some(mime) = self.mime.as_deref() {
      let mime = mime.to_lowercase();
      if mime != UNDECLARED_MIME && !ACCEPTED_MIME_TYPES.contains(&mime.as_str()) {
        return Err(DecodeError::UnsupportedType(mime));
      }
    }

    Ok(())
  }

  /// 消费上传内容，得到规范图像
  pub fn decode(self) -> Result<RgbFrame, DecodeError> {
    self.check_declared_type()?;
    decode(&self.bytes)
  }
}

/// 将 JPEG / PNG 字节流解码为三通道 RGB 图像。
///
/// 实际格式由内容判断；透明通道被丢弃，灰度图被扩展为 RGB。
pub fn decode(raw: &[u8]) -> Result<RgbFrame, DecodeError> {
  if raw.is_empty() {
    return Err(DecodeError::Empty);
  }

  let format = image::guess_format(raw)
    .map_err(|_| DecodeError::UnsupportedFormat("无法识别".to_string()))?;
  if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
    return Err(DecodeError::UnsupportedFormat(format!("{:?}", format)));
  }

  let image = image::load_from_memory_with_format(raw, format)?;
  debug!(
    "解码 {:?} 图像: {}x{}, 颜色类型 {:?}",
    format,
    image.width(),
    image.height(),
    image.color()
  );

  Ok(RgbFrame::from(image.into_rgb8()))
}
