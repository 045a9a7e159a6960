// 该文件是 Huishou （回收） 项目的一部分。
// src/output/export.rs - 结果展示与下载
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

use crate::{frame::RgbFrame, model::Detection, output::PersistedArtifact};

pub const DOWNLOAD_MIME: &str = "image/jpeg";
const DOWNLOAD_PREFIX: &str = "processed_";

/// 下载文件名：`processed_<上传文件名>`
///
/// 只保留上传文件名的最后一段，并去掉会破坏响应头的字符。
pub fn download_name(upload_name: &str) -> String {
  let base = upload_name
    .rsplit(['/', '\\'])
    .next()
    .unwrap_or(upload_name);
  let cleaned: String = base
    .chars()
    .filter(|c| !c.is_control() && *c != '"')
    .collect();
  let cleaned = if cleaned.is_empty() {
    "image.jpg".to_string()
  } else {
    cleaned
  };
  format!("{}{}", DOWNLOAD_PREFIX, cleaned)
}

/// 提供给用户下载的内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPayload {
  pub file_name: String,
  pub mime: &'static str,
  pub bytes: Vec<u8>,
}

impl DownloadPayload {
  /// 读取已经保存的结果文件
  pub fn read(path: &Path, upload_name: &str) -> std::io::Result<Self> {
    Ok(Self {
      file_name: download_name(upload_name),
      mime: DOWNLOAD_MIME,
      bytes: std::fs::read(path)?,
    })
  }
}

/// 一次成功运行后展示给用户的内容：原图、标注图、保存路径与下载信息
#[derive(Debug, Clone)]
pub struct Presentation {
  pub original: RgbFrame,
  pub annotated: RgbFrame,
  pub detections: Vec<Detection>,
  pub artifact: PersistedArtifact,
  pub upload_name: String,
}

impl Presentation {
  pub fn output_path(&self) -> &Path {
    &self.artifact.path
  }

  pub fn download_name(&self) -> String {
    download_name(&self.upload_name)
  }

  pub fn download_payload(&self) -> std::io::Result<DownloadPayload> {
    DownloadPayload::read(&self.artifact.path, &self.upload_name)
  }
}
