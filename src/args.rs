// 该文件是 Huishou （回收） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use url::Url;

/// Huishou 垃圾检测网页服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 yolov5:///models/best.onnx?conf=0.25&iou=0.45
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 结果保存目录，例如 folder://runs 或 folder:///var/lib/huishou?unique
  #[arg(long, default_value = "folder://runs", value_name = "OUTPUT")]
  pub output: Url,

  /// 监听地址
  #[arg(long, default_value = "127.0.0.1:8501", value_name = "ADDR")]
  pub listen: SocketAddr,

  /// 标签文字使用的 TTF/OTF 字体，不指定时只画框
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 单次上传的大小上限（MB）
  #[arg(long, default_value = "20", value_name = "MB")]
  pub max_upload_mb: usize,
}

impl Args {
  pub fn max_upload_bytes(&self) -> usize {
    self.max_upload_mb.saturating_mul(1024 * 1024)
  }
}
