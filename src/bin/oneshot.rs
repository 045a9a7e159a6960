// 该文件是 Huishou （回收） 项目的一部分。
// src/bin/oneshot.rs - 单张图像检测
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use huishou::{
  FromUrl,
  input::ImageFileInput,
  model::DetectorProvider,
  output::ResultPersister,
  task::{OneShotTask, Task},
};

/// 检测一张本地图像并保存结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像，例如 image:///tmp/bottle.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, default_value = "folder://runs", value_name = "OUTPUT")]
  pub output: Url,
  /// 标签字体
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = ImageFileInput::from_url(&args.input)?;
  let persister = ResultPersister::from_url(&args.output)?;
  let provider = DetectorProvider::from_model_url(args.model, args.font);
  let detector = provider.get_detector()?;

  let presentation = OneShotTask.run_task(input, detector.as_ref(), &persister)?;
  for d in &presentation.detections {
    info!(
      "  - {}: {:.2}% [{:.3}, {:.3}, {:.3}, {:.3}]",
      d.label,
      d.score * 100.0,
      d.bbox[0],
      d.bbox[1],
      d.bbox[2],
      d.bbox[3]
    );
  }
  info!("结果已保存: {}", presentation.output_path().display());

  Ok(())
}
