// 该文件是 Huishou （回收） 项目的一部分。
// src/main.rs - 网页服务主程序
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

mod args;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use huishou::{
  FromUrl,
  model::DetectorProvider,
  output::ResultPersister,
  server::{self, AppState},
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型地址: {}", args.model);
  info!("输出路径: {}", args.output);
  info!("监听地址: {}", args.listen);
  if let Some(font) = args.font.as_ref() {
    info!("标签字体: {}", font.display());
  }

  let persister = ResultPersister::from_url(&args.output)?;
  let provider = DetectorProvider::from_model_url(args.model.clone(), args.font.clone());
  let state = AppState::new(Arc::new(provider), Arc::new(persister));

  server::serve(args.listen, state, args.max_upload_bytes()).await?;

  Ok(())
}
