// 该文件是 Huishou （回收） 项目的一部分。
// src/server.rs - 网页服务
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

mod page;
pub use self::page::escape_html;

use std::{net::SocketAddr, sync::Arc};

use axum::{
  Json, Router,
  extract::{DefaultBodyLimit, Multipart, Path, Query, State, multipart::MultipartError},
  http::{HeaderValue, StatusCode, header},
  response::{Html, IntoResponse, Response},
  routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::{
  input::UploadedImage,
  model::{Detector, DetectorProvider, ModelLoadError},
  output::{DownloadPayload, ResultPersister},
  pipeline::{Pipeline, Stage},
};

/// 上传表单中的文件字段名
pub const UPLOAD_FIELD: &str = "file";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ServerError {
  #[error("模型加载失败: {0}")]
  ModelLoad(#[from] ModelLoadError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("后台任务异常退出: {0}")]
  Join(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct AppState {
  provider: Arc<DetectorProvider>,
  persister: Arc<ResultPersister>,
}

impl AppState {
  pub fn new(provider: Arc<DetectorProvider>, persister: Arc<ResultPersister>) -> Self {
    Self {
      provider,
      persister,
    }
  }
}

pub fn create_app(state: AppState, max_upload_bytes: usize) -> Router {
  Router::new()
    .route("/", get(index_handler))
    .route("/detect", post(detect_handler))
    .route("/download/:file", get(download_handler))
    .route("/health", get(health_handler))
    .layer(DefaultBodyLimit::max(max_upload_bytes))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// 加载模型并开始监听。模型加载失败时不会开始接受上传。
pub async fn serve(
  addr: SocketAddr,
  state: AppState,
  max_upload_bytes: usize,
) -> Result<(), ServerError> {
  let provider = state.provider.clone();
  let detector = tokio::task::spawn_blocking(move || provider.get_detector()).await??;
  info!("检测器就绪: {}", detector.name());

  let app = create_app(state, max_upload_bytes);
  let listener = tokio::net::TcpListener::bind(addr).await?;
  info!("网页服务监听于 http://{}", listener.local_addr()?);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  info!("网页服务已退出");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!("无法监听中断信号: {}", e);
    return;
  }
  info!("收到中断信号，准备退出...");
}

async fn index_handler() -> Html<String> {
  Html(page::upload_page())
}

async fn health_handler(State(state): State<AppState>) -> Response {
  if !state.provider.is_loaded() {
    return (
      StatusCode::SERVICE_UNAVAILABLE,
      Json(json!({ "status": "loading" })),
    )
      .into_response();
  }

  match state.provider.get_detector() {
    Ok(detector) => Json(json!({ "status": "ok", "model": detector.name() })).into_response(),
    Err(e) => {
      error!("检测器不可用: {}", e);
      (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "status": "unavailable" })),
      )
        .into_response()
    }
  }
}

async fn detect_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
  let upload = match read_upload(&mut multipart).await {
    Ok(Some(upload)) => upload,
    Ok(None) => {
      return error_response(
        StatusCode::BAD_REQUEST,
        Stage::Idle,
        "Please choose an image to upload.",
        None,
      );
    }
    Err(e) => {
      warn!("读取上传内容失败: {}", e);
      return error_response(e.status(), Stage::Idle, "The upload could not be read.", None);
    }
  };

  let detector = match state.provider.get_detector() {
    Ok(detector) => detector,
    Err(e) => {
      error!("检测器不可用: {}", e);
      return error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        Stage::Inferring,
        "The detection model is not available.",
        None,
      );
    }
  };

  let persister = state.persister.clone();
  match tokio::task::spawn_blocking(move || run_detection(detector.as_ref(), &persister, upload))
    .await
  {
    Ok(response) => response,
    Err(e) => {
      error!("处理任务异常退出: {}", e);
      error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        Stage::Idle,
        "Something went wrong while processing the image.",
        None,
      )
    }
  }
}

async fn read_upload(multipart: &mut Multipart) -> Result<Option<UploadedImage>, MultipartError> {
  while let Some(field) = multipart.next_field().await? {
    if field.name() != Some(UPLOAD_FIELD) {
      debug!("忽略表单字段: {:?}", field.name());
      continue;
    }

    let name = field.file_name().unwrap_or("image").to_string();
    let mime = field.content_type().map(str::to_string);
    let bytes = field.bytes().await?;
    return Ok(Some(UploadedImage::new(name, mime, bytes.to_vec())));
  }
  Ok(None)
}

/// 在阻塞线程上运行一次流水线并生成页面
fn run_detection(
  detector: &dyn Detector,
  persister: &ResultPersister,
  upload: UploadedImage,
) -> Response {
  let err = match Pipeline::new(detector, persister).run(upload) {
    Ok(presentation) => {
      return match page::result_page(&presentation) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
          error!("生成预览失败: {}", e);
          error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            Stage::Displaying,
            "The result could not be displayed.",
            None,
          )
        }
      };
    }
    Err(err) => err,
  };

  let status = match err.stage() {
    Stage::Decoding => StatusCode::BAD_REQUEST,
    _ => StatusCode::INTERNAL_SERVER_ERROR,
  };
  let unsaved = err.unsaved_result().and_then(|(original, result)| {
    let original = page::preview_uri(original).ok()?;
    let annotated = page::preview_uri(&result.annotated).ok()?;
    Some((original, annotated))
  });
  error_response(
    status,
    err.stage(),
    err.user_message(),
    unsaved.as_ref().map(|(o, a)| (o.as_str(), a.as_str())),
  )
}

fn error_response(
  status: StatusCode,
  stage: Stage,
  message: &str,
  unsaved: Option<(&str, &str)>,
) -> Response {
  (status, Html(page::error_page(stage, message, unsaved))).into_response()
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
  name: Option<String>,
}

async fn download_handler(
  State(state): State<AppState>,
  Path(file): Path<String>,
  Query(query): Query<DownloadQuery>,
) -> Response {
  let Some(path) = state.persister.artifact_path(&file) else {
    warn!("拒绝下载请求: {}", file);
    return (StatusCode::BAD_REQUEST, "invalid file name").into_response();
  };
  let upload_name = query.name.unwrap_or_else(|| file.clone());

  let payload = match tokio::task::spawn_blocking(move || DownloadPayload::read(&path, &upload_name)).await {
    Ok(Ok(payload)) => payload,
    Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
      return (StatusCode::NOT_FOUND, "not found").into_response();
    }
    Ok(Err(e)) => {
      error!("读取结果文件失败 {}: {}", file, e);
      return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Err(e) => {
      error!("读取任务异常退出: {}", e);
      return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
  };

  (
    StatusCode::OK,
    [
      (header::CONTENT_TYPE, HeaderValue::from_static(payload.mime)),
      (
        header::CONTENT_DISPOSITION,
        content_disposition(&payload.file_name),
      ),
    ],
    payload.bytes,
  )
    .into_response()
}

/// `attachment` 响应头，非 ASCII 文件名另外以 RFC 5987 形式给出
fn content_disposition(file_name: &str) -> HeaderValue {
  let ascii: String = file_name
    .chars()
    .map(|c| {
      if c.is_ascii_graphic() || c == ' ' {
        c
      } else {
        '_'
      }
    })
    .collect();
  let value = format!(
    "attachment; filename=\"{}\"; filename*=UTF-8''{}",
    ascii,
    urlencoding::encode(file_name)
  );
  HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
