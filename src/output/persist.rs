// 该文件是 Huishou （回收） 项目的一部分。
// src/output/persist.rs - 标注结果保存
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

use std::{
  fmt,
  path::{Path, PathBuf},
  sync::atomic::{AtomicU32, Ordering},
};

use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::ToRgbImage,
  model::DetectionResult,
  url_to_path,
};

pub const ARTIFACT_PREFIX: &str = "waste_detect_";
const ARTIFACT_EXTENSION: &str = "jpg";
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum PersistenceError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数无效: {0}")]
  InvalidParam(String),
  #[error("无法创建目录 {path}: {source}")]
  CreateDir {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("图像编码错误: {0}")]
  Encode(#[from] image::ImageError),
  #[error("无法写入文件 {path}: {source}")]
  Write {
    path: PathBuf,
    source: std::io::Error,
  },
}

/// 文件命名方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingScheme {
  /// 只用秒级时间戳，同一秒内的两次运行会写到同一个文件
  #[default]
  Second,
  /// 时间戳后追加进程内递增的计数
  Counter,
}

/// 一次运行的标识，由时间戳生成
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
  pub fn from_time(now: &DateTime<Local>) -> Self {
    RunId(now.format(TIMESTAMP_FORMAT).to_string())
  }

  pub fn with_counter(now: &DateTime<Local>, counter: u32) -> Self {
    RunId(format!("{}-{:04X}", now.format(TIMESTAMP_FORMAT), counter))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn file_name(&self) -> String {
    format!("{}{}.{}", ARTIFACT_PREFIX, self.0, ARTIFACT_EXTENSION)
  }
}

impl fmt::Display for RunId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// 已写入磁盘的标注图像，创建后不再修改
#[derive(Debug, Clone)]
pub struct PersistedArtifact {
  pub run_id: RunId,
  pub path: PathBuf,
  pub bytes: Vec<u8>,
}

impl PersistedArtifact {
  pub fn file_name(&self) -> String {
    self.run_id.file_name()
  }
}

pub struct ResultPersister {
  directory: PathBuf,
  naming: NamingScheme,
  quality: u8,
  counter: AtomicU32,
}

impl FromUrlWithScheme for ResultPersister {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ResultPersister {
  type Error = PersistenceError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(PersistenceError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let mut persister = ResultPersister::new(url_to_path(uri));
    for (k, v) in uri.query_pairs() {
      match k.as_ref() {
        "unique" => persister.naming = NamingScheme::Counter,
        "quality" => {
          let quality = v
            .parse::<u8>()
            .ok()
            .filter(|q| (1..=100).contains(q))
            .ok_or_else(|| PersistenceError::InvalidParam(format!("quality={}", v)))?;
          persister.quality = quality;
        }
        _ => debug!("忽略未知的输出参数: {}={}", k, v),
      }
    }

    Ok(persister)
  }
}

impl ResultPersister {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      naming: NamingScheme::default(),
      quality: DEFAULT_JPEG_QUALITY,
      counter: AtomicU32::new(0),
    }
  }

  pub fn with_naming(mut self, naming: NamingScheme) -> Self {
    self.naming = naming;
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn naming(&self) -> NamingScheme {
    self.naming
  }

  fn run_id(&self, now: &DateTime<Local>) -> RunId {
    match self.naming {
      NamingScheme::Second => RunId::from_time(now),
      NamingScheme::Counter => {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        RunId::with_counter(now, counter)
      }
    }
  }

  /// 以当前时间命名，保存标注图像
  pub fn persist(&self, result: &DetectionResult) -> Result<PersistedArtifact, PersistenceError> {
    self.persist_at(result, Local::now())
  }

  pub fn persist_at(
    &self,
    result: &DetectionResult,
    now: DateTime<Local>,
  ) -> Result<PersistedArtifact, PersistenceError> {
    let run_id = self.run_id(&now);

    std::fs::create_dir_all(&self.directory).map_err(|source| PersistenceError::CreateDir {
      path: self.directory.clone(),
      source,
    })?;

    let image = result.annotated.to_rgb_image();
    let mut bytes = Vec::new();
    image.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, self.quality))?;

    let path = self.directory.join(run_id.file_name());
    std::fs::write(&path, &bytes).map_err(|source| PersistenceError::Write {
      path: path.clone(),
      source,
    })?;

    info!("保存图像到文件: {} ({} 字节)", path.display(), bytes.len());

    Ok(PersistedArtifact {
      run_id,
      path,
      bytes,
    })
  }

  /// 按文件名找到输出目录中的结果文件，只接受本模块生成的文件名
  pub fn artifact_path(&self, file_name: &str) -> Option<PathBuf> {
    is_artifact_name(file_name).then(|| self.directory.join(file_name))
  }
}

fn is_artifact_name(file_name: &str) -> bool {
  let Some(stem) = file_name
    .strip_prefix(ARTIFACT_PREFIX)
    .and_then(|rest| rest.strip_suffix(".jpg"))
  else {
    return false;
  };

  !stem.is_empty() && stem.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::frame::RgbFrame;

  fn result() -> DetectionResult {
    DetectionResult {
      annotated: RgbFrame::with_shape(8, 8),
      detections: Vec::new(),
    }
  }

  fn fixed_time() -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap()
  }

  #[test]
  fn file_name_pattern() {
    let id = RunId::from_time(&fixed_time());
    assert_eq!(id.as_str(), "20260314-150926");
    assert_eq!(id.file_name(), "waste_detect_20260314-150926.jpg");

    let id = RunId::with_counter(&fixed_time(), 26);
    assert_eq!(id.file_name(), "waste_detect_20260314-150926-001A.jpg");
  }

  #[test]
  fn creates_nested_directory() {
    let dir = tempfile::tempdir().unwrap();
    let persister = ResultPersister::new(dir.path().join("a").join("runs"));

    let artifact = persister.persist_at(&result(), fixed_time()).unwrap();
    assert!(artifact.path.is_file());
    assert_eq!(std::fs::read(&artifact.path).unwrap(), artifact.bytes);
    // 目录已存在时再次保存
    assert!(persister.persist(&result()).is_ok());
  }

  #[test]
  fn directory_blocked_by_file() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("runs");
    std::fs::write(&blocker, b"").unwrap();

    let persister = ResultPersister::new(&blocker);
    assert!(matches!(
      persister.persist(&result()),
      Err(PersistenceError::CreateDir { .. })
    ));
  }

  #[test]
  fn url_options() {
    let url = Url::parse("folder://runs?unique&quality=75").unwrap();
    let persister = ResultPersister::from_url(&url).unwrap();
    assert_eq!(persister.directory(), Path::new("runs"));
    assert_eq!(persister.naming(), NamingScheme::Counter);
    assert_eq!(persister.quality, 75);

    let url = Url::parse("folder://runs?quality=0").unwrap();
    assert!(ResultPersister::from_url(&url).is_err());

    let url = Url::parse("image:///tmp/a.jpg").unwrap();
    assert!(matches!(
      ResultPersister::from_url(&url),
      Err(PersistenceError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn artifact_names_are_validated() {
    let persister = ResultPersister::new("runs");
    assert!(
      persister
        .artifact_path("waste_detect_20260314-150926.jpg")
        .is_some()
    );
    assert!(
      persister
        .artifact_path("waste_detect_20260314-150926-001A.jpg")
        .is_some()
    );
    assert!(persister.artifact_path("../secret.jpg").is_none());
    assert!(
      persister
        .artifact_path("waste_detect_../../etc/passwd.jpg")
        .is_none()
    );
    assert!(persister.artifact_path("waste_detect_.jpg").is_none());
  }
}
