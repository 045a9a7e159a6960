// 该文件是 Huishou （回收） 项目的一部分。
// src/model/provider.rs - 检测器提供者
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
  path::PathBuf,
  sync::{Arc, Mutex},
};

use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl,
  model::{Detector, ModelLoadError, Yolov5Builder},
};

type Loader = Box<dyn Fn() -> Result<Arc<dyn Detector>, ModelLoadError> + Send + Sync>;

/// 按需加载检测器，并在之后的调用中复用同一个实例。
///
/// 在启动时构造一次，以引用的方式交给流水线使用。
/// 加载失败不会被缓存，下一次调用会重新尝试。
pub struct DetectorProvider {
  loader: Loader,
  cached: Mutex<Option<Arc<dyn Detector>>>,
}

impl DetectorProvider {
  pub fn new<F>(loader: F) -> Self
  where
    F: Fn() -> Result<Arc<dyn Detector>, ModelLoadError> + Send + Sync + 'static,
  {
    Self {
      loader: Box::new(loader),
      cached: Mutex::new(None),
    }
  }

  /// 由模型 URL 构造，例如 `yolov5:///models/best.onnx?conf=0.3`
  pub fn from_model_url(url: Url, font: Option<PathBuf>) -> Self {
    Self::new(move || {
      let mut builder = Yolov5Builder::from_url(&url)?;
      if let Some(font) = font.as_ref() {
        builder = builder.font(font.clone());
      }
      let detector = builder.build()?;
      Ok(Arc::new(detector) as Arc<dyn Detector>)
    })
  }

  /// 获取检测器。加载至多发生一次，之后返回同一个实例。
  pub fn get_detector(&self) -> Result<Arc<dyn Detector>, ModelLoadError> {
    // 加载期间持有锁，并发的首次调用只会触发一次加载
    let mut cached = self
      .cached
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(detector) = cached.as_ref() {
      debug!("复用已加载的检测器: {}", detector.name());
      return Ok(detector.clone());
    }

    info!("正在加载检测器...");
    match (self.loader)() {
      Ok(detector) => {
        info!("检测器加载完成: {}", detector.name());
        *cached = Some(detector.clone());
        Ok(detector)
      }
      Err(e) => {
        error!("检测器加载失败: {}", e);
        Err(e)
      }
    }
  }

  pub fn is_loaded(&self) -> bool {
    self
      .cached
      .lock()
      .map(|cached| cached.is_some())
      .unwrap_or(false)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;
  use crate::{
    frame::RgbFrame,
    model::{DetectionResult, InferenceError},
  };

  struct Echo;

  impl Detector for Echo {
    fn name(&self) -> &str {
      "echo"
    }

    fn detect(&self, frame: &RgbFrame) -> Result<DetectionResult, InferenceError> {
      Ok(DetectionResult {
        annotated: frame.clone(),
        detections: Vec::new(),
      })
    }
  }

  #[test]
  fn loads_once_and_returns_same_instance() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let provider = DetectorProvider::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(Arc::new(Echo) as Arc<dyn Detector>)
    });

    assert!(!provider.is_loaded());
    let first = provider.get_detector().unwrap();
    let second = provider.get_detector().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(provider.is_loaded());
  }

  #[test]
  fn failed_load_is_not_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let provider = DetectorProvider::new(move || {
      if counter.fetch_add(1, Ordering::SeqCst) == 0 {
        Err(ModelLoadError::ModelPathError("missing".into()))
      } else {
        Ok(Arc::new(Echo) as Arc<dyn Detector>)
      }
    });

    assert!(provider.get_detector().is_err());
    assert!(provider.get_detector().is_ok());
    assert!(provider.get_detector().is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn concurrent_first_calls_load_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let provider = Arc::new(DetectorProvider::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
      std::thread::sleep(std::time::Duration::from_millis(20));
      Ok(Arc::new(Echo) as Arc<dyn Detector>)
    }));

    let handles: Vec<_> = (0..4)
      .map(|_| {
        let provider = provider.clone();
        std::thread::spawn(move || provider.get_detector().map(|_| ()).is_ok())
      })
      .collect();
    for handle in handles {
      assert!(handle.join().unwrap());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn missing_model_file() {
    let url = Url::parse("yolov5:///definitely/not/here.onnx").unwrap();
    let provider = DetectorProvider::from_model_url(url, None);
    assert!(matches!(
      provider.get_detector(),
      Err(ModelLoadError::ModelPathError(_))
    ));
  }
}
