use std::{
  io::Cursor,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use huishou::{
  frame::RgbFrame,
  input::UploadedImage,
  model::{Detection, DetectionResult, Detector, InferenceError},
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// Detector that ignores its input apart from the size and returns a fixed
/// annotated image: a green square in the middle of a gray canvas.
pub struct StubDetector {
  calls: AtomicUsize,
}

impl StubDetector {
  pub fn new() -> Self {
    Self {
      calls: AtomicUsize::new(0),
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn annotated_for(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
      let inside = x >= width / 4 && x < width * 3 / 4 && y >= height / 4 && y < height * 3 / 4;
      if inside {
        Rgb([0, 200, 0])
      } else {
        Rgb([128, 128, 128])
      }
    })
  }
}

impl Detector for StubDetector {
  fn name(&self) -> &str {
    "stub"
  }

  fn detect(&self, frame: &RgbFrame) -> Result<DetectionResult, InferenceError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    Ok(DetectionResult {
      annotated: RgbFrame::from(Self::annotated_for(frame.width(), frame.height())),
      detections: vec![Detection {
        class_id: 1,
        label: "Plastic".to_string(),
        score: 0.91,
        bbox: [0.25, 0.25, 0.75, 0.75],
      }],
    })
  }
}

/// Detector that always fails at inference time.
pub struct FailingDetector;

impl Detector for FailingDetector {
  fn name(&self) -> &str {
    "failing"
  }

  fn detect(&self, _frame: &RgbFrame) -> Result<DetectionResult, InferenceError> {
    Err(InferenceError::UnexpectedOutput("no output tensor".to_string()))
  }
}

pub fn shared_stub() -> Arc<StubDetector> {
  Arc::new(StubDetector::new())
}

pub fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
  let mut buf = Cursor::new(Vec::new());
  DynamicImage::ImageRgb8(image.clone())
    .write_to(&mut buf, format)
    .expect("Failed to encode test image");
  buf.into_inner()
}

/// 100x100 black PNG.
pub fn black_png() -> Vec<u8> {
  encode(&RgbImage::new(100, 100), ImageFormat::Png)
}

pub fn black_jpeg() -> Vec<u8> {
  encode(&RgbImage::new(100, 100), ImageFormat::Jpeg)
}

pub fn png_upload(name: &str) -> UploadedImage {
  UploadedImage::new(name, Some("image/png".to_string()), black_png())
}

/// Encodes the image the same way the persister does and decodes it again.
pub fn jpeg_round_trip(image: &RgbImage, quality: u8) -> RgbImage {
  let mut bytes = Vec::new();
  image
    .write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(
      &mut bytes, quality,
    ))
    .expect("Failed to encode JPEG");
  image::load_from_memory(&bytes)
    .expect("Failed to decode JPEG")
    .into_rgb8()
}

pub fn artifacts_in(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
  let mut files: Vec<_> = std::fs::read_dir(dir)
    .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
    .unwrap_or_default();
  files.sort();
  files
}
