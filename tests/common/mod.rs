#![allow(dead_code, unused_imports)]

mod fixtures;
pub use fixtures::*;

pub use huishou::{
  frame::RgbFrame,
  input::UploadedImage,
  model::{Detection, DetectionResult, Detector, DetectorProvider, InferenceError},
  output::{NamingScheme, ResultPersister},
};
