// 该文件是 Huishou （回收） 项目的一部分。
// src/server/page.rs - 网页模板
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

use std::fmt::Write as _;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::codecs::jpeg::JpegEncoder;

use crate::{
  frame::{RgbFrame, ToRgbImage},
  model::Detection,
  output::{DOWNLOAD_MIME, Presentation},
  pipeline::Stage,
};

const TITLE: &str = "Waste Detection";
const PREVIEW_QUALITY: u8 = 85;

const STYLE: &str = r#"
body { font-family: sans-serif; max-width: 1100px; margin: 2em auto; padding: 0 1em; color: #222; }
h1 { font-size: 1.6em; }
.panels { display: flex; gap: 1em; flex-wrap: wrap; }
.panel { flex: 1 1 400px; }
.panel img { max-width: 100%; border: 1px solid #ccc; }
.notice { padding: .6em 1em; border-radius: 4px; margin: 1em 0; }
.success { background: #e6f4ea; border: 1px solid #8bc79a; }
.error { background: #fdecea; border: 1px solid #e0a39b; }
.warning { background: #fff7e0; border: 1px solid #e5c76b; }
#progress { display: none; margin-top: 1em; }
.spinner { display: inline-block; width: 1em; height: 1em; border: 3px solid #ccc;
  border-top-color: #2a7; border-radius: 50%; animation: spin 1s linear infinite; vertical-align: middle; }
@keyframes spin { to { transform: rotate(360deg); } }
"#;

/// 转义用户提供的文本，防止注入 HTML
pub fn escape_html(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      _ => out.push(c),
    }
  }
  out
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
  format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// 把图像编码为 JPEG 以便在页面内联显示
pub fn preview_uri(frame: &RgbFrame) -> Result<String, image::ImageError> {
  let mut bytes = Vec::new();
  frame
    .to_rgb_image()
    .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, PREVIEW_QUALITY))?;
  Ok(data_uri(DOWNLOAD_MIME, &bytes))
}

fn layout(body: &str) -> String {
  format!(
    "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
     <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
     <title>{title}</title>\n<style>{style}</style>\n</head>\n<body>\n\
     <h1>{title}</h1>\n{body}\n</body>\n</html>\n",
    title = TITLE,
    style = STYLE,
    body = body
  )
}

pub fn upload_page() -> String {
  layout(
    r#"<p>Upload a photo of waste items. The detector marks each item it finds and saves the result.</p>
<form id="upload" action="/detect" method="post" enctype="multipart/form-data">
  <input type="file" name="file" accept=".jpg,.jpeg,.png,image/jpeg,image/png" required>
  <button type="submit">Detect</button>
</form>
<div id="progress"><span class="spinner"></span> Detecting waste items...</div>
<script>
document.getElementById("upload").addEventListener("submit", function () {
  document.getElementById("progress").style.display = "block";
  this.querySelector("button").disabled = true;
});
</script>"#,
  )
}

fn detection_list(detections: &[Detection]) -> String {
  if detections.is_empty() {
    return "<p>No waste items detected.</p>".to_string();
  }

  let mut out = String::from("<ul class=\"detections\">\n");
  for d in detections {
    let _ = writeln!(
      out,
      "<li>{} {:.2}</li>",
      escape_html(&d.label),
      d.score
    );
  }
  out.push_str("</ul>");
  out
}

fn panels(original_uri: &str, annotated_uri: &str) -> String {
  format!(
    "<div class=\"panels\">\n\
     <div class=\"panel\"><h2>Original Image</h2><img src=\"{}\" alt=\"Original Image\"></div>\n\
     <div class=\"panel\"><h2>Detected Waste Items</h2><img src=\"{}\" alt=\"Detected Waste Items\"></div>\n\
     </div>",
    original_uri, annotated_uri
  )
}

/// 下载链接：`/download/<结果文件>?name=<上传文件名>`
pub fn download_href(presentation: &Presentation) -> String {
  format!(
    "/download/{}?name={}",
    urlencoding::encode(&presentation.artifact.file_name()),
    urlencoding::encode(&presentation.upload_name)
  )
}

/// 成功页面。标注图直接使用保存到磁盘的字节。
pub fn result_page(presentation: &Presentation) -> Result<String, image::ImageError> {
  let original = preview_uri(&presentation.original)?;
  let annotated = data_uri(DOWNLOAD_MIME, &presentation.artifact.bytes);

  let body = format!(
    "{panels}\n\
     <div class=\"notice success\">Processed image saved to: <code>{path}</code></div>\n\
     <h2>Detections</h2>\n{list}\n\
     <p><a href=\"{href}\" download=\"{download}\">Download {download}</a></p>\n\
     <p><a href=\"/\">Process another image</a></p>",
    panels = panels(&original, &annotated),
    path = escape_html(&presentation.output_path().display().to_string()),
    list = detection_list(&presentation.detections),
    href = escape_html(&download_href(presentation)),
    download = escape_html(&presentation.download_name()),
  );
  Ok(layout(&body))
}

/// 失败页面，只说明失败的阶段。
///
/// 保存失败时仍可附带未保存的标注结果。
pub fn error_page(stage: Stage, message: &str, unsaved: Option<(&str, &str)>) -> String {
  let mut body = format!(
    "<div class=\"notice error\"><strong>{} failed.</strong> {}</div>",
    stage_title(stage),
    escape_html(message)
  );
  if let Some((original, annotated)) = unsaved {
    let _ = write!(
      body,
      "\n<div class=\"notice warning\">The result below was not saved.</div>\n{}",
      panels(original, annotated)
    );
  }
  body.push_str("\n<p><a href=\"/\">Try again</a></p>");
  layout(&body)
}

fn stage_title(stage: Stage) -> &'static str {
  match stage {
    Stage::Idle => "Request",
    Stage::Decoding => "Reading the image",
    Stage::Inferring => "Detection",
    Stage::Persisting => "Saving the result",
    Stage::Displaying => "Displaying the result",
  }
}
