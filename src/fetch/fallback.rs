//! Synthesized stand-ins served when neither network nor cache can answer.

use crate::http::Response;

pub const SVG_CONTENT_TYPE: &str = "image/svg+xml";
pub const HTML_CONTENT_TYPE: &str = "text/html";
pub const CSS_CONTENT_TYPE: &str = "text/css";
pub const JS_CONTENT_TYPE: &str = "application/javascript";

const PLACEHOLDER_SIZE: u32 = 400;

/// A fixed-size grey placeholder with a caption.
pub fn placeholder_image() -> Response {
  let size = PLACEHOLDER_SIZE;
  let center = size / 2;
  let svg = format!(
    r##"<svg xmlns="http://www.w3.org/2000/svg" width="{size}" height="{size}" viewBox="0 0 {size} {size}">
  <rect width="{size}" height="{size}" fill="#f0f0f0"/>
  <text x="{center}" y="{center}" font-family="Arial, sans-serif" font-size="16" fill="#999" text-anchor="middle" dominant-baseline="middle">Image temporarily unavailable</text>
</svg>
"##
  );
  Response::ok(svg, SVG_CONTENT_TYPE)
}

/// Minimal offline document with a retry button that reloads the page.
pub fn offline_page(app_name: &str) -> Response {
  let title = escape_html(app_name);
  let html = format!(
    r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Offline - {title}</title>
  <style>
    body {{
      font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif;
      display: flex; align-items: center; justify-content: center;
      min-height: 100vh; margin: 0; background: #f8f9fa;
      text-align: center; padding: 20px;
    }}
    .offline-content {{
      max-width: 400px; background: #fff; padding: 40px;
      border-radius: 16px; box-shadow: 0 4px 20px rgba(0,0,0,0.1);
    }}
    button {{
      background: #000; color: #fff; border: none; padding: 12px 24px;
      border-radius: 8px; font-weight: 600; cursor: pointer;
    }}
  </style>
</head>
<body>
  <div class="offline-content">
    <h1>You're Offline</h1>
    <p>It looks like you've lost your connection. Everything will be here when you get back.</p>
    <button onclick="window.location.reload()">Try Again</button>
  </div>
</body>
</html>
"##
  );
  Response::ok(html, HTML_CONTENT_TYPE)
}

/// An empty stylesheet.
pub fn empty_stylesheet() -> Response {
  Response::ok("/* offline fallback */\n", CSS_CONTENT_TYPE)
}

/// An empty script.
pub fn empty_script() -> Response {
  Response::ok("// offline fallback\n", JS_CONTENT_TYPE)
}

fn escape_html(s: &str) -> String {
  s.replace('&', "&amp;")
    .replace('<', "&lt;")
    .replace('>', "&gt;")
    .replace('"', "&quot;")
}
