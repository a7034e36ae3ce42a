//! Request classification.

use url::Url;

use crate::http::Request;

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".avif", ".svg"];
const STATIC_EXTENSIONS: &[&str] = &[".css", ".js", ".woff", ".woff2"];

/// The strategy a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Non-GET or cross-origin; handed to the network untouched
  PassThrough,
  /// Stale-while-revalidate on the bounded image tier
  Image,
  /// Network-first, offline page as last resort
  Html,
  /// Cache-first on the critical tier
  StaticAsset,
  /// Network-first with a short-lived cached fallback
  Dynamic,
}

/// Assign a request to exactly one route.
///
/// Rules are checked in order. The extension checks look for the extension
/// anywhere in the path, and the image check runs before the `Accept` check,
/// so an image URL requested as `text/html` is still an image.
pub fn classify(request: &Request, origin: &Url) -> Route {
  if !request.is_get() || request.url.origin() != origin.origin() {
    return Route::PassThrough;
  }

  let path = request.path();

  if IMAGE_EXTENSIONS.iter().any(|ext| path.contains(ext)) {
    return Route::Image;
  }

  if request
    .header("accept")
    .is_some_and(|accept| accept.contains("text/html"))
  {
    return Route::Html;
  }

  if STATIC_EXTENSIONS.iter().any(|ext| path.contains(ext)) {
    return Route::StaticAsset;
  }

  Route::Dynamic
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Url {
    Url::parse("https://shop.test/").unwrap()
  }

  fn get(path: &str) -> Request {
    Request::get(origin().join(path).unwrap())
  }

  #[test]
  fn test_non_get_passes_through() {
    let request = Request::new("POST", origin().join("/api/cart").unwrap());
    assert_eq!(classify(&request, &origin()), Route::PassThrough);
  }

  #[test]
  fn test_cross_origin_passes_through() {
    let request = Request::get(Url::parse("https://cdn.test/logo.png").unwrap());
    assert_eq!(classify(&request, &origin()), Route::PassThrough);

    let other_port = Request::get(Url::parse("https://shop.test:8443/").unwrap());
    assert_eq!(classify(&other_port, &origin()), Route::PassThrough);
  }

  #[test]
  fn test_images_by_extension() {
    for path in [
      "/a.jpg",
      "/a.jpeg",
      "/images/product/product-01.png",
      "/a.webp",
      "/a.avif",
      "/icon.svg",
    ] {
      assert_eq!(classify(&get(path), &origin()), Route::Image, "{}", path);
    }
  }

  #[test]
  fn test_image_extension_wins_over_html_accept() {
    let request = get("/hero.webp").with_header("Accept", "text/html,application/xhtml+xml");
    assert_eq!(classify(&request, &origin()), Route::Image);
  }

  #[test]
  fn test_html_by_accept_header() {
    let request = get("/").with_header("Accept", "text/html,*/*;q=0.8");
    assert_eq!(classify(&request, &origin()), Route::Html);

    // Accept wins over a static extension
    let request = get("/app.js").with_header("Accept", "text/html");
    assert_eq!(classify(&request, &origin()), Route::Html);
  }

  #[test]
  fn test_static_assets() {
    for path in ["/styles.css", "/app.js", "/fonts/a.woff", "/fonts/a.woff2"] {
      assert_eq!(classify(&get(path), &origin()), Route::StaticAsset, "{}", path);
    }
  }

  #[test]
  fn test_everything_else_is_dynamic() {
    assert_eq!(classify(&get("/api/products"), &origin()), Route::Dynamic);
    assert_eq!(classify(&get("/"), &origin()), Route::Dynamic);
  }

  #[test]
  fn test_extension_match_is_substring() {
    // ".json" contains ".js"
    assert_eq!(classify(&get("/manifest.json"), &origin()), Route::StaticAsset);
    // Query strings are not part of the path
    assert_eq!(classify(&get("/api?file=a.png"), &origin()), Route::Dynamic);
  }
}
