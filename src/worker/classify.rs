//! Request classification.
//!
//! Pure functions from request metadata to the strategy that serves it and
//! the substitute asset used when both network and cache come up empty.

use crate::origin::{Destination, Request};

/// Caching strategy for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Not intercepted; the request goes straight to the network.
  PassThrough,
  /// Prefer a fresh copy, fall back to the stored one when offline.
  NetworkFirst,
  /// Prefer the stored copy, fetch and store it on a miss.
  CacheFirst,
}

/// Substitute asset served when a request cannot be satisfied otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
  PlaceholderImage,
  RootDocument,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Classify a request. First matching rule wins.
pub fn classify(request: &Request) -> Strategy {
  if !request.is_get() || is_ignored_source(request) {
    return Strategy::PassThrough;
  }

  if is_stylesheet(request) || request.accepts_html() {
    return Strategy::NetworkFirst;
  }

  Strategy::CacheFirst
}

/// Substitute asset for a request whose network fetch and cache lookup both
/// failed, if its kind has one.
pub fn fallback_for(request: &Request) -> Option<Fallback> {
  if is_image(request) {
    Some(Fallback::PlaceholderImage)
  } else if request.accepts_html() {
    Some(Fallback::RootDocument)
  } else {
    None
  }
}

/// Browser extension traffic and the development live-reload server.
fn is_ignored_source(request: &Request) -> bool {
  request.url.scheme() == "chrome-extension" || request.url.as_str().contains("browser-sync")
}

fn is_stylesheet(request: &Request) -> bool {
  request.destination == Destination::Style || request.extension().as_deref() == Some("css")
}

fn is_image(request: &Request) -> bool {
  request.destination == Destination::Image
    || request
      .extension()
      .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn get(path: &str) -> Request {
    Request::get(Url::parse("http://campus.test/").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_non_get_passes_through() {
    for method in ["POST", "PUT", "DELETE", "HEAD"] {
      let req = get("/css/style.css").with_method(method);
      assert_eq!(classify(&req), Strategy::PassThrough, "{method}");
    }
  }

  #[test]
  fn test_ignored_sources_pass_through() {
    let ext = Request::get(Url::parse("chrome-extension://abcdef/content.js").unwrap());
    assert_eq!(classify(&ext), Strategy::PassThrough);

    let reload = get("/browser-sync/browser-sync-client.js");
    assert_eq!(classify(&reload), Strategy::PassThrough);
  }

  #[test]
  fn test_stylesheets_are_network_first() {
    assert_eq!(classify(&get("/css/style.css")), Strategy::NetworkFirst);
    assert_eq!(classify(&get("/css/STYLE.CSS")), Strategy::NetworkFirst);

    let by_destination = get("/theme").with_destination(Destination::Style);
    assert_eq!(classify(&by_destination), Strategy::NetworkFirst);
  }

  #[test]
  fn test_html_navigation_is_network_first() {
    let req = get("/").with_accept("text/html,application/xhtml+xml,*/*;q=0.8");
    assert_eq!(classify(&req), Strategy::NetworkFirst);
  }

  #[test]
  fn test_everything_else_is_cache_first() {
    for path in [
      "/js/app.js",
      "/images/2.jpg",
      "/images/icons/icon-192.png",
      "/manifest.json",
      "/robots.txt",
      "/",
    ] {
      assert_eq!(classify(&get(path)), Strategy::CacheFirst, "{path}");
    }
  }

  #[test]
  fn test_non_get_wins_over_stylesheet_rule() {
    let req = get("/").with_method("POST").with_accept("text/html");
    assert_eq!(classify(&req), Strategy::PassThrough);
  }

  #[test]
  fn test_classification_is_deterministic() {
    let req = get("/images/4.jpg").with_destination(Destination::Image);
    let first = classify(&req);
    for _ in 0..10 {
      assert_eq!(classify(&req), first);
    }
  }

  #[test]
  fn test_image_fallback() {
    for path in ["/images/3.jpg", "/a.JPEG", "/b.png", "/c.gif"] {
      assert_eq!(fallback_for(&get(path)), Some(Fallback::PlaceholderImage), "{path}");
    }
    let by_destination = get("/map").with_destination(Destination::Image);
    assert_eq!(fallback_for(&by_destination), Some(Fallback::PlaceholderImage));
  }

  #[test]
  fn test_html_fallback() {
    let req = get("/campus.html").with_accept("text/html");
    assert_eq!(fallback_for(&req), Some(Fallback::RootDocument));
  }

  #[test]
  fn test_no_fallback_for_other_kinds() {
    assert_eq!(fallback_for(&get("/js/app.js")), None);
    assert_eq!(fallback_for(&get("/css/style.css")), None);
    assert_eq!(fallback_for(&get("/manifest.json")), None);
  }
}
