//! Request and response types exchanged with the page and the origin server.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use url::Url;

/// What kind of element or navigation issued a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  /// fetch() or an unknown initiator
  #[default]
  Empty,
  Document,
  Style,
  Script,
  Image,
  Font,
  Manifest,
}

/// An intercepted resource request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub url: Url,
  pub method: String,
  /// Value of the Accept header, if the page sent one
  pub accept: Option<String>,
  pub destination: Destination,
}

impl Request {
  /// A plain GET with no Accept header.
  pub fn get(url: Url) -> Self {
    Self {
      url,
      method: "GET".to_string(),
      accept: None,
      destination: Destination::Empty,
    }
  }

  pub fn with_method(mut self, method: impl Into<String>) -> Self {
    self.method = method.into();
    self
  }

  pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
    self.accept = Some(accept.into());
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Normalized request identity used as the cache key.
  ///
  /// The fragment never reaches the server, so it is not part of the identity.
  pub fn identity(&self) -> String {
    identity_of(&self.url)
  }

  /// Lowercased file extension of the last path segment, if any.
  pub fn extension(&self) -> Option<String> {
    self
      .url
      .path_segments()
      .and_then(|segments| segments.last())
      .and_then(|segment| segment.rsplit_once('.'))
      .map(|(_, ext)| ext.to_ascii_lowercase())
      .filter(|ext| !ext.is_empty())
  }

  pub fn accepts_html(&self) -> bool {
    self
      .accept
      .as_deref()
      .map(|accept| accept.contains("text/html"))
      .unwrap_or(false)
  }
}

/// Cache key for a URL.
pub fn identity_of(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}

/// How the response relates to the page's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response with readable body
  Cors,
  /// Cross-origin response without CORS access
  Opaque,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      _ => None,
    }
  }
}

/// A response snapshot, either fresh from the network or read back from a
/// cache generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  /// Final URL the response was served from
  pub url: String,
  pub status: u16,
  pub content_type: Option<String>,
  pub response_type: ResponseType,
  pub body: Vec<u8>,
}

impl Response {
  /// Only complete same-origin responses are worth storing.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.response_type == ResponseType::Basic
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn request(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_identity_drops_fragment() {
    let req = request("http://campus.test/index.html#burnaby");
    assert_eq!(req.identity(), "http://campus.test/index.html");
  }

  #[test]
  fn test_identity_keeps_query() {
    let req = request("http://campus.test/js/app.js?v=2");
    assert_eq!(req.identity(), "http://campus.test/js/app.js?v=2");
  }

  #[test]
  fn test_extension_is_lowercased() {
    assert_eq!(
      request("http://campus.test/images/3.JPG").extension().as_deref(),
      Some("jpg")
    );
    assert_eq!(
      request("http://campus.test/css/style.css?x=1").extension().as_deref(),
      Some("css")
    );
  }

  #[test]
  fn test_extension_missing() {
    assert_eq!(request("http://campus.test/").extension(), None);
    assert_eq!(request("http://campus.test/about").extension(), None);
    assert_eq!(request("http://campus.test/trailing.").extension(), None);
  }

  #[test]
  fn test_accepts_html() {
    let req = request("http://campus.test/").with_accept("text/html,application/xhtml+xml");
    assert!(req.accepts_html());
    assert!(!request("http://campus.test/").accepts_html());
    assert!(!request("http://campus.test/")
      .with_accept("image/avif,image/webp")
      .accepts_html());
  }

  #[test]
  fn test_method_is_case_insensitive() {
    assert!(request("http://campus.test/").with_method("get").is_get());
    assert!(!request("http://campus.test/").with_method("POST").is_get());
  }

  #[test]
  fn test_cacheable_requires_basic_200() {
    let ok = Response {
      url: "http://campus.test/".to_string(),
      status: 200,
      content_type: None,
      response_type: ResponseType::Basic,
      body: Vec::new(),
    };
    assert!(ok.is_cacheable());
    assert!(!Response {
      status: 206,
      ..ok.clone()
    }
    .is_cacheable());
    assert!(!Response {
      response_type: ResponseType::Cors,
      ..ok
    }
    .is_cacheable());
  }

  #[test]
  fn test_response_type_round_trip() {
    for ty in [ResponseType::Basic, ResponseType::Cors, ResponseType::Opaque] {
      assert_eq!(ResponseType::parse(ty.as_str()), Some(ty));
    }
    assert_eq!(ResponseType::parse("error"), None);
  }
}
