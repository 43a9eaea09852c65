//! Core types for cache generations and their entries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::origin::Response;

/// A response snapshot stored in a cache generation.
///
/// Snapshots are never mutated; updating a request identity replaces the
/// whole snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
  pub response: Response,
  /// Hex SHA-256 of the body at the time it was stored
  pub digest: String,
  pub stored_at: DateTime<Utc>,
}

impl StoredResponse {
  pub fn new(response: Response) -> Self {
    Self {
      digest: body_digest(&response.body),
      response,
      stored_at: Utc::now(),
    }
  }

  /// Whether the body still matches the digest recorded when it was stored.
  pub fn is_intact(&self) -> bool {
    body_digest(&self.response.body) == self.digest
  }
}

/// Summary of a stored entry, without its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
  pub key: String,
  pub status: u16,
  pub size: usize,
  pub stored_at: DateTime<Utc>,
}

pub fn body_digest(body: &[u8]) -> String {
  hex::encode(Sha256::digest(body))
}

/// Result of serving a request, including metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult {
  pub response: Response,
  pub source: CacheSource,
  /// When the served copy was stored (if it came from a cache generation)
  pub cached_at: Option<DateTime<Utc>>,
}

impl CacheResult {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn passthrough(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::PassThrough,
      cached_at: None,
    }
  }

  pub fn from_cache(stored: StoredResponse) -> Self {
    Self::stored(stored, CacheSource::Cache)
  }

  /// Network failed, serving the stored copy of the same request.
  pub fn offline(stored: StoredResponse) -> Self {
    Self::stored(stored, CacheSource::Offline)
  }

  /// Network failed, serving a substitute asset.
  pub fn fallback(stored: StoredResponse) -> Self {
    Self::stored(stored, CacheSource::Fallback)
  }

  fn stored(stored: StoredResponse, source: CacheSource) -> Self {
    Self {
      response: stored.response,
      source,
      cached_at: Some(stored.stored_at),
    }
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
  /// Fresh from the network
  Network,
  /// Served from the current generation without touching the network
  Cache,
  /// Network unavailable, serving the stored copy of this request
  Offline,
  /// Network unavailable, serving a designated substitute asset
  Fallback,
  /// Not intercepted
  PassThrough,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::origin::ResponseType;

  fn response(body: &[u8]) -> Response {
    Response {
      url: "http://campus.test/images/1.jpg".to_string(),
      status: 200,
      content_type: Some("image/jpeg".to_string()),
      response_type: ResponseType::Basic,
      body: body.to_vec(),
    }
  }

  #[test]
  fn test_digest_is_sha256_hex() {
    assert_eq!(
      body_digest(b""),
      "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
  }

  #[test]
  fn test_tampered_body_is_not_intact() {
    let mut stored = StoredResponse::new(response(b"map"));
    assert!(stored.is_intact());

    stored.response.body.push(0);
    assert!(!stored.is_intact());
  }

  #[test]
  fn test_stored_results_keep_timestamp() {
    let stored = StoredResponse::new(response(b"map"));
    let stored_at = stored.stored_at;

    let result = CacheResult::fallback(stored);
    assert_eq!(result.source, CacheSource::Fallback);
    assert_eq!(result.cached_at, Some(stored_at));
    assert_eq!(result.response.body, b"map");
  }
}
