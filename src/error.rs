//! Error types for the cache controller.

use thiserror::Error;

/// A network fetch that never produced a response.
///
/// A response with a non-2xx status is not a network error; it is handed back
/// to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
  #[error("network request to {url} failed: {message}")]
  Unreachable { url: String, message: String },

  #[error("unsupported request method {0}")]
  InvalidMethod(String),
}

impl NetworkError {
  pub fn unreachable(url: impl Into<String>, message: impl ToString) -> Self {
    Self::Unreachable {
      url: url.into(),
      message: message.to_string(),
    }
  }
}

/// Errors surfaced by the cache worker to its host.
#[derive(Debug, Error)]
pub enum WorkerError {
  /// No cached copy or fallback could stand in for a failed fetch.
  #[error(transparent)]
  Network(#[from] NetworkError),

  #[error("failed to install {generation}: {source}")]
  Install {
    generation: String,
    #[source]
    source: NetworkError,
  },

  #[error("failed to install {generation}: {url} returned status {status}")]
  BadAsset {
    generation: String,
    url: String,
    status: u16,
  },

  #[error("cannot activate {generation}: generation is not installed")]
  NotInstalled { generation: String },

  #[error("cache storage failure: {0}")]
  Storage(color_eyre::Report),
}

impl From<color_eyre::Report> for WorkerError {
  fn from(report: color_eyre::Report) -> Self {
    Self::Storage(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;

  #[test]
  fn test_network_error_message() {
    let err = NetworkError::unreachable("http://campus.test/css/style.css", "connection refused");
    assert_eq!(
      err.to_string(),
      "network request to http://campus.test/css/style.css failed: connection refused"
    );
  }

  #[test]
  fn test_network_error_passes_through_transparently() {
    let err: WorkerError = NetworkError::unreachable("http://campus.test/", "offline").into();
    assert_eq!(
      err.to_string(),
      "network request to http://campus.test/ failed: offline"
    );
  }

  #[test]
  fn test_storage_report_conversion() {
    let err: WorkerError = eyre!("Lock poisoned").into();
    assert!(matches!(err, WorkerError::Storage(_)));
    assert_eq!(err.to_string(), "cache storage failure: Lock poisoned");
  }
}
