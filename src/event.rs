//! Host loop for `campus-cache run`.
//!
//! Reads newline-delimited JSON events from stdin and writes one JSON line per
//! outcome to stdout. Lifecycle events run in order; fetches and control
//! messages each run as their own task.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheResult, CacheSource, CacheStorage};
use crate::origin::{Destination, Fetcher, Request};
use crate::worker::control::{self, ControlMessage, ControlReply};
use crate::worker::lifecycle::{ActivateOutcome, InstallOutcome};
use crate::worker::{CacheWorker, WorkerSettings};

/// A request as described by the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FetchTarget {
  /// Page-relative path or absolute URL
  pub url: String,
  #[serde(default = "default_method")]
  pub method: String,
  #[serde(default)]
  pub accept: Option<String>,
  #[serde(default)]
  pub destination: Destination,
}

fn default_method() -> String {
  "GET".to_string()
}

impl FetchTarget {
  pub fn to_request(&self, settings: &WorkerSettings) -> Result<Request> {
    let mut request = Request::get(settings.resolve(&self.url)?)
      .with_method(self.method.clone())
      .with_destination(self.destination);
    if let Some(accept) = &self.accept {
      request = request.with_accept(accept.clone());
    }
    Ok(request)
  }
}

/// Input events
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum HostEvent {
  Install,
  Activate,
  Fetch(FetchTarget),
  /// Control message from the page; `data` is the raw message body
  Message { data: Value },
}

/// What a served request looked like, without its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSummary {
  pub url: String,
  pub status: u16,
  pub source: CacheSource,
  pub content_type: Option<String>,
  pub bytes: usize,
  pub cached_at: Option<DateTime<Utc>>,
}

impl FetchSummary {
  pub fn new(url: &Url, result: &CacheResult) -> Self {
    Self {
      url: url.to_string(),
      status: result.response.status,
      source: result.source,
      content_type: result.response.content_type.clone(),
      bytes: result.response.body.len(),
      cached_at: result.cached_at,
    }
  }
}

/// Output lines
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum HostOutput {
  Install(InstallOutcome),
  Activate(ActivateOutcome),
  Fetch(FetchSummary),
  Message { reply: ControlReply },
  Error { during: String, message: String },
}

impl HostOutput {
  fn error(during: &str, error: impl ToString) -> Self {
    Self::Error {
      during: during.to_string(),
      message: error.to_string(),
    }
  }
}

/// Run the host loop until stdin is closed and every in-flight task finished.
pub async fn run<S, F>(worker: Arc<CacheWorker<S, F>>) -> Result<()>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  let (control, control_rx) = control::channel();
  let server = tokio::spawn(Arc::clone(&worker).serve_control(control_rx));

  let (tx, mut rx) = mpsc::unbounded_channel::<HostOutput>();
  let writer = tokio::spawn(async move {
    let mut stdout = tokio::io::stdout();
    while let Some(output) = rx.recv().await {
      let line = match serde_json::to_string(&output) {
        Ok(line) => line,
        Err(e) => {
          warn!(error = %e, "Failed to encode output");
          continue;
        }
      };
      if stdout.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
        break;
      }
      let _ = stdout.flush().await;
    }
  });

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  while let Some(line) = lines
    .next_line()
    .await
    .map_err(|e| eyre!("Failed to read event: {}", e))?
  {
    if line.trim().is_empty() {
      continue;
    }

    let event: HostEvent = match serde_json::from_str(&line) {
      Ok(event) => event,
      Err(e) => {
        let _ = tx.send(HostOutput::error("parse", e));
        continue;
      }
    };

    match event {
      HostEvent::Install => {
        let output = match worker.install().await {
          Ok(outcome) => HostOutput::Install(outcome),
          Err(e) => HostOutput::error("install", e),
        };
        let _ = tx.send(output);
      }
      HostEvent::Activate => {
        let output = match worker.activate().await {
          Ok(outcome) => HostOutput::Activate(outcome),
          Err(e) => HostOutput::error("activate", e),
        };
        let _ = tx.send(output);
      }
      HostEvent::Fetch(target) => {
        let worker = Arc::clone(&worker);
        let tx = tx.clone();
        tokio::spawn(async move {
          let _ = tx.send(serve(&worker, &target).await);
        });
      }
      HostEvent::Message { data } => {
        let Some(message) = ControlMessage::parse(&data) else {
          continue;
        };
        let control = control.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
          match control.send(message).await {
            Ok(Some(reply)) => {
              let _ = tx.send(HostOutput::Message { reply });
            }
            Ok(None) => {}
            Err(e) => {
              let _ = tx.send(HostOutput::error("message", e));
            }
          }
        });
      }
    }
  }

  drop(control);
  drop(tx);
  writer.await?;
  server.await?;

  info!(state = ?worker.state().await, "Event stream closed");
  Ok(())
}

async fn serve<S: CacheStorage, F: Fetcher>(
  worker: &CacheWorker<S, F>,
  target: &FetchTarget,
) -> HostOutput {
  let request = match target.to_request(worker.settings()) {
    Ok(request) => request,
    Err(e) => return HostOutput::error("fetch", e),
  };

  match worker.handle_fetch(&request).await {
    Ok(result) => HostOutput::Fetch(FetchSummary::new(&request.url, &result)),
    Err(e) => HostOutput::error("fetch", e),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::worker::testing::worker;
  use serde_json::json;

  #[test]
  fn test_parse_events() {
    let install: HostEvent = serde_json::from_str(r#"{"event":"install"}"#).unwrap();
    assert_eq!(install, HostEvent::Install);

    let fetch: HostEvent = serde_json::from_str(
      r#"{"event":"fetch","url":"/images/2.jpg","destination":"image"}"#,
    )
    .unwrap();
    assert_eq!(
      fetch,
      HostEvent::Fetch(FetchTarget {
        url: "/images/2.jpg".to_string(),
        method: "GET".to_string(),
        accept: None,
        destination: Destination::Image,
      })
    );

    let message: HostEvent =
      serde_json::from_str(r#"{"event":"message","data":{"type":"CLEAR_CACHE"}}"#).unwrap();
    assert_eq!(
      message,
      HostEvent::Message {
        data: json!({ "type": "CLEAR_CACHE" })
      }
    );
  }

  #[test]
  fn test_unknown_event_is_rejected() {
    assert!(serde_json::from_str::<HostEvent>(r#"{"event":"sync"}"#).is_err());
  }

  #[test]
  fn test_output_format() {
    let output = HostOutput::Message {
      reply: ControlReply::CacheCleared { success: true },
    };
    assert_eq!(
      serde_json::to_value(&output).unwrap(),
      json!({ "event": "message", "reply": { "type": "CACHE_CLEARED", "success": true } })
    );

    let output = HostOutput::error("activate", "not installed");
    assert_eq!(
      serde_json::to_value(&output).unwrap(),
      json!({ "event": "error", "during": "activate", "message": "not installed" })
    );
  }

  #[tokio::test]
  async fn test_serve_summarizes_result() {
    let (worker, origin) = worker(&["/", "/images/1.jpg"]);
    worker.install().await.unwrap();
    worker.activate().await.unwrap();
    origin.set_offline(true);

    let target = FetchTarget {
      url: "/images/3.jpg".to_string(),
      method: "GET".to_string(),
      accept: None,
      destination: Destination::Image,
    };

    match serve(&worker, &target).await {
      HostOutput::Fetch(summary) => {
        assert_eq!(summary.url, "http://campus.test/images/3.jpg");
        assert_eq!(summary.source, CacheSource::Fallback);
        assert_eq!(summary.status, 200);
        assert_eq!(summary.bytes, "/images/1.jpg".len());
        assert!(summary.cached_at.is_some());
      }
      other => panic!("unexpected output: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_serve_reports_errors() {
    let (worker, origin) = worker(&["/"]);
    worker.install().await.unwrap();
    origin.set_offline(true);

    let target = FetchTarget {
      url: "/js/app.js".to_string(),
      method: "GET".to_string(),
      accept: None,
      destination: Destination::Script,
    };

    assert!(matches!(
      serve(&worker, &target).await,
      HostOutput::Error { ref during, .. } if during == "fetch"
    ));
  }
}
