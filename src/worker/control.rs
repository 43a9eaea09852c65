//! Control channel between the page and the cache worker.
//!
//! The page posts a message together with an optional reply port. Messages
//! that expect an answer are replied to exactly once; the worker never
//! retries.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::origin::Fetcher;

use super::CacheWorker;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  GetCacheStatus,
  ClearCache,
  /// Analytics ping posted without a reply port
  #[serde(rename_all = "camelCase")]
  CampusView {
    campus_id: Value,
    #[serde(default)]
    timestamp: Option<String>,
  },
}

impl ControlMessage {
  /// Parse a message from the page, ignoring anything unrecognized.
  pub fn parse(data: &Value) -> Option<Self> {
    match serde_json::from_value(data.clone()) {
      Ok(message) => Some(message),
      Err(e) => {
        debug!(error = %e, "Ignoring unrecognized control message");
        None
      }
    }
  }

  pub fn expects_reply(&self) -> bool {
    !matches!(self, Self::CampusView { .. })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
  #[serde(rename_all = "camelCase")]
  CacheStatus { has_cache: bool, version: String },
  CacheCleared { success: bool },
}

/// A message in flight, with the port its reply goes to.
#[derive(Debug)]
pub struct Envelope {
  pub message: ControlMessage,
  pub reply: Option<oneshot::Sender<ControlReply>>,
}

/// Page-side handle of the control channel.
#[derive(Clone)]
pub struct ControlSender {
  tx: mpsc::UnboundedSender<Envelope>,
}

/// Create a control channel. The receiver is handed to [`CacheWorker::serve_control`].
pub fn channel() -> (ControlSender, mpsc::UnboundedReceiver<Envelope>) {
  let (tx, rx) = mpsc::unbounded_channel();
  (ControlSender { tx }, rx)
}

impl ControlSender {
  /// Post a message and wait for its reply, if it has one.
  ///
  /// Retry and timeout policy belong to the caller.
  pub async fn send(&self, message: ControlMessage) -> Result<Option<ControlReply>> {
    if !message.expects_reply() {
      self
        .tx
        .send(Envelope {
          message,
          reply: None,
        })
        .map_err(|_| eyre!("Control channel closed"))?;
      return Ok(None);
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    self
      .tx
      .send(Envelope {
        message,
        reply: Some(reply_tx),
      })
      .map_err(|_| eyre!("Control channel closed"))?;

    let reply = reply_rx
      .await
      .map_err(|_| eyre!("Worker dropped the reply port"))?;
    Ok(Some(reply))
  }
}

impl<S: CacheStorage, F: Fetcher> CacheWorker<S, F> {
  /// Handle one control message. Returns the reply to post, if any.
  pub async fn handle_message(&self, message: ControlMessage) -> Option<ControlReply> {
    match message {
      ControlMessage::GetCacheStatus => Some(self.cache_status().await),
      ControlMessage::ClearCache => Some(self.clear_cache().await),
      ControlMessage::CampusView {
        campus_id,
        timestamp,
      } => {
        info!(%campus_id, timestamp = timestamp.as_deref(), "Campus viewed");
        None
      }
    }
  }

  async fn cache_status(&self) -> ControlReply {
    let generation = self.settings.cache_name();
    let has_cache = match self.storage.has_generation(&generation).await {
      Ok(found) => found,
      Err(e) => {
        warn!(generation = %generation, error = %e, "Failed to check cache status");
        false
      }
    };

    ControlReply::CacheStatus {
      has_cache,
      version: self.settings.version.clone(),
    }
  }

  /// Delete the current generation. Entries come back lazily as requests
  /// are served; nothing is re-installed here.
  async fn clear_cache(&self) -> ControlReply {
    let generation = self.settings.cache_name();
    let success = match self.storage.delete_generation(&generation).await {
      Ok(existed) => {
        info!(generation = %generation, existed, "Cache cleared");
        true
      }
      Err(e) => {
        warn!(generation = %generation, error = %e, "Failed to clear cache");
        false
      }
    };

    ControlReply::CacheCleared { success }
  }
}

impl<S, F> CacheWorker<S, F>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  /// Serve control messages until every sender is dropped.
  ///
  /// Each message runs as its own task, so a slow clear never blocks a
  /// status query.
  pub async fn serve_control(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(Envelope { message, reply }) = rx.recv().await {
      let worker = Arc::clone(&self);
      tokio::spawn(async move {
        let answer = worker.handle_message(message).await;
        match (answer, reply) {
          (Some(answer), Some(port)) => {
            if port.send(answer).is_err() {
              debug!("Reply port closed before reply was sent");
            }
          }
          (Some(_), None) => debug!("Message expected a reply but came without a port"),
          (None, _) => {}
        }
      });
    }
  }
}
