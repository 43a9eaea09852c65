//! Scripted origin server for worker tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

use crate::cache::MemoryStorage;
use crate::config::Config;
use crate::error::NetworkError;
use crate::origin::{Fetcher, Request, Response, ResponseType};

use super::{CacheWorker, WorkerSettings};

pub const ORIGIN: &str = "http://campus.test/";

/// Fake origin that answers from a fixed table and counts every fetch.
///
/// Unknown URLs answer 404. While offline, every fetch fails. While held,
/// every fetch waits until `release`.
#[derive(Default)]
pub struct FakeOrigin {
  assets: Mutex<HashMap<String, Response>>,
  offline: AtomicBool,
  calls: AtomicUsize,
  gate: Mutex<Option<Arc<Semaphore>>>,
  entered: Notify,
}

impl FakeOrigin {
  pub fn serve(&self, path: &str, status: u16, content_type: &str, body: &str) {
    let url = format!("http://campus.test{}", path);
    self.assets.lock().unwrap().insert(
      url.clone(),
      Response {
        url,
        status,
        content_type: Some(content_type.to_string()),
        response_type: ResponseType::Basic,
        body: body.as_bytes().to_vec(),
      },
    );
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn reset_calls(&self) {
    self.calls.store(0, Ordering::SeqCst);
  }

  pub fn hold(&self) {
    *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
  }

  /// Let every held fetch complete.
  pub fn release(&self) {
    if let Some(gate) = self.gate.lock().unwrap().take() {
      gate.close();
    }
  }

  /// Wait until some fetch is blocked on the gate.
  pub async fn entered(&self) {
    self.entered.notified().await;
  }
}

#[async_trait]
impl Fetcher for FakeOrigin {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    let gate = self.gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      self.entered.notify_one();
      // Closing the semaphore is the release signal
      let _ = gate.acquire().await;
    }

    if self.offline.load(Ordering::SeqCst) {
      return Err(NetworkError::unreachable(request.url.as_str(), "offline"));
    }

    let key = request.identity();
    let found = self.assets.lock().unwrap().get(&key).cloned();
    Ok(found.unwrap_or_else(|| Response {
      url: key,
      status: 404,
      content_type: Some("text/plain".to_string()),
      response_type: ResponseType::Basic,
      body: b"Not Found".to_vec(),
    }))
  }
}

/// Worker over in-memory storage whose manifest is `paths`, each served by
/// the fake origin with its own path as the body.
pub fn worker(paths: &[&str]) -> (CacheWorker<MemoryStorage, FakeOrigin>, Arc<FakeOrigin>) {
  worker_with(paths, "v2.0.0", Arc::new(MemoryStorage::new()))
}

pub fn worker_with(
  paths: &[&str],
  version: &str,
  storage: Arc<MemoryStorage>,
) -> (CacheWorker<MemoryStorage, FakeOrigin>, Arc<FakeOrigin>) {
  let origin = Arc::new(FakeOrigin::default());
  for path in paths {
    origin.serve(path, 200, "text/plain", path);
  }

  let config = Config {
    version: version.to_string(),
    origin: ORIGIN.to_string(),
    manifest: paths.iter().map(|p| p.to_string()).collect(),
    ..Config::default()
  };
  let settings = WorkerSettings::from_config(&config).unwrap();

  (
    CacheWorker::new(settings, storage, Arc::clone(&origin)),
    origin,
  )
}
