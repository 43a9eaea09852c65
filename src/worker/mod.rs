//! The offline asset cache controller.
//!
//! A `CacheWorker` owns no ambient state: cache generations live in an
//! injected [`CacheStorage`] and all network access goes through an injected
//! [`Fetcher`]. Lifecycle events, intercepted requests, and control messages
//! are plain async methods that may run concurrently.

pub mod classify;
pub mod control;
pub mod lifecycle;

#[cfg(test)]
pub(crate) mod testing;

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::cache::{CacheLayer, CacheResult, CacheStorage};
use crate::config::Config;
use crate::error::WorkerError;
use crate::origin::types::identity_of;
use crate::origin::{Fetcher, Request};

use classify::{classify, fallback_for, Fallback, Strategy};
use lifecycle::LifecycleState;

/// Resolved settings for one application version.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub app_name: String,
  pub version: String,
  pub origin: Url,
  /// Absolute URLs of the install manifest, in order
  pub manifest: Vec<Url>,
  placeholder_key: String,
  root_document_key: String,
}

impl WorkerSettings {
  pub fn from_config(config: &Config) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin URL '{}': {}", config.origin, e))?;

    let resolve = |path: &str| {
      origin
        .join(path)
        .map_err(|e| eyre!("Invalid asset path '{}': {}", path, e))
    };

    let manifest = config
      .manifest
      .iter()
      .map(|path| resolve(path))
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      app_name: config.app_name.clone(),
      version: config.version.clone(),
      placeholder_key: identity_of(&resolve(&config.placeholder_image)?),
      root_document_key: identity_of(&resolve(&config.root_document)?),
      manifest,
      origin,
    })
  }

  /// Name of the current generation: `<app_name>-<version>`.
  pub fn cache_name(&self) -> String {
    format!("{}-{}", self.app_name, self.version)
  }

  /// Whether `generation` belongs to this application but is not current.
  pub fn is_stale(&self, generation: &str) -> bool {
    generation.starts_with(&format!("{}-", self.app_name)) && generation != self.cache_name()
  }

  /// Resolve a page-relative path or absolute URL against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid request URL '{}': {}", path, e))
  }

  fn fallback_key(&self, fallback: Fallback) -> &str {
    match fallback {
      Fallback::PlaceholderImage => &self.placeholder_key,
      Fallback::RootDocument => &self.root_document_key,
    }
  }
}

pub struct CacheWorker<S: CacheStorage, F: Fetcher> {
  settings: WorkerSettings,
  storage: Arc<S>,
  fetcher: Arc<F>,
  /// Held for the whole of install and activate so they never overlap
  lifecycle: Mutex<LifecycleState>,
}

impl<S: CacheStorage, F: Fetcher> CacheWorker<S, F> {
  pub fn new(settings: WorkerSettings, storage: Arc<S>, fetcher: Arc<F>) -> Self {
    Self {
      settings,
      storage,
      fetcher,
      lifecycle: Mutex::new(LifecycleState::Parsed),
    }
  }

  pub fn settings(&self) -> &WorkerSettings {
    &self.settings
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  fn layer(&self) -> CacheLayer<S> {
    CacheLayer::new(Arc::clone(&self.storage), self.settings.cache_name())
  }

  /// Serve an intercepted request. Every call yields exactly one outcome.
  pub async fn handle_fetch(&self, request: &Request) -> Result<CacheResult, WorkerError> {
    let strategy = classify(request);
    let key = request.identity();
    let fallback = fallback_for(request).map(|f| self.settings.fallback_key(f));
    let fetcher = || self.fetcher.fetch(request);

    debug!(url = %request.url, ?strategy, "Intercepted request");

    match strategy {
      Strategy::PassThrough => Ok(CacheResult::passthrough(self.fetcher.fetch(request).await?)),
      Strategy::NetworkFirst => self.layer().network_first(&key, fallback, fetcher).await,
      Strategy::CacheFirst => self.layer().cache_first(&key, fallback, fetcher).await,
    }
  }
}
