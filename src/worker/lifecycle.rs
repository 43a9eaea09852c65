//! Install and activate: creation and retirement of cache generations.

use futures::future::try_join_all;
use serde::Serialize;
use tracing::{error, info};

use crate::cache::CacheStorage;
use crate::error::WorkerError;
use crate::origin::{Fetcher, Request};

use super::CacheWorker;

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
  /// Nothing has run yet in this process
  Parsed,
  Installing,
  /// Current generation fully stored, waiting for activation
  Installed,
  Activating,
  /// Stale generations removed and clients claimed
  Activated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOutcome {
  pub generation: String,
  pub assets: usize,
  /// The new version takes over without waiting for old pages to close.
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateOutcome {
  pub generation: String,
  /// Stale generations that were deleted
  pub deleted: Vec<String>,
  pub clients_claimed: bool,
}

impl<S: CacheStorage, F: Fetcher> CacheWorker<S, F> {
  pub async fn state(&self) -> LifecycleState {
    *self.lifecycle.lock().await
  }

  /// Fetch every manifest asset and store them as the current generation.
  ///
  /// Either every asset is stored or nothing is: assets are fetched before
  /// the generation is written, and any failure or non-200 response aborts
  /// the install.
  pub async fn install(&self) -> Result<InstallOutcome, WorkerError> {
    let mut state = self.lifecycle.lock().await;
    let previous = *state;
    *state = LifecycleState::Installing;

    let generation = self.settings.cache_name();
    info!(generation = %generation, "Installing");

    match self.store_manifest(&generation).await {
      Ok(assets) => {
        *state = LifecycleState::Installed;
        info!(generation = %generation, assets, "Installation complete");
        Ok(InstallOutcome {
          generation,
          assets,
          skip_waiting: true,
        })
      }
      Err(e) => {
        *state = previous;
        error!(generation = %generation, error = %e, "Installation failed");
        Err(e)
      }
    }
  }

  async fn store_manifest(&self, generation: &str) -> Result<usize, WorkerError> {
    info!(assets = self.settings.manifest.len(), "Caching core assets");

    let entries = try_join_all(self.settings.manifest.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let response = self
        .fetcher
        .fetch(&request)
        .await
        .map_err(|source| WorkerError::Install {
          generation: generation.to_string(),
          source,
        })?;

      if response.status != 200 {
        return Err(WorkerError::BadAsset {
          generation: generation.to_string(),
          url: url.to_string(),
          status: response.status,
        });
      }

      Ok::<_, WorkerError>((request.identity(), response))
    }))
    .await?;

    self.storage.put_all(generation, &entries).await?;
    Ok(entries.len())
  }

  /// Delete every stale generation of this application, then claim clients.
  ///
  /// Refuses to run unless an install of the current generation completed.
  /// Entries cached lazily while serving requests do not count.
  pub async fn activate(&self) -> Result<ActivateOutcome, WorkerError> {
    let mut state = self.lifecycle.lock().await;
    let generation = self.settings.cache_name();

    if !self.storage.is_complete(&generation).await? {
      return Err(WorkerError::NotInstalled { generation });
    }

    let previous = *state;
    *state = LifecycleState::Activating;
    info!(generation = %generation, "Activating new version");

    let deleted = match self.delete_stale().await {
      Ok(deleted) => deleted,
      Err(e) => {
        *state = previous;
        return Err(e);
      }
    };

    info!("Claiming clients");
    *state = LifecycleState::Activated;

    Ok(ActivateOutcome {
      generation,
      deleted,
      clients_claimed: true,
    })
  }

  async fn delete_stale(&self) -> Result<Vec<String>, WorkerError> {
    let stale: Vec<String> = self
      .storage
      .generations()
      .await?
      .into_iter()
      .filter(|name| self.settings.is_stale(name))
      .collect();

    try_join_all(stale.iter().map(|name| async move {
      info!(generation = %name, "Deleting old cache");
      self.storage.delete_generation(name).await
    }))
    .await?;

    Ok(stale)
  }
}
