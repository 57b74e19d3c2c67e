//! Offline asset cache controller: install, activate and fetch hooks.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheKey, CacheLayer, CacheResult, CacheStorage, PartitionNames};
use crate::event::EventSender;
use crate::net::{Fetcher, Request, Response};
use crate::route::{Route, Router};

/// Lifecycle of one controller version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Uninstalled,
  Installing,
  /// Shell population attempted, waiting to take over
  InstalledWaiting,
  Activating,
  Active,
  /// Superseded by a newer version, or failed to install
  Redundant,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Uninstalled => "uninstalled",
      Self::Installing => "installing",
      Self::InstalledWaiting => "installed-waiting",
      Self::Activating => "activating",
      Self::Active => "active",
      Self::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// A shell resource that could not be cached
#[derive(Debug, Clone)]
pub struct ShellFailure {
  pub url: String,
  pub reason: String,
}

#[derive(Debug, Clone)]
pub struct InstallReport {
  /// Shell URLs now in the static partition
  pub cached: Vec<String>,
  pub failed: Vec<ShellFailure>,
  /// Take over without waiting for the previous version's clients to go away
  pub skip_waiting: bool,
}

#[derive(Debug, Clone)]
pub struct ActivateReport {
  /// Stale partitions removed
  pub deleted: Vec<String>,
  /// Start controlling already open clients right away
  pub claim_clients: bool,
}

/// What the host should do with a request
#[derive(Debug)]
pub enum FetchOutcome {
  /// Not intercepted, forward the request untouched
  Passthrough,
  /// Use this response
  Respond(CacheResult<Response>),
}

/// The controller for one cache version.
pub struct Controller {
  router: Router,
  cache: CacheLayer,
  fetcher: Arc<dyn Fetcher>,
  shell: Vec<Url>,
  state: Mutex<LifecycleState>,
}

impl Controller {
  pub fn new(
    router: Router,
    names: PartitionNames,
    shell: Vec<Url>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    events: EventSender,
  ) -> Self {
    Self {
      router,
      cache: CacheLayer::new(storage, names, events),
      fetcher,
      shell,
      state: Mutex::new(LifecycleState::Uninstalled),
    }
  }

  pub fn version(&self) -> &str {
    self.cache.names().version()
  }

  pub fn names(&self) -> &PartitionNames {
    self.cache.names()
  }

  pub fn state(&self) -> LifecycleState {
    self
      .state
      .lock()
      .map(|s| *s)
      .unwrap_or(LifecycleState::Redundant)
  }

  fn set_state(&self, next: LifecycleState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let previous = *state;
    debug!(version = %self.version(), from = %previous, to = %next, "Lifecycle transition");
    *state = next;
    Ok(())
  }

  fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let current = *state;
    if current != from {
      return Err(eyre!(
        "Cannot enter {} from {} (expected {})",
        to,
        current,
        from
      ));
    }
    debug!(version = %self.version(), from = %from, to = %to, "Lifecycle transition");
    *state = to;
    Ok(())
  }

  /// Install hook: create the partitions and pre-populate the app shell.
  ///
  /// Individual shell failures are logged and reported, never fatal. Only a
  /// storage that cannot open the partitions fails the install, which leaves
  /// the controller redundant.
  pub async fn install(&self) -> Result<InstallReport> {
    self.transition(LifecycleState::Uninstalled, LifecycleState::Installing)?;

    match self.populate_shell().await {
      Ok(report) => {
        self.set_state(LifecycleState::InstalledWaiting)?;
        info!(
          version = %self.version(),
          cached = report.cached.len(),
          failed = report.failed.len(),
          "Installed"
        );
        Ok(report)
      }
      Err(e) => {
        self.set_state(LifecycleState::Redundant)?;
        Err(e)
      }
    }
  }

  async fn populate_shell(&self) -> Result<InstallReport> {
    let static_name = self.names().static_name();
    for partition in self.names().current() {
      self.cache.storage().open(&partition)?;
    }

    let fetches = self.shell.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let result = self.fetcher.fetch(&request).await;
      (request, result)
    });

    let mut cached = Vec::new();
    let mut failed = Vec::new();

    for (request, result) in join_all(fetches).await {
      let key = CacheKey::for_request(&request);
      let outcome = match result {
        Ok(response) if response.is_cacheable() => self
          .cache
          .storage()
          .put(&static_name, &key, &response)
          .map_err(|e| e.to_string()),
        Ok(response) => Err(format!("status {}", response.status)),
        Err(e) => Err(e.to_string()),
      };

      match outcome {
        Ok(()) => cached.push(key.url),
        Err(reason) => {
          warn!(url = %key.url, "Shell resource failed to cache: {}", reason);
          failed.push(ShellFailure {
            url: key.url,
            reason,
          });
        }
      }
    }

    Ok(InstallReport {
      cached,
      failed,
      skip_waiting: true,
    })
  }

  /// Pick up an install made by an earlier process.
  ///
  /// Lifecycle state does not outlive the process, but partitions do. When both
  /// partitions of this version exist the controller is treated as installed
  /// and waiting. Otherwise it stays uninstalled.
  pub fn restore(&self) -> Result<LifecycleState> {
    let keys = self.cache.storage().keys()?;
    let installed = self
      .names()
      .current()
      .iter()
      .all(|name| keys.contains(name));

    if installed {
      self.transition(LifecycleState::Uninstalled, LifecycleState::InstalledWaiting)?;
    }
    Ok(self.state())
  }

  /// Activate hook: delete every partition of ours that belongs to another version.
  pub async fn activate(&self) -> Result<ActivateReport> {
    self.transition(LifecycleState::InstalledWaiting, LifecycleState::Activating)?;

    match self.prune_stale() {
      Ok(deleted) => {
        self.set_state(LifecycleState::Active)?;
        info!(version = %self.version(), deleted = deleted.len(), "Activated");
        Ok(ActivateReport {
          deleted,
          claim_clients: true,
        })
      }
      Err(e) => {
        // Leave it waiting so activation can be retried
        self.set_state(LifecycleState::InstalledWaiting)?;
        Err(e)
      }
    }
  }

  fn prune_stale(&self) -> Result<Vec<String>> {
    let storage = self.cache.storage();
    let stale: Vec<String> = storage
      .keys()?
      .into_iter()
      .filter(|name| self.names().is_stale(name))
      .collect();

    for name in &stale {
      storage.delete(name)?;
      info!(partition = %name, "Deleted stale partition");
    }

    Ok(stale)
  }

  /// Superseded by a newer version.
  pub fn retire(&self) {
    if let Err(e) = self.set_state(LifecycleState::Redundant) {
      warn!("Failed to retire controller: {}", e);
    }
  }

  /// Fetch hook.
  ///
  /// Network errors propagate when no cached fallback exists. For navigations
  /// the network error is returned, not a cache miss.
  pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome> {
    let route = self.router.classify(request);
    debug!(method = %request.method, url = %request.url, ?route, "Fetch");

    let key = CacheKey::for_request(request);
    let fetch = || self.fetcher.fetch(request);

    let result = match route {
      Route::Passthrough => return Ok(FetchOutcome::Passthrough),
      Route::Bypass => {
        if let Some(pattern) = self.router.bypass().matching(request) {
          debug!(url = %key.url, pattern, "Bypassing cache");
        }
        CacheResult::from_network(fetch().await?)
      }
      Route::Navigation => {
        let fallbacks = [
          CacheKey::get(&request.url.join("/index.html")?),
          CacheKey::get(&request.url.join("/")?),
        ];
        self
          .cache
          .network_first(&key, &self.names().static_name(), &fallbacks, fetch)
          .await?
      }
      Route::StaticAsset => {
        self
          .cache
          .cache_first(&key, &self.names().dynamic_name(), fetch)
          .await?
      }
      Route::Default => {
        self
          .cache
          .network_first(
            &key,
            &self.names().dynamic_name(),
            std::slice::from_ref(&key),
            fetch,
          )
          .await?
      }
    };

    Ok(FetchOutcome::Respond(result))
  }

  /// Wait for background cache writes issued so far.
  pub async fn flush(&self) {
    self.cache.flush().await;
  }
}
