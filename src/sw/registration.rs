//! Hosting side: version handoff and request routing to the active controller.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, RwLock};
use tracing::info;

use super::controller::{ActivateReport, Controller, FetchOutcome, InstallReport, LifecycleState};
use crate::cache::CacheResult;
use crate::net::{Fetcher, Request, Response};

/// Result of registering a new controller version
#[derive(Debug, Clone)]
pub struct Handoff {
  pub install: InstallReport,
  /// Present when the controller took over
  pub activate: Option<ActivateReport>,
  /// Version that was active before, now redundant
  pub replaced: Option<String>,
}

/// Owns the active controller and delivers lifecycle events to new versions.
pub struct Registration {
  fetcher: Arc<dyn Fetcher>,
  active: RwLock<Option<Arc<Controller>>>,
}

impl Registration {
  pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
    Self {
      fetcher,
      active: RwLock::new(None),
    }
  }

  /// Install `controller` and, once it asks to skip waiting, activate it in
  /// place of the current one.
  ///
  /// A failed install leaves the current controller in charge.
  pub async fn register(&self, controller: Arc<Controller>) -> Result<Handoff> {
    let install = controller.install().await?;

    if !install.skip_waiting {
      info!(version = %controller.version(), "Installed, waiting for clients to close");
      return Ok(Handoff {
        install,
        activate: None,
        replaced: None,
      });
    }

    let activate = controller.activate().await?;
    let replaced = self.take_over(&controller, &activate)?;

    Ok(Handoff {
      install,
      activate: Some(activate),
      replaced,
    })
  }

  /// Adopt a controller whose version was installed by an earlier process.
  ///
  /// Returns `None` when the version's partitions are not present, leaving the
  /// current controller in charge.
  pub async fn resume(&self, controller: Arc<Controller>) -> Result<Option<ActivateReport>> {
    if controller.restore()? != LifecycleState::InstalledWaiting {
      return Ok(None);
    }

    let activate = controller.activate().await?;
    self.take_over(&controller, &activate)?;
    Ok(Some(activate))
  }

  /// Make `controller` the active one, retiring its predecessor
  fn take_over(
    &self,
    controller: &Arc<Controller>,
    activate: &ActivateReport,
  ) -> Result<Option<String>> {
    let previous = {
      let mut active = self
        .active
        .write()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      active.replace(Arc::clone(controller))
    };

    if activate.claim_clients {
      info!(version = %controller.version(), "Controlling open clients");
    }

    Ok(previous.map(|old| {
      old.retire();
      old.version().to_string()
    }))
  }

  pub fn active(&self) -> Option<Arc<Controller>> {
    self.active.read().ok().and_then(|active| active.clone())
  }

  pub fn active_version(&self) -> Option<String> {
    self.active().map(|c| c.version().to_string())
  }

  pub fn state(&self) -> Option<LifecycleState> {
    self.active().map(|c| c.state())
  }

  /// Route a request through the active controller.
  ///
  /// Without a controller, or when it does not intercept, the request goes to
  /// the network untouched.
  pub async fn fetch(&self, request: &Request) -> Result<CacheResult<Response>> {
    let Some(controller) = self.active() else {
      return self.network(request).await;
    };

    match controller.handle_fetch(request).await? {
      FetchOutcome::Passthrough => self.network(request).await,
      FetchOutcome::Respond(result) => Ok(result),
    }
  }

  async fn network(&self, request: &Request) -> Result<CacheResult<Response>> {
    self.fetcher.fetch(request).await.map(CacheResult::from_network)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, CacheStorage, MemoryStorage, PartitionNames};
  use crate::event;
  use crate::route::{BypassRules, Router};
  use crate::testing::ScriptedFetcher;
  use reqwest::Method;
  use url::Url;

  const ORIGIN: &str = "https://wallet.example";

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn controller(
    version: &str,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<ScriptedFetcher>,
  ) -> Arc<Controller> {
    let (tx, _events) = event::channel();
    Arc::new(Controller::new(
      Router::new(BypassRules::default()).unwrap(),
      PartitionNames::new("nurpay", version),
      vec![url("/"), url("/index.html")],
      storage,
      fetcher,
      tx,
    ))
  }

  #[tokio::test]
  async fn test_no_controller_goes_to_network() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(url("/assets/app.js").as_str(), 200, "js");
    let registration = Registration::new(fetcher.clone());

    let response = registration
      .fetch(&Request::get(url("/assets/app.js")))
      .await
      .unwrap();
    assert_eq!(response.data.body, "js");
    assert_eq!(response.source, CacheSource::Network);
    assert_eq!(registration.active_version(), None);
    assert_eq!(registration.state(), None);
  }

  #[tokio::test]
  async fn test_passthrough_reaches_network_unchanged() {
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(url("/").as_str(), 200, "root");
    fetcher.respond(url("/index.html").as_str(), 200, "index");
    fetcher.respond(url("/api/send").as_str(), 201, "created");

    let registration = Registration::new(fetcher.clone());
    registration
      .register(controller("v1", storage.clone(), fetcher.clone()))
      .await
      .unwrap();

    let request = Request::get(url("/api/send")).with_method(Method::POST);
    let direct = fetcher.fetch(&request).await.unwrap();
    let routed = registration.fetch(&request).await.unwrap();
    assert_eq!(routed.data, direct);
    assert_eq!(routed.source, CacheSource::Network);
    assert_eq!(fetcher.calls_for(url("/api/send").as_str()), 2);
  }

  #[tokio::test]
  async fn test_version_bump_replaces_and_prunes() {
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(url("/").as_str(), 200, "root");
    fetcher.respond(url("/index.html").as_str(), 200, "index");

    let registration = Registration::new(fetcher.clone());
    let v1 = controller("v1", storage.clone(), fetcher.clone());
    let handoff = registration.register(v1.clone()).await.unwrap();
    assert_eq!(handoff.replaced, None);
    assert_eq!(registration.active_version().as_deref(), Some("v1"));

    let v2 = controller("v2", storage.clone(), fetcher.clone());
    let handoff = registration.register(v2.clone()).await.unwrap();
    assert_eq!(handoff.replaced.as_deref(), Some("v1"));
    assert_eq!(v1.state(), LifecycleState::Redundant);
    assert_eq!(v2.state(), LifecycleState::Active);

    assert_eq!(
      storage.keys().unwrap(),
      vec!["nurpay-v2-static", "nurpay-v2-dynamic"]
    );

    // The new version serves the shell offline
    fetcher.set_online(false);
    let response = registration
      .fetch(&Request::navigate(url("/home")))
      .await
      .unwrap();
    assert_eq!(response.data.body, "index");
    assert_eq!(response.source, CacheSource::Offline);
  }

  #[tokio::test]
  async fn test_failed_install_keeps_current_controller() {
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let registration = Registration::new(fetcher.clone());

    let v1 = controller("v1", storage.clone(), fetcher.clone());
    registration.register(v1.clone()).await.unwrap();

    // Registering the same instance again is out of order
    assert!(registration.register(v1.clone()).await.is_err());
    assert_eq!(registration.active_version().as_deref(), Some("v1"));
    assert_eq!(v1.state(), LifecycleState::Active);
  }

  #[tokio::test]
  async fn test_resume_adopts_installed_version() {
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(url("/").as_str(), 200, "root");
    fetcher.respond(url("/index.html").as_str(), 200, "index");

    // An earlier process installed v1
    Registration::new(fetcher.clone())
      .register(controller("v1", storage.clone(), fetcher.clone()))
      .await
      .unwrap();

    let registration = Registration::new(fetcher.clone());
    let report = registration
      .resume(controller("v1", storage.clone(), fetcher.clone()))
      .await
      .unwrap();
    assert_eq!(report.map(|r| r.deleted), Some(vec![]));
    assert_eq!(registration.active_version().as_deref(), Some("v1"));
    assert_eq!(registration.state(), Some(LifecycleState::Active));

    fetcher.set_online(false);
    let response = registration
      .fetch(&Request::navigate(url("/wallet")))
      .await
      .unwrap();
    assert_eq!(response.data.body, "index");
    assert_eq!(response.source, CacheSource::Offline);
  }

  #[tokio::test]
  async fn test_resume_without_install_keeps_network_routing() {
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let registration = Registration::new(fetcher.clone());

    let report = registration
      .resume(controller("v3", storage.clone(), fetcher))
      .await
      .unwrap();
    assert!(report.is_none());
    assert_eq!(registration.active_version(), None);
    assert!(storage.keys().unwrap().is_empty());
  }
}
