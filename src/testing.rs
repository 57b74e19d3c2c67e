//! Scripted network for tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::net::{Fetcher, Request, Response};

/// Fetcher answering from a table of canned responses.
///
/// Unknown URLs and every request while offline are rejected. Every call is
/// recorded, including rejected ones.
pub struct ScriptedFetcher {
  routes: Mutex<HashMap<String, Option<Response>>>,
  calls: Mutex<Vec<(String, String)>>,
  online: AtomicBool,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
      online: AtomicBool::new(true),
    }
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Some(Response::new(status, body.to_string())));
  }

  /// Make `url` a network failure
  pub fn fail(&self, url: &str) {
    self.routes.lock().unwrap().insert(url.to_string(), None);
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Number of attempts for `url`, any method
  pub fn calls_for(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(_, u)| u == url)
      .count()
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.fetch_url();
    self
      .calls
      .lock()
      .unwrap()
      .push((request.method.to_string(), url.clone()));

    if !self.online.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch {}: network unreachable", url));
    }

    match self.routes.lock().unwrap().get(&url) {
      Some(Some(response)) => Ok(response.clone()),
      Some(None) => Err(eyre!("Failed to fetch {}: connection reset", url)),
      None => Err(eyre!("Failed to fetch {}: no route", url)),
    }
  }
}
