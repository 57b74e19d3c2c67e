//! Request and response values exchanged with the network and the cache.

use bytes::Bytes;
use reqwest::Method;
use url::Url;

/// What a request is for, as seen by the hosting runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Loading a new top-level document
  Navigate,
  /// Scripts, styles, images, API calls...
  #[default]
  Subresource,
}

/// An outgoing request issued by the application shell.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
}

impl Request {
  /// A plain GET for a subresource.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Subresource,
      headers: Vec::new(),
    }
  }

  /// A top-level document load.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// The URL as the fetch layer sees it: fragments never leave the client.
  pub fn fetch_url(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.into()
  }
}

/// A response snapshot.
///
/// Header values are kept as raw bytes, since HTTP does not require them to be
/// UTF-8. The body is reference counted, so cloning a response yields an independent
/// readable copy without copying the payload. One copy goes to the caller and
/// another to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, Vec<u8>)>,
  pub body: Bytes,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Only a plain 200 is worth keeping. Redirects, errors and opaque
  /// responses (status 0) are never stored.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fetch_url_drops_fragment() {
    let url = Url::parse("https://wallet.example/history?page=2#top").unwrap();
    let request = Request::get(url);
    assert_eq!(request.fetch_url(), "https://wallet.example/history?page=2");
  }

  #[test]
  fn test_only_200_is_cacheable() {
    assert!(Response::new(200, "ok").is_cacheable());
    assert!(!Response::new(0, "").is_cacheable());
    assert!(!Response::new(204, "").is_cacheable());
    assert!(!Response::new(304, "").is_cacheable());
    assert!(!Response::new(404, "missing").is_cacheable());
  }
}
