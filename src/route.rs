//! Request classification: which caching strategy applies to a request
use color_eyre::{eyre::eyre, Result};
use regex_lite::Regex;
use reqwest::Method;

use crate::net::Request;

/// Requests that must always reach the network uncached: admin routes,
/// API calls, backend canister hosts and bundler internals.
pub const DEFAULT_BYPASS_PATTERNS: &[&str] = &[
  r"^/admin",
  r"/api/",
  r"ic0\.app",
  r"icp0\.io",
  r"localhost:\d+/api",
  r"canister",
  r"\?canisterId",
  r"__webpack",
];

/// Marker for files under the bundler's output directory
const ASSETS_MARKER: &str = "/assets/";

/// Scripts, styles, images, icons and fonts, optionally followed by a query string
const STATIC_ASSET_PATTERN: &str = r"\.(js|css|png|jpg|jpeg|gif|svg|ico|woff|woff2|ttf|eot)(\?.*)?$";

/// How the controller handles a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted (non-GET)
  Passthrough,
  /// Straight to network, no cache read or write
  Bypass,
  /// Network-first into the static partition, shell fallback
  Navigation,
  /// Cache-first into the dynamic partition
  StaticAsset,
  /// Network-first into the dynamic partition, exact-match fallback
  Default,
}

/// Ordered bypass patterns. Each is tested against the path and the full URL.
#[derive(Debug, Clone)]
pub struct BypassRules {
  patterns: Vec<Regex>,
}

impl BypassRules {
  pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
    let patterns = patterns
      .iter()
      .map(|p| {
        Regex::new(p.as_ref()).map_err(|e| eyre!("Invalid bypass pattern '{}': {}", p.as_ref(), e))
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self { patterns })
  }

  /// The first pattern matching the request, if any
  pub fn matching(&self, request: &Request) -> Option<&str> {
    let path = request.url.path();
    let full = request.fetch_url();

    self
      .patterns
      .iter()
      .find(|p| p.is_match(path) || p.is_match(&full))
      .map(|p| p.as_str())
  }
}

impl Default for BypassRules {
  fn default() -> Self {
    Self {
      patterns: DEFAULT_BYPASS_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect(),
    }
  }
}

/// Pure classifier over method, URL and navigation flag
#[derive(Debug, Clone)]
pub struct Router {
  bypass: BypassRules,
  static_asset: Regex,
}

impl Router {
  pub fn new(bypass: BypassRules) -> Result<Self> {
    let static_asset = Regex::new(STATIC_ASSET_PATTERN)
      .map_err(|e| eyre!("Invalid static asset pattern: {}", e))?;

    Ok(Self {
      bypass,
      static_asset,
    })
  }

  /// Decide the route. The first matching rule wins:
  /// method, bypass, navigation, static asset, then default.
  pub fn classify(&self, request: &Request) -> Route {
    if request.method != Method::GET {
      return Route::Passthrough;
    }

    if self.bypass.matching(request).is_some() {
      return Route::Bypass;
    }

    if request.is_navigation() {
      return Route::Navigation;
    }

    let url = request.fetch_url();
    if url.contains(ASSETS_MARKER) || self.static_asset.is_match(&url) {
      return Route::StaticAsset;
    }

    Route::Default
  }

  pub fn bypass(&self) -> &BypassRules {
    &self.bypass
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn router() -> Router {
    Router::new(BypassRules::default()).unwrap()
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_default_patterns_compile() {
    let rules = BypassRules::new(DEFAULT_BYPASS_PATTERNS).unwrap();
    assert_eq!(rules.patterns.len(), DEFAULT_BYPASS_PATTERNS.len());
    assert_eq!(
      BypassRules::default().patterns.len(),
      DEFAULT_BYPASS_PATTERNS.len()
    );
  }

  #[test]
  fn test_invalid_pattern_is_rejected() {
    assert!(BypassRules::new(&["(unclosed"]).is_err());
  }

  #[test]
  fn test_non_get_passes_through() {
    let router = router();
    for method in [Method::POST, Method::PUT, Method::DELETE, Method::HEAD] {
      let request = get("https://wallet.example/assets/app.js").with_method(method);
      assert_eq!(router.classify(&request), Route::Passthrough);
    }
  }

  #[test]
  fn test_bypass_routes() {
    let router = router();
    let bypassed = [
      "https://wallet.example/admin",
      "https://wallet.example/admin/dashboard",
      "https://wallet.example/api/transactions",
      "https://rwlgt-iiaaa-aaaaa-aaaaa-cai.ic0.app/",
      "https://boundary.icp0.io/api/v2/status",
      "http://localhost:4943/api/v2/canister/x/query",
      "https://wallet.example/?canisterId=rrkah-fqaaa-aaaaa-aaaaq-cai",
      "https://wallet.example/__webpack_hmr",
    ];
    for url in bypassed {
      assert_eq!(router.classify(&get(url)), Route::Bypass, "{}", url);
    }

    // Bypass wins over navigation and asset rules
    let nav = Request::navigate(Url::parse("https://wallet.example/admin/login").unwrap());
    assert_eq!(router.classify(&nav), Route::Bypass);
    assert_eq!(
      router.classify(&get("https://wallet.example/api/logo.png")),
      Route::Bypass
    );
  }

  #[test]
  fn test_admin_anchor_applies_to_path_only() {
    let router = router();
    // "/admin" not at the start of the path
    assert_eq!(
      router.classify(&get("https://wallet.example/help/admin")),
      Route::Default
    );
  }

  #[test]
  fn test_navigation() {
    let router = router();
    let nav = Request::navigate(Url::parse("https://wallet.example/send-money").unwrap());
    assert_eq!(router.classify(&nav), Route::Navigation);
  }

  #[test]
  fn test_static_assets() {
    let router = router();
    let assets = [
      "https://wallet.example/assets/index-4f2a.js",
      "https://wallet.example/assets/generated/nurpay-icon-192.dim_192x192.png",
      "https://wallet.example/assets/data.json",
      "https://wallet.example/styles.css",
      "https://wallet.example/fonts/inter.woff2",
      "https://wallet.example/favicon.ico",
      "https://wallet.example/logo.svg?v=3",
      "https://wallet.example/photo.JPEG.jpeg",
    ];
    for url in assets {
      assert_eq!(router.classify(&get(url)), Route::StaticAsset, "{}", url);
    }
  }

  #[test]
  fn test_default_route() {
    let router = router();
    let other = [
      "https://wallet.example/manifest.json",
      "https://wallet.example/history",
      "https://wallet.example/app.jsx",
      "https://wallet.example/notes.css.map",
    ];
    for url in other {
      assert_eq!(router.classify(&get(url)), Route::Default, "{}", url);
    }
  }

  #[test]
  fn test_matching_reports_pattern() {
    let rules = BypassRules::default();
    assert_eq!(
      rules.matching(&get("https://wallet.example/api/balance")),
      Some(r"/api/")
    );
    assert_eq!(rules.matching(&get("https://wallet.example/home")), None);
  }
}
