//! Partition naming derived from the cache version.

/// Names of the two partitions owned by one cache version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
  prefix: String,
  version: String,
}

impl PartitionNames {
  pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      version: version.into(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// App shell and navigated documents, e.g. `nurpay-v1-static`
  pub fn static_name(&self) -> String {
    format!("{}-{}-static", self.prefix, self.version)
  }

  /// Runtime assets and fallbacks, e.g. `nurpay-v1-dynamic`
  pub fn dynamic_name(&self) -> String {
    format!("{}-{}-dynamic", self.prefix, self.version)
  }

  /// Both current names, static first.
  pub fn current(&self) -> [String; 2] {
    [self.static_name(), self.dynamic_name()]
  }

  /// A partition of ours that belongs to another version.
  /// Partitions of other applications are left alone.
  pub fn is_stale(&self, name: &str) -> bool {
    let ours = name
      .strip_prefix(self.prefix.as_str())
      .is_some_and(|rest| rest.starts_with('-'));
    ours && !self.current().iter().any(|current| current == name)
  }
}
