use std::fmt;

use serde::{Serialize, Serializer};

/// A fully qualified image reference: `<registry>/<name>:<tag>`.
///
/// Serializes as the same string it displays as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
  pub registry: String,
  pub name: String,
  pub tag: String,
}

impl ImageReference {
  /// A trailing `/` on the registry root is dropped.
  pub fn new(registry: &str, name: impl Into<String>, tag: impl Into<String>) -> Self {
    Self {
      registry: registry.trim_end_matches('/').to_string(),
      name: name.into(),
      tag: tag.into(),
    }
  }
}

impl fmt::Display for ImageReference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}:{}", self.registry, self.name, self.tag)
  }
}

impl Serialize for ImageReference {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}
