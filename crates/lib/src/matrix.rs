//! Build matrix expansion.
//!
//! An [`AxisSet`] holds three ordered axes: distributions, library versions
//! and channel versions. [`AxisSet::targets`] walks their cartesian product
//! lazily, distributions outermost and channel versions innermost. Each
//! [`BuildTarget`] has an identity string (see [`Naming`]) that doubles as
//! the rendered file stem and the image name suffix.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::iter::FusedIterator;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::consts::{
  CHANNEL_TOKEN, DEFAULT_CHANNEL_LABEL, DEFAULT_DISTRIBUTIONS, DEFAULT_LIBRARY_LABEL, DISTRIBUTION_TOKEN,
  DOCKERFILE_SUFFIX, LIBRARY_TOKEN,
};
use crate::template::Bindings;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
  #[error("axis '{0}' has no values")]
  EmptyAxis(&'static str),
}

/// An OS distribution release, e.g. `ubuntu` `18.04`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Distribution {
  pub family: String,
  pub version: String,
}

impl Distribution {
  pub fn new(family: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      family: family.into(),
      version: version.into(),
    }
  }

  /// The fixed distribution set used unless a config file overrides it.
  pub fn defaults() -> Vec<Self> {
    DEFAULT_DISTRIBUTIONS
      .iter()
      .map(|(family, version)| Self::new(*family, *version))
      .collect()
  }
}

impl fmt::Display for Distribution {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}", self.family, self.version)
  }
}

/// Labels that prefix the library and channel parts of a target identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Naming {
  pub library_label: String,
  pub channel_label: String,
}

impl Default for Naming {
  fn default() -> Self {
    Self {
      library_label: DEFAULT_LIBRARY_LABEL.to_string(),
      channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
    }
  }
}

impl Naming {
  /// Identity string for a target, e.g. `ubuntu18.04-cuda10.1-nightly2020-05-01`.
  pub fn identity(&self, target: &BuildTarget) -> String {
    format!(
      "{}-{}{}-{}{}",
      target.distribution, self.library_label, target.library_version, self.channel_label, target.channel_version
    )
  }

  /// File name of the rendered build file for an identity.
  pub fn rendered_file_name(&self, identity: &str) -> String {
    format!("{identity}{DOCKERFILE_SUFFIX}")
  }

  /// Whether `name` follows the rendered build file convention.
  ///
  /// Templates (`ubuntu.Dockerfile`) and unrelated files never match.
  pub fn is_rendered_file_name(&self, name: &str) -> bool {
    let Some(stem) = name.strip_suffix(DOCKERFILE_SUFFIX) else {
      return false;
    };
    let library_marker = format!("-{}", self.library_label);
    let channel_marker = format!("-{}", self.channel_label);

    match stem.find(&library_marker) {
      Some(pos) if pos > 0 => stem[pos + library_marker.len()..].contains(&channel_marker),
      _ => false,
    }
  }
}

/// Placeholder tokens substituted into templates, one per axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tokens {
  pub distribution: String,
  pub library: String,
  pub channel: String,
}

impl Default for Tokens {
  fn default() -> Self {
    Self {
      distribution: DISTRIBUTION_TOKEN.to_string(),
      library: LIBRARY_TOKEN.to_string(),
      channel: CHANNEL_TOKEN.to_string(),
    }
  }
}

/// One concrete combination of axis values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BuildTarget {
  pub distribution: Distribution,
  pub library_version: String,
  pub channel_version: String,
}

impl BuildTarget {
  pub fn identity(&self, naming: &Naming) -> String {
    naming.identity(self)
  }

  /// Token bindings used to render this target's template.
  pub fn bindings(&self, tokens: &Tokens) -> Bindings {
    Bindings::new()
      .bind(&tokens.distribution, &self.distribution.version)
      .bind(&tokens.library, &self.library_version)
      .bind(&tokens.channel, &self.channel_version)
  }
}

/// The three build axes. Every axis is non-empty and holds no repeated values,
/// so no two targets share an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisSet {
  distributions: Vec<Distribution>,
  library_versions: Vec<String>,
  channel_versions: Vec<String>,
}

impl AxisSet {
  /// Repeated values are dropped, keeping the first occurrence.
  pub fn new(
    distributions: Vec<Distribution>,
    library_versions: Vec<String>,
    channel_versions: Vec<String>,
  ) -> Result<Self, MatrixError> {
    let distributions = unique_values("distributions", distributions);
    let library_versions = unique_values("library_versions", library_versions);
    let channel_versions = unique_values("channel_versions", channel_versions);

    if distributions.is_empty() {
      return Err(MatrixError::EmptyAxis("distributions"));
    }
    if library_versions.is_empty() {
      return Err(MatrixError::EmptyAxis("library_versions"));
    }
    if channel_versions.is_empty() {
      return Err(MatrixError::EmptyAxis("channel_versions"));
    }
    Ok(Self {
      distributions,
      library_versions,
      channel_versions,
    })
  }

  pub fn distributions(&self) -> &[Distribution] {
    &self.distributions
  }

  pub fn library_versions(&self) -> &[String] {
    &self.library_versions
  }

  pub fn channel_versions(&self) -> &[String] {
    &self.channel_versions
  }

  /// Number of targets in the product.
  pub fn len(&self) -> usize {
    self.distributions.len() * self.library_versions.len() * self.channel_versions.len()
  }

  /// Never true for a constructed set.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Lazily enumerate every target. Calling this again restarts from the beginning.
  pub fn targets(&self) -> Targets<'_> {
    Targets { axes: self, next: 0 }
  }
}

fn unique_values<T: Eq + Hash + Clone + fmt::Debug>(axis: &'static str, values: Vec<T>) -> Vec<T> {
  let mut seen = HashSet::with_capacity(values.len());
  values
    .into_iter()
    .filter(|value| {
      let first = seen.insert(value.clone());
      if !first {
        warn!(axis, value = ?value, "ignoring repeated axis value");
      }
      first
    })
    .collect()
}

/// Iterator over the cartesian product of an [`AxisSet`].
#[derive(Debug, Clone)]
pub struct Targets<'a> {
  axes: &'a AxisSet,
  next: usize,
}

impl Iterator for Targets<'_> {
  type Item = BuildTarget;

  fn next(&mut self) -> Option<Self::Item> {
    if self.next >= self.axes.len() {
      return None;
    }

    let channels = self.axes.channel_versions.len();
    let libraries = self.axes.library_versions.len();
    let index = self.next;
    self.next += 1;

    Some(BuildTarget {
      distribution: self.axes.distributions[index / (libraries * channels)].clone(),
      library_version: self.axes.library_versions[(index / channels) % libraries].clone(),
      channel_version: self.axes.channel_versions[index % channels].clone(),
    })
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let remaining = self.axes.len().saturating_sub(self.next);
    (remaining, Some(remaining))
  }
}

impl ExactSizeIterator for Targets<'_> {}

impl FusedIterator for Targets<'_> {}
