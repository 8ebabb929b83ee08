//! Configuration loading.
//!
//! Values are layered, later layers winning:
//!
//! 1. built-in defaults (see [`crate::consts`])
//! 2. an optional `imgmatrix.toml` file
//! 3. environment variables (`IMGMATRIX_*`, `CI_COMMIT_REF_SLUG`)
//! 4. command line overrides
//!
//! Axis values are opaque strings and are never validated beyond being
//! present.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::build::{BuildMode, BuildOptions};
use crate::consts::{
  CONFIG_FILENAME, DEFAULT_CHANNEL_VERSIONS, DEFAULT_ENGINE, DEFAULT_LIBRARY_VERSIONS, DEFAULT_REGISTRY,
  DEFAULT_TAG_SLUG,
};
use crate::matrix::{AxisSet, Distribution, MatrixError, Naming, Tokens};
use crate::provision::ProvisionSpec;

pub const ENV_REGISTRY: &str = "IMGMATRIX_REGISTRY";
pub const ENV_TAG: &str = "CI_COMMIT_REF_SLUG";
pub const ENV_ENGINE: &str = "IMGMATRIX_ENGINE";
pub const ENV_JOBS: &str = "IMGMATRIX_JOBS";
pub const ENV_LIBRARY_VERSIONS: &str = "IMGMATRIX_LIBRARY_VERSIONS";
pub const ENV_CHANNEL_VERSIONS: &str = "IMGMATRIX_CHANNEL_VERSIONS";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid value for {var}: '{value}' is not a positive integer")]
  InvalidJobs { var: &'static str, value: String },

  #[error(transparent)]
  Matrix(#[from] MatrixError),
}

/// Contents of `imgmatrix.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
  pub registry: Option<String>,
  pub tag: Option<String>,
  pub engine: Option<String>,
  pub jobs: Option<usize>,
  pub template_dir: Option<PathBuf>,
  pub work_dir: Option<PathBuf>,
  pub context_dir: Option<PathBuf>,
  pub distributions: Option<Vec<Distribution>>,
  pub library_versions: Option<Vec<String>>,
  pub channel_versions: Option<Vec<String>>,
  pub naming: Naming,
  pub tokens: Tokens,
  pub provision: ProvisionFileConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionFileConfig {
  pub component: Option<String>,
  pub target: Option<String>,
  pub tool: Option<String>,
  pub rustup: Option<String>,
  pub cargo: Option<String>,
}

impl FileConfig {
  pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load an explicitly named config file. A missing file is an error.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), "loaded config file");
    Self::parse(&content, path)
  }

  /// Load `imgmatrix.toml` from `dir` if it exists, defaults otherwise.
  pub fn load_default(dir: &Path) -> Result<Self, ConfigError> {
    let path = dir.join(CONFIG_FILENAME);
    if path.is_file() {
      Self::load(&path)
    } else {
      debug!(path = %path.display(), "no config file, using defaults");
      Ok(Self::default())
    }
  }

  /// Load `explicit` if given, else fall back to [`FileConfig::load_default`] in the current directory.
  pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    match explicit {
      Some(path) => Self::load(path),
      None => Self::load_default(Path::new(".")),
    }
  }
}

/// Values taken from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
  pub registry: Option<String>,
  pub tag: Option<String>,
  pub engine: Option<String>,
  pub jobs: Option<usize>,
  pub library_versions: Option<Vec<String>>,
  pub channel_versions: Option<Vec<String>>,
}

impl EnvConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    let jobs = match non_empty_var(ENV_JOBS) {
      Some(value) => Some(parse_jobs(ENV_JOBS, &value)?),
      None => None,
    };

    Ok(Self {
      registry: non_empty_var(ENV_REGISTRY),
      tag: non_empty_var(ENV_TAG),
      engine: non_empty_var(ENV_ENGINE),
      jobs,
      library_versions: non_empty_var(ENV_LIBRARY_VERSIONS).map(|v| split_list(&v)),
      channel_versions: non_empty_var(ENV_CHANNEL_VERSIONS).map(|v| split_list(&v)),
    })
  }
}

fn non_empty_var(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn split_list(value: &str) -> Vec<String> {
  value.split_whitespace().map(str::to_string).collect()
}

fn parse_jobs(var: &'static str, value: &str) -> Result<usize, ConfigError> {
  match value.trim().parse::<usize>() {
    Ok(n) if n > 0 => Ok(n),
    _ => Err(ConfigError::InvalidJobs {
      var,
      value: value.to_string(),
    }),
  }
}

/// Command line overrides for a matrix run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixOverrides {
  pub registry: Option<String>,
  pub tag: Option<String>,
  pub engine: Option<String>,
  pub jobs: Option<usize>,
  pub template_dir: Option<PathBuf>,
  pub work_dir: Option<PathBuf>,
  pub library_versions: Vec<String>,
  pub channel_versions: Vec<String>,
  pub only: Vec<String>,
  pub mode: BuildMode,
}

/// Fully resolved settings for a matrix run.
#[derive(Debug, Clone)]
pub struct MatrixConfig {
  pub axes: AxisSet,
  pub registry: String,
  pub tag: String,
  pub engine: String,
  pub options: BuildOptions,
}

impl MatrixConfig {
  pub fn resolve(file: FileConfig, env: EnvConfig, cli: MatrixOverrides) -> Result<Self, ConfigError> {
    fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
      (!values.is_empty()).then_some(values)
    }

    let defaults = |values: &[&str]| values.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let library_versions = non_empty(cli.library_versions)
      .or(env.library_versions)
      .or(file.library_versions)
      .unwrap_or_else(|| defaults(DEFAULT_LIBRARY_VERSIONS));
    let channel_versions = non_empty(cli.channel_versions)
      .or(env.channel_versions)
      .or(file.channel_versions)
      .unwrap_or_else(|| defaults(DEFAULT_CHANNEL_VERSIONS));
    let distributions = file.distributions.unwrap_or_else(Distribution::defaults);

    let axes = AxisSet::new(distributions, library_versions, channel_versions)?;

    let work_dir = cli.work_dir.or(file.work_dir).unwrap_or_else(|| PathBuf::from("."));
    let template_dir = cli
      .template_dir
      .or(file.template_dir)
      .unwrap_or_else(|| PathBuf::from("."));
    let context_dir = file.context_dir.unwrap_or_else(|| work_dir.clone());

    let options = BuildOptions {
      template_dir,
      work_dir,
      context_dir,
      naming: file.naming,
      tokens: file.tokens,
      jobs: cli.jobs.or(env.jobs).or(file.jobs).unwrap_or(1).max(1),
      mode: cli.mode,
      only: cli.only,
    };

    Ok(Self {
      axes,
      registry: cli
        .registry
        .or(env.registry)
        .or(file.registry)
        .unwrap_or_else(|| DEFAULT_REGISTRY.to_string()),
      tag: cli
        .tag
        .or(env.tag)
        .or(file.tag)
        .unwrap_or_else(|| DEFAULT_TAG_SLUG.to_string()),
      engine: cli
        .engine
        .or(env.engine)
        .or(file.engine)
        .unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
      options,
    })
  }
}

/// Command line overrides for provisioning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionOverrides {
  pub component: Option<String>,
  pub target: Option<String>,
  pub tool: Option<String>,
}

/// Fully resolved provisioning settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionConfig {
  pub spec: ProvisionSpec,
  pub rustup: String,
  pub cargo: String,
}

impl ProvisionConfig {
  pub fn resolve(file: FileConfig, cli: ProvisionOverrides) -> Self {
    let defaults = ProvisionSpec::default();
    let spec = ProvisionSpec {
      component: cli.component.or(file.provision.component).unwrap_or(defaults.component),
      target: cli.target.or(file.provision.target).unwrap_or(defaults.target),
      tool: cli.tool.or(file.provision.tool).unwrap_or(defaults.tool),
    };

    Self {
      spec,
      rustup: file.provision.rustup.unwrap_or_else(|| "rustup".to_string()),
      cargo: file.provision.cargo.unwrap_or_else(|| "cargo".to_string()),
    }
  }
}
