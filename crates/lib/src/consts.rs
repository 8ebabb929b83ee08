//! Application-wide constants and built-in defaults.

/// Name of the config file looked up in the working directory.
pub const CONFIG_FILENAME: &str = "imgmatrix.toml";

/// Suffix shared by templates and rendered build files.
pub const DOCKERFILE_SUFFIX: &str = ".Dockerfile";

pub const DEFAULT_REGISTRY: &str = "registry.gitlab.com/termoshtt/accel";

/// Tag slug used when neither the CLI nor `CI_COMMIT_REF_SLUG` provides one.
pub const DEFAULT_TAG_SLUG: &str = "manual";

pub const DEFAULT_ENGINE: &str = "docker";

pub const DEFAULT_LIBRARY_VERSIONS: &[&str] = &["10.0", "10.1", "10.2"];

pub const DEFAULT_CHANNEL_VERSIONS: &[&str] = &["2020-01-02", "2020-05-01"];

/// The fixed distribution set as `(family, version)` pairs, in build order.
pub const DEFAULT_DISTRIBUTIONS: &[(&str, &str)] = &[("ubuntu", "18.04"), ("centos", "6"), ("centos", "7")];

pub const DEFAULT_LIBRARY_LABEL: &str = "cuda";
pub const DEFAULT_CHANNEL_LABEL: &str = "nightly";

pub const DISTRIBUTION_TOKEN: &str = "DISTRIBUTION_VERSION";
pub const LIBRARY_TOKEN: &str = "LIBRARY_VERSION";
pub const CHANNEL_TOKEN: &str = "CHANNEL_VERSION";

pub const DEFAULT_COMPONENT: &str = "rustfmt";
pub const DEFAULT_TARGET: &str = "nvptx64-nvidia-cuda";
pub const DEFAULT_TOOL: &str = "ptx-linker";
