//! imgmatrix-lib: build matrix and toolchain provisioning logic.
//!
//! This crate provides the two halves of the `imgmatrix` tool:
//! - `Provisioner`: installs a compiler channel with a component, a target and a linker tool
//! - `build_all`: expands distribution × library × channel axes into container images
//!
//! All machine side effects go through the `Toolchain` and `ContainerEngine`
//! traits, which shell out via [`exec`].

pub mod build;
pub mod config;
pub mod consts;
pub mod engine;
pub mod exec;
pub mod image;
pub mod matrix;
pub mod provision;
pub mod template;
pub mod toolchain;
