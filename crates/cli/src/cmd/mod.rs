mod build_matrix;
mod provision;

pub use build_matrix::{MatrixAction, cmd_build_matrix};
pub use provision::cmd_provision;
