//! Test utilities for kiln.
//!
//! [`ProjectTree`] builds throwaway project directories; the `exec` helpers
//! write shell scripts standing in for compilers and other tools.

pub mod exec;
pub mod project;

pub use exec::{
    failing_tool, fake_compiler, make_executable, sleeping_tool, trapping_sleeper, write_exec,
};
pub use project::ProjectTree;
