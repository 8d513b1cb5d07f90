//! Kiln core library.
//!
//! Kiln scans a C/C++ source tree, plans object files and binaries for a
//! build variant, lets extensions inject their own steps, and executes the
//! resulting [`recipe::Recipe`] incrementally with bounded parallelism.
//!
//! The planning pipeline lives in [`pipeline`], execution in [`scheduler`],
//! and [`runner`] ties both together for the command line front end.

pub mod cli;
pub mod context;
pub mod extension;
pub mod fingerprint;
pub mod pipeline;
pub mod plan;
pub mod process;
pub mod recipe;
pub mod runner;
pub mod scan;
pub mod scheduler;
pub mod status;
pub mod toolchain;
pub mod variant;
