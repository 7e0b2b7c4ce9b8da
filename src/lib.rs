//! Module build orchestration and ISO assembly.
//!
//! Every module in the source tree owns a build step (a `build.py` by
//! default). The orchestrator runs each step, reads the JSON manifest it
//! prints, copies the declared files into a staging tree, and finally turns
//! that tree into a hybrid BIOS/UEFI ISO with `xorriso` and `limine`.
//!
//! # Architecture
//!
//! ```text
//! discovery   walk the source tree for build steps
//!     │
//! process     run each step (CommandRunner), capture stdout
//!     │
//! manifest    validate stdout against the closed category schema
//!     │
//! staging     copy declared files into generic/boot/master/addon roots
//!     │
//! artifact    xorriso image, limine bios-install, sha256 checksum
//! ```
//!
//! [`pipeline::Orchestrator`] drives the whole run; [`config`] resolves the
//! settings it needs once, up front.
//!
//! # Example
//!
//! ```rust,no_run
//! use iso_orchestrator::{AssembleConfig, HostRunner, Orchestrator};
//! use std::path::Path;
//!
//! let config = AssembleConfig::with_base(Path::new("."));
//! let report = Orchestrator::new(config, HostRunner).run()?;
//! println!("image at {}", report.image.display());
//! # Ok::<(), iso_orchestrator::AssembleError>(())
//! ```

pub mod artifact;
pub mod config;
pub mod discovery;
pub mod error;
pub mod manifest;
mod paths;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod staging;

#[cfg(test)]
mod test_support;

pub use config::AssembleConfig;
pub use discovery::{BuildStep, StepDiscovery};
pub use error::{AssembleError, Result};
pub use manifest::{Category, Manifest};
pub use pipeline::{AssemblyReport, Orchestrator};
pub use process::{CommandRunner, HostRunner, Invocation};
