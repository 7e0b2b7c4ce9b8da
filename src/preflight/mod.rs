//! Preflight checks for the host toolchain.
//!
//! Verifies that the image tool, the bootloader installer and the build step
//! interpreter are on `PATH` before any module is built, so a missing tool
//! fails in a second instead of after every module has compiled.
//!
//! # Example
//!
//! ```rust
//! use iso_orchestrator::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("xorriso") {
//!     println!("xorriso not installed");
//! }
//!
//! let tools = &[("xorriso", "xorriso"), ("limine", "limine")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

use crate::config::AssembleConfig;

/// Check if a command exists on the host system.
///
/// Absolute or relative paths are checked directly; bare names are looked
/// up in `PATH`.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools a run with `config` will invoke, as (command, package) pairs.
pub fn required_tools(config: &AssembleConfig) -> Vec<(String, String)> {
    let mut tools = vec![
        (config.image.program.clone(), "xorriso".to_string()),
        (config.bootloader.program.clone(), "limine".to_string()),
    ];
    if let Some(interpreter) = config.interpreter.first() {
        tools.push((interpreter.clone(), interpreter.clone()));
    }
    tools
}

/// Check that specific tools are available.
///
/// Returns every missing tool in one error rather than stopping at the
/// first.
pub fn check_required_tools<S: AsRef<str>>(tools: &[(S, S)]) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool.as_ref()))
        .map(|(tool, package)| format!("  {} (install: {})", tool.as_ref(), package.as_ref()))
        .collect();

    if !missing.is_empty() {
        bail!("Missing required host tools:\n{}", missing.join("\n"));
    }

    Ok(())
}

/// Check every tool [`required_tools`] lists for `config`.
pub fn check_host_tools(config: &AssembleConfig) -> Result<()> {
    check_required_tools(&required_tools(config))
}
