//! Orchestrator configuration.
//!
//! Resolved once at start-up and passed to [`crate::pipeline::Orchestrator`]
//! by value. An optional `assemble.toml` overrides the defaults; every field
//! is optional and relative paths are resolved against the directory the
//! file lives in.
//!
//! ```toml
//! source_root = "."
//! staging_dir = "cache/iso_root"
//! output_dir = "build"
//! image_name = "live.iso"
//! entry_point = "build.py"
//! interpreter = ["python3"]
//! step_timeout_secs = 900
//! workers = 1
//! clean_staging = true
//!
//! [image]
//! program = "xorriso"
//! bios_boot = "boot/limine/limine-bios-cd.bin"
//! uefi_boot = "boot/limine/limine-uefi-cd.bin"
//!
//! [bootloader]
//! program = "limine"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::artifact::iso::{BootloaderOptions, IsoOptions};
use crate::paths::{absolute, resolve_path};

pub const DEFAULT_CONFIG_FILENAME: &str = "assemble.toml";
pub const DEFAULT_ENTRY_POINT: &str = "build.py";
pub const DEFAULT_STAGING_DIR: &str = "cache/iso_root";
pub const DEFAULT_OUTPUT_DIR: &str = "build";
pub const DEFAULT_IMAGE_NAME: &str = "live.iso";

/// Everything one run needs. Paths are absolute once built through
/// [`AssembleConfig::with_base`] or [`load_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleConfig {
    /// Tree scanned for build steps.
    pub source_root: PathBuf,
    /// Root of the staging tree.
    pub staging_dir: PathBuf,
    pub output_dir: PathBuf,
    pub image_name: String,
    /// File name that marks a build step directory.
    pub entry_point: String,
    /// Command prefix used to run the entry point; empty runs it directly.
    pub interpreter: Vec<String>,
    pub step_timeout: Option<Duration>,
    /// Build steps run concurrently; `1` is strictly sequential.
    pub workers: usize,
    /// Wipe the staging tree before placing anything.
    pub clean_staging: bool,
    pub image: IsoOptions,
    pub bootloader: BootloaderOptions,
}

impl AssembleConfig {
    /// Defaults laid out under `base`; a relative `base` is taken from the
    /// current directory.
    pub fn with_base(base: &Path) -> Self {
        let base = absolute(base);
        let base = base.as_path();
        Self {
            source_root: resolve_path(base, Path::new(".")),
            staging_dir: resolve_path(base, Path::new(DEFAULT_STAGING_DIR)),
            output_dir: resolve_path(base, Path::new(DEFAULT_OUTPUT_DIR)),
            image_name: DEFAULT_IMAGE_NAME.to_string(),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            interpreter: vec!["python3".to_string()],
            step_timeout: None,
            workers: 1,
            clean_staging: true,
            image: IsoOptions::default(),
            bootloader: BootloaderOptions::default(),
        }
    }

    pub fn image_path(&self) -> PathBuf {
        self.output_dir.join(&self.image_name)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AssembleToml {
    source_root: Option<PathBuf>,
    staging_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    image_name: Option<String>,
    entry_point: Option<String>,
    interpreter: Option<Vec<String>>,
    step_timeout_secs: Option<u64>,
    workers: Option<usize>,
    clean_staging: Option<bool>,
    image: Option<ImageToml>,
    bootloader: Option<BootloaderToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImageToml {
    program: Option<String>,
    bios_boot: Option<String>,
    uefi_boot: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BootloaderToml {
    program: Option<String>,
}

/// Load `config_path`, resolving relative paths against its directory.
pub fn load_config(config_path: &Path) -> Result<AssembleConfig> {
    let text = fs::read_to_string(config_path)
        .with_context(|| format!("reading config '{}'", config_path.display()))?;
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parse_config(&text, base)
        .with_context(|| format!("invalid config '{}'", config_path.display()))
}

/// Parse config text; `base` anchors relative paths.
pub fn parse_config(text: &str, base: &Path) -> Result<AssembleConfig> {
    let parsed: AssembleToml = toml::from_str(text).context("parsing TOML")?;
    let base = absolute(base);
    let base = base.as_path();
    let mut config = AssembleConfig::with_base(base);

    if let Some(path) = parsed.source_root {
        config.source_root = resolve_path(base, &path);
    }
    if let Some(path) = parsed.staging_dir {
        config.staging_dir = resolve_path(base, &path);
    }
    if let Some(path) = parsed.output_dir {
        config.output_dir = resolve_path(base, &path);
    }
    if let Some(name) = parsed.image_name {
        if name.is_empty() || name.contains('/') {
            bail!("image_name must be a plain file name, got '{}'", name);
        }
        config.image_name = name;
    }
    if let Some(entry_point) = parsed.entry_point {
        if entry_point.is_empty() || entry_point.contains('/') {
            bail!("entry_point must be a plain file name, got '{}'", entry_point);
        }
        config.entry_point = entry_point;
    }
    if let Some(interpreter) = parsed.interpreter {
        if interpreter.iter().any(|part| part.is_empty()) {
            bail!("interpreter must not contain empty arguments");
        }
        config.interpreter = interpreter;
    }
    if let Some(secs) = parsed.step_timeout_secs {
        if secs == 0 {
            bail!("step_timeout_secs must be greater than zero (omit it to disable the timeout)");
        }
        config.step_timeout = Some(Duration::from_secs(secs));
    }
    if let Some(workers) = parsed.workers {
        if workers == 0 {
            bail!("workers must be at least 1");
        }
        config.workers = workers;
    }
    if let Some(clean) = parsed.clean_staging {
        config.clean_staging = clean;
    }
    if let Some(image) = parsed.image {
        if let Some(program) = image.program {
            config.image.program = program;
        }
        if let Some(bios_boot) = image.bios_boot {
            config.image.bios_boot = bios_boot;
        }
        if let Some(uefi_boot) = image.uefi_boot {
            config.image.uefi_boot = uefi_boot;
        }
    }
    if let Some(bootloader) = parsed.bootloader {
        if let Some(program) = bootloader.program {
            config.bootloader.program = program;
        }
    }

    if config.source_root.starts_with(&config.staging_dir) {
        bail!(
            "staging_dir '{}' must not contain source_root '{}'",
            config.staging_dir.display(),
            config.source_root.display()
        );
    }

    Ok(config)
}
