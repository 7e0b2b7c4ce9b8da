use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use iso_orchestrator::config::{load_config, AssembleConfig, DEFAULT_CONFIG_FILENAME};
use iso_orchestrator::preflight::check_host_tools;
use iso_orchestrator::{HostRunner, Orchestrator};
use tracing_subscriber::EnvFilter;

struct Options {
    config: Option<PathBuf>,
    preflight: bool,
}

fn usage() -> &'static str {
    "Usage:\n  iso-orchestrator [--config <assemble.toml>] [--skip-preflight]\n\n\
     Runs every module build step under the source root, stages the files\n\
     their manifests declare, and builds a bootable ISO.\n\n\
     Without --config, ./assemble.toml is used when present."
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", usage());
        return ExitCode::SUCCESS;
    }

    match parse_args(&args).and_then(run) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("! {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options {
        config: None,
        preflight: true,
    };
    let mut rest = args.iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--config" => {
                let path = rest.next().context("--config needs a path")?;
                options.config = Some(PathBuf::from(path));
            }
            "--skip-preflight" => options.preflight = false,
            other => bail!("unexpected argument '{}'\n\n{}", other, usage()),
        }
    }
    Ok(options)
}

fn resolve_config(explicit: Option<&Path>) -> Result<AssembleConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    let cwd = std::env::current_dir().context("resolving current directory")?;
    let default = cwd.join(DEFAULT_CONFIG_FILENAME);
    if default.is_file() {
        load_config(&default)
    } else {
        Ok(AssembleConfig::with_base(&cwd))
    }
}

fn run(options: Options) -> Result<()> {
    let config = resolve_config(options.config.as_deref())?;
    if options.preflight {
        check_host_tools(&config).context("preflight")?;
    }

    tracing::info!(
        source_root = %config.source_root.display(),
        staging = %config.staging_dir.display(),
        "executing module build steps"
    );

    let report = Orchestrator::new(config, HostRunner)
        .run()
        .map_err(|e| anyhow::anyhow!("[{}] {}", e.stage(), e))?;

    let collisions = report.collisions().count();
    if collisions > 0 {
        tracing::warn!(collisions, "some staged files were overwritten by later steps");
    }
    println!(
        "! Done: {} steps, {} files staged. Image at {} (checksum {})",
        report.steps.len(),
        report.placements.len(),
        report.image.display(),
        report.checksum.display()
    );
    Ok(())
}
