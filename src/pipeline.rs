//! The assembly run.
//!
//! ```text
//! discover ─► for each step: run ─► parse manifest ─► place files
//!                                                        │
//!                     (all steps placed) ◄───────────────┘
//!                            │
//!                 assemble ISO ─► install bootloader ─► checksum
//! ```
//!
//! The first error stops the run; nothing after it is attempted and files
//! already placed stay where they are.
//!
//! With `workers > 1` steps run and validate on a pool of scoped threads,
//! but only the calling thread writes to the staging tree and it applies
//! results strictly in discovery order. Collisions therefore resolve the
//! same way as in a sequential run: the later step in discovery order wins.

use crossbeam_channel::unbounded;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::artifact::iso;
use crate::config::AssembleConfig;
use crate::discovery::{BuildStep, StepDiscovery};
use crate::error::{AssembleError, Result};
use crate::manifest::{parse_manifest, Manifest};
use crate::process::{CommandRunner, Invocation};
use crate::staging::{Placement, StagingTree};

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct AssemblyReport {
    pub steps: Vec<String>,
    pub placements: Vec<Placement>,
    pub image: PathBuf,
    pub checksum: PathBuf,
}

impl AssemblyReport {
    /// Placements that overwrote another step's file.
    pub fn collisions(&self) -> impl Iterator<Item = &Placement> {
        self.placements.iter().filter(|p| p.replaced.is_some())
    }
}

pub struct Orchestrator<R> {
    config: AssembleConfig,
    runner: R,
}

impl<R: CommandRunner> Orchestrator<R> {
    pub fn new(config: AssembleConfig, runner: R) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &AssembleConfig {
        &self.config
    }

    pub fn discovery(&self) -> StepDiscovery {
        StepDiscovery::new(&self.config.source_root, &self.config.entry_point)
            .exclude(&self.config.staging_dir)
            .exclude(&self.config.output_dir)
    }

    /// Run the whole pipeline.
    pub fn run(&self) -> Result<AssemblyReport> {
        let mut staging = StagingTree::new(&self.config.staging_dir);
        let _lock = staging.lock()?;
        staging.prepare(self.config.clean_staging, &self.config.source_root)?;

        let steps = self.discovery().discover()?;
        tracing::info!(count = steps.len(), "discovered build steps");

        let placements = if self.config.workers > 1 && steps.len() > 1 {
            self.build_pooled(&steps, &mut staging)?
        } else {
            self.build_sequential(&steps, &mut staging)?
        };
        tracing::info!(files = placements.len(), "all modules built");

        let image = self.config.image_path();
        iso::assemble_image(&self.runner, staging.root(), &image, &self.config.image)?;
        iso::install_bootloader(&self.runner, &image, &self.config.bootloader)?;
        let checksum = iso::write_image_checksum(&image)?;

        Ok(AssemblyReport {
            steps: steps.into_iter().map(|s| s.name).collect(),
            placements,
            image,
            checksum,
        })
    }

    fn build_sequential(
        &self,
        steps: &[BuildStep],
        staging: &mut StagingTree,
    ) -> Result<Vec<Placement>> {
        let mut placements = Vec::new();
        for step in steps {
            let manifest = self.build_step(step)?;
            placements.extend(staging.place_manifest(step, &manifest)?);
        }
        Ok(placements)
    }

    fn build_pooled(
        &self,
        steps: &[BuildStep],
        staging: &mut StagingTree,
    ) -> Result<Vec<Placement>> {
        let workers = self.config.workers.min(steps.len());
        let cancelled = AtomicBool::new(false);
        let (job_tx, job_rx) = unbounded::<usize>();
        let (result_tx, result_rx) = unbounded::<(usize, Result<Manifest>)>();
        for index in 0..steps.len() {
            // Receiver is alive; send cannot fail here.
            let _ = job_tx.send(index);
        }
        drop(job_tx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let cancelled = &cancelled;
                scope.spawn(move || {
                    for index in job_rx.iter() {
                        if cancelled.load(Ordering::SeqCst) {
                            break;
                        }
                        let result = self.build_step(&steps[index]);
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            // Coordinator: apply results in discovery order.
            let mut pending = BTreeMap::new();
            let mut next = 0;
            let mut placements = Vec::new();
            let outcome = (|| -> Result<()> {
                for (index, result) in result_rx.iter() {
                    pending.insert(index, result);
                    while let Some(result) = pending.remove(&next) {
                        let manifest = result?;
                        placements.extend(staging.place_manifest(&steps[next], &manifest)?);
                        next += 1;
                    }
                }
                Ok(())
            })();
            if outcome.is_err() {
                cancelled.store(true, Ordering::SeqCst);
            }
            drop(result_rx);
            outcome.map(|()| placements)
        })
    }

    /// Run one step and validate what it printed.
    fn build_step(&self, step: &BuildStep) -> Result<Manifest> {
        let invocation = self.step_invocation(step);
        tracing::info!(step = %step.name, "running {}", invocation.command_line());

        let output = self
            .runner
            .run(&invocation)
            .map_err(|e| AssembleError::Execution {
                step: step.name.clone(),
                reason: format!("could not launch '{}': {e}", invocation.command_line()),
            })?;

        let stderr = output.stderr.trim_end();
        if !stderr.is_empty() {
            tracing::debug!(step = %step.name, "stderr:\n{}", stderr);
        }
        if !output.success() {
            return Err(AssembleError::Execution {
                step: step.name.clone(),
                reason: output.failure_reason(invocation.timeout),
            });
        }

        let manifest = parse_manifest(&step.name, &output.stdout)?;
        tracing::debug!(step = %step.name, entries = manifest.len(), "manifest accepted");
        Ok(manifest)
    }

    fn step_invocation(&self, step: &BuildStep) -> Invocation {
        let entry = step
            .entry_point
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config.entry_point.clone());

        let invocation = match self.config.interpreter.split_first() {
            Some((program, args)) => Invocation::new(program, &step.dir)
                .args(args.iter().cloned())
                .arg(entry),
            None => Invocation::new(step.entry_point.to_string_lossy(), &step.dir),
        };
        invocation.timeout(self.config.step_timeout)
    }
}
