//! Staging tree and file placement.
//!
//! The staging tree mirrors the final image layout:
//!
//! ```text
//! <root>/               generic
//! <root>/boot/          boot
//! <root>/MASTER/        master
//! <root>/MASTER/addons/ addon
//! ```
//!
//! Files are copied in, never moved, so module working directories stay
//! intact. Placements are not rolled back when a later step fails.

use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::discovery::BuildStep;
use crate::error::{AssembleError, Result};
use crate::manifest::{Category, Manifest, ManifestEntry};

const LOCK_FILENAME: &str = ".iso-orchestrator.lock";

/// A file copied into the staging tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub step: String,
    pub category: Category,
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Step whose earlier copy at `destination` was overwritten.
    pub replaced: Option<String>,
}

/// Exclusive hold on a staging tree for the lifetime of a run.
#[derive(Debug)]
pub struct StagingLock {
    _file: File,
    path: PathBuf,
}

impl StagingLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug)]
pub struct StagingTree {
    root: PathBuf,
    /// Destination path -> step that last wrote it.
    writers: HashMap<PathBuf, String>,
}

impl StagingTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writers: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category_root(&self, category: Category) -> PathBuf {
        match category.staging_subdir() {
            "" => self.root.clone(),
            sub => self.root.join(sub),
        }
    }

    /// Take the run lock, kept next to the staging root so it survives a clean.
    pub fn lock(&self) -> Result<StagingLock> {
        let parent = self.root.parent().ok_or_else(|| AssembleError::Staging {
            path: self.root.clone(),
            reason: "staging root has no parent directory for the lock file".to_string(),
        })?;
        fs::create_dir_all(parent)
            .map_err(|e| AssembleError::io("creating staging parent", parent, e))?;

        let path = parent.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| AssembleError::io("opening lock file", &path, e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(AssembleError::Staging {
                path: self.root.clone(),
                reason: format!(
                    "locked by another orchestrator run ({})",
                    path.display()
                ),
            });
        }

        Ok(StagingLock { _file: file, path })
    }

    /// Create the category roots, optionally wiping whatever a previous run
    /// left behind first.
    ///
    /// Refuses to wipe a staging root that contains `protected` (the source
    /// tree).
    pub fn prepare(&mut self, clean: bool, protected: &Path) -> Result<()> {
        if clean && self.root.exists() {
            if protected.starts_with(&self.root) {
                return Err(AssembleError::Staging {
                    path: self.root.clone(),
                    reason: format!(
                        "refusing to clean: it contains the source root '{}'",
                        protected.display()
                    ),
                });
            }
            tracing::debug!(root = %self.root.display(), "cleaning staging tree");
            fs::remove_dir_all(&self.root)
                .map_err(|e| AssembleError::io("removing stale staging tree", &self.root, e))?;
        }
        self.writers.clear();

        for category in Category::ALL {
            let dir = self.category_root(category);
            fs::create_dir_all(&dir)
                .map_err(|e| AssembleError::io("creating category root", &dir, e))?;
        }
        Ok(())
    }

    /// Place every entry of a validated manifest, in document order.
    pub fn place_manifest(&mut self, step: &BuildStep, manifest: &Manifest) -> Result<Vec<Placement>> {
        manifest
            .entries()
            .map(|(category, entry)| self.place(step, category, entry))
            .collect()
    }

    /// Copy one declared file into `<category root>/<subpath>/<basename>`.
    pub fn place(
        &mut self,
        step: &BuildStep,
        category: Category,
        entry: &ManifestEntry,
    ) -> Result<Placement> {
        let source = step.dir.join(&entry.source);
        let fail = |reason: String| AssembleError::Placement {
            step: step.name.clone(),
            category,
            subpath: entry.subpath.clone(),
            source_path: source.clone(),
            reason,
        };

        let metadata = fs::metadata(&source).map_err(|e| fail(format!("cannot stat source: {e}")))?;
        if !metadata.is_file() {
            return Err(fail("source is not a regular file".to_string()));
        }
        File::open(&source).map_err(|e| fail(format!("source is not readable: {e}")))?;
        let file_name = source
            .file_name()
            .ok_or_else(|| fail("source has no file name".to_string()))?;

        let dest_dir = self.category_root(category).join(&entry.subpath);
        let destination = dest_dir.join(file_name);

        fs::create_dir_all(&dest_dir)
            .map_err(|e| fail(format!("creating '{}': {e}", dest_dir.display())))?;
        if fs::symlink_metadata(&destination).is_ok() {
            fs::remove_file(&destination)
                .map_err(|e| fail(format!("replacing '{}': {e}", destination.display())))?;
        }
        fs::copy(&source, &destination)
            .map_err(|e| fail(format!("copying to '{}': {e}", destination.display())))?;
        preserve_mtime(&metadata, &destination);

        let replaced = self
            .writers
            .insert(destination.clone(), step.name.clone());
        if let Some(previous) = &replaced {
            tracing::warn!(
                destination = %destination.display(),
                previous = %previous,
                winner = %step.name,
                "destination collision; later step wins"
            );
        }
        tracing::info!(
            step = %step.name,
            "+ {} -> {}",
            source.display(),
            destination.display()
        );

        Ok(Placement {
            step: step.name.clone(),
            category,
            source,
            destination,
            replaced,
        })
    }
}

/// `fs::copy` keeps permission bits; carry the modification time over too.
fn preserve_mtime(source: &fs::Metadata, destination: &Path) {
    let Ok(modified) = source.modified() else {
        return;
    };
    let result = File::open(destination).and_then(|file| file.set_modified(modified));
    if let Err(e) = result {
        tracing::debug!(
            destination = %destination.display(),
            error = %e,
            "could not preserve modification time"
        );
    }
}
