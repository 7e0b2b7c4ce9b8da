//! Build step discovery.
//!
//! A build step is any directory under the source root containing the
//! entry-point file (`build.py` by default). Discovery walks the tree with
//! `walkdir`, sorted by file name so the order is the same on every run and
//! every platform. That order is also the tie-break order for placement
//! collisions.

use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::error::{AssembleError, Result};
use crate::paths::{absolute, normalize};

/// One module build step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    /// Working directory relative to the source root, `.` for the root itself.
    pub name: String,
    /// Working directory the step runs in.
    pub dir: PathBuf,
    /// Full path of the entry-point file.
    pub entry_point: PathBuf,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Restartable description of a discovery walk.
///
/// The root and the excluded directories are held as absolute, normalized
/// paths so exclusions match however the caller spelled them.
#[derive(Debug, Clone)]
pub struct StepDiscovery {
    root: PathBuf,
    entry_point: String,
    excluded: Vec<PathBuf>,
}

impl StepDiscovery {
    pub fn new(root: impl Into<PathBuf>, entry_point: impl Into<String>) -> Self {
        let root: PathBuf = root.into();
        Self {
            root: absolute(&root),
            entry_point: entry_point.into(),
            excluded: Vec::new(),
        }
    }

    /// Skip `path` and everything below it.
    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        let path: PathBuf = path.into();
        self.excluded.push(absolute(&path));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a fresh lazy walk. Each call begins again from the root.
    pub fn iter(&self) -> impl Iterator<Item = Result<BuildStep>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| !self.is_skipped(entry))
            .filter_map(move |entry| match entry {
                Ok(entry) => self.step_for(&entry).map(Ok),
                Err(source) => Some(Err(AssembleError::Walk {
                    root: self.root.clone(),
                    source,
                })),
            })
    }

    /// Collect every step, failing when there are none.
    pub fn discover(&self) -> Result<Vec<BuildStep>> {
        let steps = self.iter().collect::<Result<Vec<_>>>()?;
        if steps.is_empty() {
            return Err(AssembleError::Discovery {
                root: self.root.clone(),
                entry_point: self.entry_point.clone(),
            });
        }
        Ok(steps)
    }

    fn is_skipped(&self, entry: &DirEntry) -> bool {
        if !entry.file_type().is_dir() || entry.depth() == 0 {
            return false;
        }
        let hidden = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false);
        if hidden {
            return true;
        }
        let path = normalize(entry.path());
        self.excluded.iter().any(|excluded| *excluded == path)
    }

    fn step_for(&self, entry: &DirEntry) -> Option<BuildStep> {
        if !entry.file_type().is_file() || entry.file_name() != self.entry_point.as_str() {
            return None;
        }
        let dir = entry.path().parent()?.to_path_buf();
        let name = match dir.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => dir.display().to_string(),
        };
        Some(BuildStep {
            name,
            dir,
            entry_point: entry.path().to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "print('{}')\n").unwrap();
    }

    fn names(discovery: &StepDiscovery) -> Vec<String> {
        discovery
            .discover()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect()
    }

    #[test]
    fn finds_nested_steps_in_sorted_order() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "prebuilt/build.py");
        touch(temp.path(), "kernel/core/build.py");
        touch(temp.path(), "drivers/ahci/build.py");
        touch(temp.path(), "drivers/ahci/helper.py");

        let discovery = StepDiscovery::new(temp.path(), "build.py");
        assert_eq!(
            names(&discovery),
            vec!["drivers/ahci", "kernel/core", "prebuilt"]
        );
    }

    #[test]
    fn step_records_dir_and_entry_point() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "prebuilt/build.py");

        let steps = StepDiscovery::new(temp.path(), "build.py")
            .discover()
            .unwrap();
        assert_eq!(steps[0].dir, temp.path().join("prebuilt"));
        assert_eq!(steps[0].entry_point, temp.path().join("prebuilt/build.py"));
    }

    #[test]
    fn step_at_root_is_named_dot() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "build.py");
        assert_eq!(names(&StepDiscovery::new(temp.path(), "build.py")), vec!["."]);
    }

    #[test]
    fn iteration_is_restartable() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "a/build.py");
        touch(temp.path(), "b/build.py");

        let discovery = StepDiscovery::new(temp.path(), "build.py");
        let first: Vec<_> = discovery.iter().map(|s| s.unwrap().name).collect();
        let second: Vec<_> = discovery.iter().map(|s| s.unwrap().name).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn no_steps_is_a_discovery_error() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "docs/README.py");

        let err = StepDiscovery::new(temp.path(), "build.py")
            .discover()
            .unwrap_err();
        assert!(matches!(err, AssembleError::Discovery { .. }));
        assert!(err.to_string().contains("build.py"));
    }

    #[test]
    fn hidden_and_excluded_directories_are_skipped() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "module/build.py");
        touch(temp.path(), ".git/hooks/build.py");
        touch(temp.path(), "cache/iso_root/MASTER/build.py");

        let discovery =
            StepDiscovery::new(temp.path(), "build.py").exclude(temp.path().join("cache/iso_root"));
        assert_eq!(names(&discovery), vec!["module"]);
    }

    #[test]
    fn exclusions_match_however_the_root_is_spelled() {
        let temp = tempfile::Builder::new()
            .prefix("discovery-root")
            .tempdir_in(".")
            .unwrap();
        let name = Path::new(temp.path().file_name().unwrap()).to_path_buf();
        touch(temp.path(), "m/build.py");
        touch(temp.path(), "cache/iso_root/MASTER/old/build.py");

        let discovery = StepDiscovery::new(Path::new(".").join(&name), "build.py")
            .exclude(name.join("cache/iso_root"));
        assert_eq!(names(&discovery), vec!["m"]);
        assert!(discovery.root().is_absolute());
    }

    #[test]
    fn directory_named_like_entry_point_is_not_a_step() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("odd/build.py")).unwrap();
        touch(temp.path(), "real/build.py");
        assert_eq!(names(&StepDiscovery::new(temp.path(), "build.py")), vec!["real"]);
    }
}
