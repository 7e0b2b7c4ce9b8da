use std::path::{Component, Path, PathBuf};

/// Resolve a configured path against `base` and normalize it lexically.
pub(crate) fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Anchor a relative path at the current directory and normalize it.
///
/// Tools run with their own working directory, so every path handed to them
/// must be absolute. When the current directory cannot be read the path is
/// only normalized.
pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => normalize(&cwd.join(path)),
        Err(_) => normalize(path),
    }
}

/// Drop `.` components and fold `..` into its parent without touching the
/// filesystem, so configured paths compare equal to walked paths.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_join_the_base() {
        assert_eq!(
            resolve_path(Path::new("/src/os"), Path::new("cache/iso_root")),
            PathBuf::from("/src/os/cache/iso_root")
        );
    }

    #[test]
    fn absolute_paths_ignore_the_base() {
        assert_eq!(
            resolve_path(Path::new("/src/os"), Path::new("/var/tmp/iso")),
            PathBuf::from("/var/tmp/iso")
        );
    }

    #[test]
    fn dots_are_folded() {
        assert_eq!(
            resolve_path(Path::new("/src/os/."), Path::new("./modules/../build")),
            PathBuf::from("/src/os/build")
        );
        assert_eq!(normalize(Path::new(".")), PathBuf::from("."));
        assert_eq!(normalize(Path::new("../../x")), PathBuf::from("../../x"));
        assert_eq!(normalize(Path::new("/../x")), PathBuf::from("/x"));
    }

    #[test]
    fn relative_paths_become_absolute_under_the_current_dir() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(absolute(Path::new("./cache/../build")), cwd.join("build"));
        assert_eq!(absolute(Path::new(".")), normalize(&cwd));
        assert_eq!(absolute(Path::new("/var/./tmp")), PathBuf::from("/var/tmp"));
    }
}
