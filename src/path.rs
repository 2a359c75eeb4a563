//! Detecting container paths inside ordinary filesystem paths.

use std::path::{Path, PathBuf};

/// Extension that marks a path component as a mounted container.
pub const CONTAINER_EXT: &str = "opak";

/// A filesystem path split at its container boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPath {
    /// Path of the container file itself.
    pub container: PathBuf,
    /// Remainder inside the container; empty for the container root.
    pub inner: PathBuf,
}

/// Split `path` at the first component carrying the container extension.
///
/// Returns `None` for paths that touch no container.  A directory named
/// `<name>.opak.unpacked` does not match — its extension is `unpacked` —
/// so unpacked siblings stay ordinary filesystem paths.
pub fn split_path(path: &Path) -> Option<SplitPath> {
    let mut container = PathBuf::new();
    let mut components = path.components();
    for comp in components.by_ref() {
        container.push(comp);
        if Path::new(comp.as_os_str()).extension().is_some_and(|e| e == CONTAINER_EXT) {
            let inner: PathBuf = components.collect();
            return Some(SplitPath { container, inner });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_at_container_component() {
        let split = split_path(Path::new("/opt/app/resources.opak/js/app.js")).unwrap();
        assert_eq!(split.container, Path::new("/opt/app/resources.opak"));
        assert_eq!(split.inner, Path::new("js/app.js"));
    }

    #[test]
    fn container_itself_has_empty_inner() {
        let split = split_path(Path::new("bundle.opak")).unwrap();
        assert_eq!(split.container, Path::new("bundle.opak"));
        assert_eq!(split.inner, Path::new(""));
    }

    #[test]
    fn plain_paths_do_not_split() {
        assert!(split_path(Path::new("/usr/share/fonts/mono.ttf")).is_none());
    }

    #[test]
    fn unpacked_sibling_is_not_a_container() {
        assert!(split_path(Path::new("/opt/app/resources.opak.unpacked/native.so")).is_none());
    }
}
