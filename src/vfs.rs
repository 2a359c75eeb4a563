//! Virtual-filesystem shim: routes path-shaped calls either into a mounted
//! container or through to `std::fs`.
//!
//! The registry of open containers is an owned value constructed at startup
//! and threaded by reference — never a module-level singleton — so two
//! embedders with different keying never observe each other's archives.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::{Archive, ArchiveError, Result, Stat};
use crate::cipher::CipherContext;
use crate::path::{split_path, SplitPath};

// ── ArchiveRegistry ───────────────────────────────────────────────────────────

/// Cache of open containers, keyed by container path.  Opening is lazy and
/// each container is opened at most once per registry.
pub struct ArchiveRegistry {
    ctx: CipherContext,
    archives: HashMap<PathBuf, Arc<Archive>>,
}

impl ArchiveRegistry {
    pub fn new(ctx: CipherContext) -> Self {
        Self { ctx, archives: HashMap::new() }
    }

    pub fn get_or_open(&mut self, container: &Path) -> Result<Arc<Archive>> {
        if let Some(ar) = self.archives.get(container) {
            return Ok(Arc::clone(ar));
        }
        let ar = Arc::new(Archive::open_with_context(container, self.ctx.clone())?);
        self.archives.insert(container.to_owned(), Arc::clone(&ar));
        Ok(ar)
    }

    pub fn len(&self) -> usize {
        self.archives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }
}

// ── Vfs ───────────────────────────────────────────────────────────────────────

/// The shim itself.  Every operation accepts a full filesystem path; paths
/// falling inside a container are served from it, everything else passes
/// through to the real filesystem.
pub struct Vfs {
    registry: ArchiveRegistry,
}

impl Vfs {
    pub fn new(ctx: CipherContext) -> Self {
        Self { registry: ArchiveRegistry::new(ctx) }
    }

    pub fn registry(&self) -> &ArchiveRegistry {
        &self.registry
    }

    /// Read a whole file, decrypting container entries transparently.
    pub fn read(&mut self, path: &Path) -> Result<Vec<u8>> {
        match split_path(path) {
            Some(split) => {
                let ar = self.registry.get_or_open(&split.container)?;
                ar.read_file(&inner_str(&split))
            }
            None => Ok(fs::read(path)?),
        }
    }

    pub fn stat(&mut self, path: &Path) -> Result<Stat> {
        match split_path(path) {
            Some(split) => {
                let ar = self.registry.get_or_open(&split.container)?;
                ar.stat(&inner_str(&split))
            }
            None => {
                let meta = fs::symlink_metadata(path)?;
                Ok(Stat {
                    size: meta.len(),
                    offset: 0,
                    is_file: meta.is_file(),
                    is_directory: meta.is_dir(),
                    is_link: meta.file_type().is_symlink(),
                })
            }
        }
    }

    pub fn read_dir(&mut self, path: &Path) -> Result<Vec<String>> {
        match split_path(path) {
            Some(split) => {
                let ar = self.registry.get_or_open(&split.container)?;
                ar.readdir(&inner_str(&split))
            }
            None => {
                let mut names: Vec<String> = fs::read_dir(path)?
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect();
                names.sort();
                Ok(names)
            }
        }
    }

    /// Canonical path with container-internal links resolved.
    pub fn realpath(&mut self, path: &Path) -> Result<PathBuf> {
        match split_path(path) {
            Some(split) => {
                let ar = self.registry.get_or_open(&split.container)?;
                let canonical = ar.realpath(&inner_str(&split))?;
                Ok(split.container.join(canonical))
            }
            None => Ok(fs::canonicalize(path)?),
        }
    }

    pub fn exists(&mut self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }

    /// Materialize a file at `dest` on the real filesystem.
    pub fn copy_file_out(&mut self, path: &Path, dest: &Path) -> Result<()> {
        match split_path(path) {
            Some(split) => {
                let ar = self.registry.get_or_open(&split.container)?;
                ar.copy_file_out(&inner_str(&split), dest)
            }
            None => {
                fs::copy(path, dest).map_err(ArchiveError::Io)?;
                Ok(())
            }
        }
    }
}

fn inner_str(split: &SplitPath) -> String {
    split.inner.to_string_lossy().replace('\\', "/")
}
