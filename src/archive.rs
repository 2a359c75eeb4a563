//! Container reader — the primary embedding surface.
//!
//! ```no_run
//! use opak::archive::Archive;
//!
//! let ar = Archive::open("assets.opak")?;
//! let info = ar.get_file_info("img/logo.png")?;
//! let bytes = ar.read_file("img/logo.png")?;
//! assert_eq!(bytes.len() as u64, info.len);
//! # Ok::<(), opak::archive::ArchiveError>(())
//! ```
//!
//! An [`Archive`] value exists only once the header parsed; open failure
//! never yields a half-initialized reader.  The container bytes are memory
//! mapped and immutable for the reader's lifetime, so point queries and
//! concurrent reads need no locking.  Dropping the value unmaps the file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use memmap2::Mmap;
use thiserror::Error;

use crate::cipher::{get_cipher, Cipher, CipherContext, CipherError};
use crate::header::{self, FileEntry, Header, HeaderError, Node};

/// Hop budget while resolving links; exceeding it reports a cycle.
const MAX_LINK_HOPS: usize = 40;

/// Suffix of the sibling directory holding `unpacked` entries.
pub const UNPACKED_SUFFIX: &str = ".unpacked";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("too many link hops resolving {0}")]
    SymlinkCycle(String),
    #[error("out of bounds read: offset {offset} + length {length} exceeds body size {body_len}")]
    OutOfBounds { offset: u64, length: u64, body_len: u64 },
    #[error("source container is already encrypted")]
    AlreadyEncrypted,
    #[error("read worker disconnected")]
    Disconnected,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

// ── Stat ──────────────────────────────────────────────────────────────────────

/// Filesystem-shaped metadata for one inner path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub size: u64,
    pub offset: u64,
    pub is_file: bool,
    pub is_directory: bool,
    pub is_link: bool,
}

// ── ReadRequest ───────────────────────────────────────────────────────────────

/// In-flight asynchronous read.
///
/// The bounds check already ran when this value was created; what remains is
/// the byte copy on a worker thread.  Requests are independent: dropping one
/// discards its result, failing one never affects another.
pub struct ReadRequest {
    rx: Receiver<Result<Vec<u8>>>,
}

impl ReadRequest {
    /// Block until the copy finishes.
    pub fn wait(self) -> Result<Vec<u8>> {
        self.rx.recv().unwrap_or(Err(ArchiveError::Disconnected))
    }

    /// Non-blocking poll; `None` while the copy is still running.
    pub fn poll(&self) -> Option<Result<Vec<u8>>> {
        self.rx.try_recv().ok()
    }
}

// ── Resolution helper ─────────────────────────────────────────────────────────

enum Found<'a> {
    Dir(&'a BTreeMap<String, Node>),
    File(&'a FileEntry),
    Link(&'a str),
}

// ── Archive ───────────────────────────────────────────────────────────────────

pub struct Archive {
    path: PathBuf,
    mmap: Arc<Mmap>,
    header: Header,
    body_offset: u64,
    cipher: Option<Box<dyn Cipher>>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive").field("path", &self.path).finish_non_exhaustive()
    }
}

impl Archive {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Open with the default [`CipherContext`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_context(path, CipherContext::default())
    }

    /// Open a container, parsing the size frame and header frame.  Framing
    /// or parse failures surface [`HeaderError`] and leave nothing open.
    pub fn open_with_context<P: AsRef<Path>>(path: P, ctx: CipherContext) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let (header, body_offset) = header::decode(&mmap)?;
        let cipher = header.cipher.map(|id| get_cipher(id, &ctx));

        log::debug!(
            "opened container {} ({} entries, cipher: {})",
            path.display(),
            header.walk().len(),
            header.cipher.map_or_else(|| "none".to_string(), |c| c.to_string()),
        );

        Ok(Self { path, mmap: Arc::new(mmap), header, body_offset, cipher })
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Length of the body region in bytes.
    pub fn body_len(&self) -> u64 {
        self.mmap.len() as u64 - self.body_offset
    }

    // ── Point queries ────────────────────────────────────────────────────────

    /// Look up a file's header record.  Links are followed; directories and
    /// dangling paths report `NotFound`.
    pub fn get_file_info(&self, path: &str) -> Result<FileEntry> {
        match self.resolve(path, true)? {
            (_, Found::File(entry)) => Ok(entry.clone()),
            _ => Err(ArchiveError::NotFound(path.to_string())),
        }
    }

    /// Filesystem-shaped stat.  Intermediate links are followed; a link at
    /// the leaf is reported as a link, not chased.
    pub fn stat(&self, path: &str) -> Result<Stat> {
        let stat = match self.resolve(path, false)? {
            (_, Found::File(entry)) => Stat {
                size: entry.size,
                offset: entry.offset,
                is_file: true,
                is_directory: false,
                is_link: false,
            },
            (_, Found::Dir(_)) => Stat {
                size: 0,
                offset: 0,
                is_file: false,
                is_directory: true,
                is_link: false,
            },
            (_, Found::Link(_)) => Stat {
                size: 0,
                offset: 0,
                is_file: false,
                is_directory: false,
                is_link: true,
            },
        };
        Ok(stat)
    }

    /// Sorted child names of a directory.
    pub fn readdir(&self, path: &str) -> Result<Vec<String>> {
        match self.resolve(path, true)? {
            (_, Found::Dir(files)) => Ok(files.keys().cloned().collect()),
            (canonical, _) => Err(ArchiveError::NotADirectory(canonical)),
        }
    }

    /// Canonical inner path with every link resolved.
    pub fn realpath(&self, path: &str) -> Result<String> {
        let (canonical, _) = self.resolve(path, true)?;
        Ok(canonical)
    }

    // ── Byte access ──────────────────────────────────────────────────────────

    /// Copy `length` bytes starting at `offset` within the body region,
    /// blocking the calling thread.  The range is validated with
    /// overflow-checked arithmetic before any memory access.
    pub fn read_sync(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let range = self.check_bounds(offset, length)?;
        Ok(self.mmap[range].to_vec())
    }

    /// Asynchronous variant of [`read_sync`](Self::read_sync).
    ///
    /// The bounds check runs eagerly so a bad request fails before any work
    /// is scheduled; the copy itself runs on a worker thread so a large
    /// transfer never blocks the caller's dispatcher.
    pub fn read(&self, offset: u64, length: u64) -> ReadRequest {
        let (tx, rx) = bounded(1);
        match self.check_bounds(offset, length) {
            Err(e) => {
                let _ = tx.send(Err(e));
            }
            Ok(range) => {
                let mmap = Arc::clone(&self.mmap);
                thread::spawn(move || {
                    let _ = tx.send(Ok(mmap[range].to_vec()));
                });
            }
        }
        ReadRequest { rx }
    }

    /// Full plaintext of one file: metadata lookup, body read, cipher
    /// reversal for encrypted entries.  `unpacked` entries come from the
    /// sibling `<container>.unpacked` directory instead of the body region.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let (canonical, entry) = match self.resolve(path, true)? {
            (canonical, Found::File(entry)) => (canonical, entry.clone()),
            _ => return Err(ArchiveError::NotFound(path.to_string())),
        };

        if entry.unpacked {
            return Ok(fs::read(self.unpacked_path(&canonical))?);
        }

        let stored = self.read_sync(entry.offset, entry.size)?;
        if !entry.encrypted {
            return Ok(stored);
        }
        let cipher = self.cipher.as_deref().ok_or(CipherError::MissingStrategy)?;
        Ok(cipher.decrypt(&stored, entry.len)?)
    }

    /// Materialize a file's plaintext at `dest` on the real filesystem.
    pub fn copy_file_out<P: AsRef<Path>>(&self, path: &str, dest: P) -> Result<()> {
        let data = self.read_file(path)?;
        let mut out = File::create(dest)?;
        out.write_all(&data)?;
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn check_bounds(&self, offset: u64, length: u64) -> Result<Range<usize>> {
        let body_len = self.body_len();
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= body_len)
            .ok_or(ArchiveError::OutOfBounds { offset, length, body_len })?;
        let start = self.body_offset + offset;
        Ok(start as usize..(self.body_offset + end) as usize)
    }

    fn unpacked_path(&self, canonical: &str) -> PathBuf {
        let mut dir = self.path.as_os_str().to_owned();
        dir.push(UNPACKED_SUFFIX);
        Path::new(&dir).join(canonical)
    }

    /// Walk `path` through the header tree.  Links anywhere along the walk
    /// restart it from the root at the link's target (targets are relative
    /// to the archive root); `follow_leaf` controls whether a link in the
    /// final position is chased too.
    fn resolve<'a>(&'a self, path: &str, follow_leaf: bool) -> Result<(String, Found<'a>)> {
        let mut pending: Vec<String> = components(path);
        pending.reverse();
        let mut canonical: Vec<String> = Vec::new();
        let mut dir = &self.header.files;
        let mut hops = 0usize;

        while let Some(comp) = pending.pop() {
            let child = dir.get(&comp).ok_or_else(|| ArchiveError::NotFound(path.to_string()))?;
            let is_leaf = pending.is_empty();
            match child {
                Node::Link { link } => {
                    if is_leaf && !follow_leaf {
                        canonical.push(comp);
                        return Ok((canonical.join("/"), Found::Link(link)));
                    }
                    hops += 1;
                    if hops > MAX_LINK_HOPS {
                        return Err(ArchiveError::SymlinkCycle(path.to_string()));
                    }
                    // pending is stored reversed with the next component at
                    // the end; the link target has to be walked before
                    // whatever is still queued.
                    let mut restart = components(link);
                    restart.reverse();
                    pending.extend(restart);
                    canonical.clear();
                    dir = &self.header.files;
                }
                Node::Directory { files } => {
                    canonical.push(comp);
                    if is_leaf {
                        return Ok((canonical.join("/"), Found::Dir(files)));
                    }
                    dir = files;
                }
                Node::File(entry) => {
                    canonical.push(comp);
                    if is_leaf {
                        return Ok((canonical.join("/"), Found::File(entry)));
                    }
                    return Err(ArchiveError::NotADirectory(canonical.join("/")));
                }
            }
        }

        // Empty path addresses the root directory.
        Ok((String::new(), Found::Dir(&self.header.files)))
    }
}

fn components(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_string)
        .collect()
}
