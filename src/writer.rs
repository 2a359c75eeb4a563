//! Container writer: producer-side packing and the encrypting re-pack.
//!
//! [`ContainerBuilder`] assembles an unencrypted container from in-memory
//! files (or a directory tree via [`pack_dir`]).  [`pack`] takes an existing
//! unencrypted container and re-emits it with every file body run through a
//! cipher strategy, one file per cipher unit.  Containers are built once and
//! read many times; neither path ever mutates its source.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use walkdir::WalkDir;

use crate::archive::{Archive, ArchiveError, Result};
use crate::cipher::{get_cipher, CipherContext, StrategyId};
use crate::header::{self, FileEntry, Header, HeaderError, Node};

/// Re-emit `source` at `dest` with every embedded body encrypted.
///
/// Offsets and sizes are rewritten to the ciphertext layout and each entry
/// records its plaintext length; for the length-preserving XOR strategy the
/// resulting table is byte-for-byte the source's.  The whole operation
/// aborts on the first per-file failure — a partially written `dest` is a
/// reported error, never a silent success.  `unpacked` entries are left
/// alone; they carry no body.
pub fn pack<P: AsRef<Path>, Q: AsRef<Path>>(
    source: P,
    dest: Q,
    strategy: StrategyId,
    ctx: &CipherContext,
) -> Result<()> {
    let source = source.as_ref();
    let dest = dest.as_ref();

    let src = Archive::open_with_context(source, ctx.clone())?;
    if src.header().cipher.is_some() {
        return Err(ArchiveError::AlreadyEncrypted);
    }
    let cipher = get_cipher(strategy, ctx);

    // Encrypt bodies in source offset order so relative placement survives.
    let mut entries: Vec<(String, u64, u64)> = src
        .header()
        .walk()
        .into_iter()
        .filter(|(_, e)| !e.unpacked)
        .map(|(path, e)| (path, e.offset, e.size))
        .collect();
    entries.sort_by_key(|e| e.1);

    let mut header = src.header().clone();
    header.cipher = Some(strategy);

    let mut bodies: Vec<(String, Vec<u8>)> = Vec::with_capacity(entries.len());
    let mut cursor = 0u64;
    for (path, offset, size) in entries {
        let plaintext = src.read_sync(offset, size)?;
        let ciphertext = cipher.encrypt(&plaintext)?;

        let entry = header
            .entry_mut(&path)
            .ok_or_else(|| ArchiveError::NotFound(path.clone()))?;
        entry.offset = cursor;
        entry.size = ciphertext.len() as u64;
        entry.len = plaintext.len() as u64;
        entry.encrypted = true;

        log::debug!("packed {path}: {} -> {} bytes", plaintext.len(), ciphertext.len());
        cursor += ciphertext.len() as u64;
        bodies.push((path, ciphertext));
    }

    let framed = header::encode(&header)?;
    let mut out = BufWriter::new(File::create(dest)?);
    out.write_all(&framed)?;
    for (_, body) in &bodies {
        out.write_all(body)?;
    }
    out.flush()?;

    log::info!(
        "packed {} -> {} ({} files, strategy {strategy})",
        source.display(),
        dest.display(),
        bodies.len(),
    );
    Ok(())
}

// ── ContainerBuilder ──────────────────────────────────────────────────────────

/// Accumulates files, links and directories, then emits an unencrypted
/// container.  Offsets are assigned in insertion order.
#[derive(Debug, Default)]
pub struct ContainerBuilder {
    files: BTreeMap<String, Node>,
    bodies: Vec<u8>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one file, creating parent directories as needed.
    pub fn add_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let entry = FileEntry {
            size: data.len() as u64,
            offset: self.bodies.len() as u64,
            unpacked: false,
            encrypted: false,
            len: data.len() as u64,
        };
        self.insert(path, Node::File(entry))?;
        self.bodies.extend_from_slice(data);
        Ok(())
    }

    /// Add a symlink whose target is relative to the archive root.
    pub fn add_link(&mut self, path: &str, target: &str) -> Result<()> {
        self.insert(path, Node::Link { link: target.to_string() })
    }

    /// Add an (empty) directory.  Directories on file paths are implied.
    pub fn add_dir(&mut self, path: &str) -> Result<()> {
        self.insert(path, Node::Directory { files: BTreeMap::new() })
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> Result<()> {
        let header = Header { cipher: None, files: self.files.clone() };
        let framed = header::encode(&header)?;
        out.write_all(&framed)?;
        out.write_all(&self.bodies)?;
        out.flush()?;
        Ok(())
    }

    pub fn write_file<P: AsRef<Path>>(&self, dest: P) -> Result<()> {
        self.write_to(BufWriter::new(File::create(dest)?))
    }

    fn insert(&mut self, path: &str, node: Node) -> Result<()> {
        let components: Vec<&str> =
            path.split('/').filter(|c| !c.is_empty() && *c != ".").collect();
        let Some((leaf, dirs)) = components.split_last() else {
            return Err(malformed(format!("empty path: {path:?}")));
        };

        let mut dir = &mut self.files;
        for comp in dirs {
            let child = dir
                .entry(comp.to_string())
                .or_insert_with(|| Node::Directory { files: BTreeMap::new() });
            match child {
                Node::Directory { files } => dir = files,
                _ => return Err(malformed(format!("{path}: {comp} is not a directory"))),
            }
        }
        if dir.contains_key(*leaf) {
            return Err(malformed(format!("duplicate entry: {path}")));
        }
        dir.insert(leaf.to_string(), node);
        Ok(())
    }
}

fn malformed(msg: String) -> ArchiveError {
    ArchiveError::Header(HeaderError::Malformed(msg))
}

/// Walk `src_dir` and pack every regular file into an unencrypted container
/// at `dest`.  Entry paths are relative to `src_dir`, slash separated.
pub fn pack_dir<P: AsRef<Path>, Q: AsRef<Path>>(src_dir: P, dest: Q) -> Result<()> {
    let src_dir = src_dir.as_ref();
    let mut builder = ContainerBuilder::new();
    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ArchiveError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| malformed(e.to_string()))?;
        let inner = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let data = std::fs::read(entry.path())?;
        builder.add_file(&inner, &data)?;
        log::debug!("added {inner} ({} bytes)", data.len());
    }
    builder.write_file(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_assigns_sequential_offsets() {
        let mut builder = ContainerBuilder::new();
        builder.add_file("one", b"aaaa").unwrap();
        builder.add_file("two", b"bb").unwrap();
        let mut bytes = Vec::new();
        builder.write_to(&mut bytes).unwrap();

        let (header, body_offset) = header::decode(&bytes).unwrap();
        let files = header.walk();
        assert_eq!(files.len(), 2);
        let (_, one) = &files[0];
        let (_, two) = &files[1];
        assert_eq!((one.offset, one.size), (0, 4));
        assert_eq!((two.offset, two.size), (4, 2));
        assert_eq!(bytes.len() as u64, body_offset + 6);
    }

    #[test]
    fn builder_rejects_duplicates_and_file_as_dir() {
        let mut builder = ContainerBuilder::new();
        builder.add_file("a", b"x").unwrap();
        assert!(builder.add_file("a", b"y").is_err());
        assert!(builder.add_file("a/child", b"z").is_err());
        assert!(builder.add_file("", b"z").is_err());
    }

    #[test]
    fn builder_creates_parent_directories() {
        let mut builder = ContainerBuilder::new();
        builder.add_file("deep/nested/file.txt", b"data").unwrap();
        builder.add_link("alias", "deep/nested/file.txt").unwrap();
        let mut bytes = Vec::new();
        builder.write_to(&mut bytes).unwrap();

        let (header, _) = header::decode(&bytes).unwrap();
        assert!(matches!(header.files.get("deep"), Some(Node::Directory { .. })));
        assert!(matches!(header.files.get("alias"), Some(Node::Link { .. })));
    }
}
