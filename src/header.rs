//! Header codec — the file table at the front of every container.
//!
//! Physical framing (all integers u32 little-endian):
//!
//! ```text
//! [4 bytes]  size-frame length (always 4, informational)
//! [4 bytes]  length of the serialized header, H
//! [H bytes]  JSON header
//! [rest]     concatenated file bodies, offsets relative to byte 8 + H
//! ```
//!
//! The header itself is a tree of named nodes.  Directories map child names
//! to nodes in a `BTreeMap`, so serialization is deterministic for identical
//! trees and `readdir` output is sorted without extra work.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use thiserror::Error;

use crate::cipher::StrategyId;

/// Value of the leading size frame.  Constant in this format revision.
pub const SIZE_FRAME: u32 = 4;

/// Byte offset of the body region is `FRAME_LEN + header length`.
pub const FRAME_LEN: u64 = 8;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("malformed header: {0}")]
    Malformed(String),
    #[error("truncated header: need {needed} bytes, have {available}")]
    Truncated { needed: u64, available: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── FileEntry ─────────────────────────────────────────────────────────────────

/// Header record for one packaged file.
///
/// `size` is the stored (possibly ciphertext) byte length, `len` the
/// plaintext length.  The two differ only for strategies that change the
/// payload length; the stream-XOR strategy keeps `size == len`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub size: u64,
    #[serde(default)]
    pub offset: u64,
    /// The file lives beside the container on the real filesystem;
    /// `offset`/`size` are meaningless when set.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unpacked: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub encrypted: bool,
    /// Plaintext length.  Normalized to `size` on decode when absent.
    #[serde(default)]
    pub len: u64,
}

fn is_false(b: &bool) -> bool {
    !*b
}

// ── Node ──────────────────────────────────────────────────────────────────────

/// One named node in the header tree.
///
/// Untagged: a directory is recognized by its `files` key, a symlink by
/// `link`, anything else must parse as a [`FileEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Directory { files: BTreeMap<String, Node> },
    Link { link: String },
    File(FileEntry),
}

// ── Header ────────────────────────────────────────────────────────────────────

/// The complete file table.
///
/// `cipher` names the strategy every encrypted entry was written with.  It is
/// archive-wide: `pack` encrypts all bodies with one strategy, and a reader
/// refuses to decrypt entries of a container whose header names none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher: Option<StrategyId>,
    pub files: BTreeMap<String, Node>,
}

impl Header {
    pub fn new() -> Self {
        Self { cipher: None, files: BTreeMap::new() }
    }

    /// Flat file index: every embedded [`FileEntry`] with its slash-joined
    /// path, in depth-first sorted order.  Links carry no bodies and are
    /// skipped.
    pub fn walk(&self) -> Vec<(String, &FileEntry)> {
        fn visit<'a>(prefix: &str, dir: &'a BTreeMap<String, Node>, out: &mut Vec<(String, &'a FileEntry)>) {
            for (name, node) in dir {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                match node {
                    Node::Directory { files } => visit(&path, files, out),
                    Node::File(entry) => out.push((path, entry)),
                    Node::Link { .. } => {}
                }
            }
        }
        let mut out = Vec::new();
        visit("", &self.files, &mut out);
        out
    }

    /// Mutable lookup by exact path, links not followed.  Used by the writer
    /// to patch offsets after encryption.
    pub fn entry_mut(&mut self, path: &str) -> Option<&mut FileEntry> {
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        let mut dir = &mut self.files;
        while let Some(comp) = components.next() {
            let node = dir.get_mut(comp)?;
            if components.peek().is_none() {
                return match node {
                    Node::File(entry) => Some(entry),
                    _ => None,
                };
            }
            match node {
                Node::Directory { files } => dir = files,
                _ => return None,
            }
        }
        None
    }

    /// Validate offset arithmetic and fill in defaulted plaintext lengths.
    fn normalize(&mut self) -> Result<(), HeaderError> {
        fn visit(path: &str, dir: &mut BTreeMap<String, Node>) -> Result<(), HeaderError> {
            for (name, node) in dir.iter_mut() {
                match node {
                    Node::Directory { files } => {
                        let sub = format!("{path}/{name}");
                        visit(&sub, files)?;
                    }
                    Node::File(entry) => {
                        if !entry.unpacked && entry.offset.checked_add(entry.size).is_none() {
                            return Err(HeaderError::Malformed(format!(
                                "entry {path}/{name}: offset + size overflows u64"
                            )));
                        }
                        if !entry.encrypted && entry.len == 0 {
                            entry.len = entry.size;
                        }
                    }
                    Node::Link { .. } => {}
                }
            }
            Ok(())
        }
        visit("", &mut self.files)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Serialize and frame a header.  Deterministic for identical trees.
pub fn encode(header: &Header) -> Result<Vec<u8>, HeaderError> {
    let json = serde_json::to_vec(header).map_err(|e| HeaderError::Malformed(e.to_string()))?;
    if json.len() > u32::MAX as usize {
        return Err(HeaderError::Malformed(format!(
            "serialized header is {} bytes, exceeds the u32 length frame",
            json.len()
        )));
    }
    let mut out = Vec::with_capacity(FRAME_LEN as usize + json.len());
    out.write_u32::<LittleEndian>(SIZE_FRAME)?;
    out.write_u32::<LittleEndian>(json.len() as u32)?;
    out.extend_from_slice(&json);
    Ok(out)
}

/// Parse the two frames and the header, returning it together with the byte
/// offset at which the body region starts.
pub fn decode(bytes: &[u8]) -> Result<(Header, u64), HeaderError> {
    if (bytes.len() as u64) < FRAME_LEN {
        return Err(HeaderError::Truncated { needed: FRAME_LEN, available: bytes.len() as u64 });
    }
    let mut cursor = &bytes[..];
    let _size_frame = cursor.read_u32::<LittleEndian>()?;
    let header_len = cursor.read_u32::<LittleEndian>()? as u64;

    let needed = FRAME_LEN + header_len;
    if (bytes.len() as u64) < needed {
        return Err(HeaderError::Truncated { needed, available: bytes.len() as u64 });
    }

    let json = &bytes[FRAME_LEN as usize..needed as usize];
    let mut header: Header =
        serde_json::from_slice(json).map_err(|e| HeaderError::Malformed(e.to_string()))?;
    header.normalize()?;
    Ok((header, needed))
}
