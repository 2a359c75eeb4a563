pub mod archive;
pub mod cipher;
pub mod decode;
pub mod header;
pub mod path;
pub mod vfs;
pub mod writer;

pub use archive::{Archive, ArchiveError, ReadRequest, Stat};
pub use cipher::{get_cipher, Cipher, CipherContext, CipherError, StrategyId};
pub use decode::decode_external;
pub use header::{FileEntry, Header, HeaderError, Node};
pub use path::{split_path, SplitPath};
pub use vfs::{ArchiveRegistry, Vfs};
pub use writer::{pack, pack_dir, ContainerBuilder};
