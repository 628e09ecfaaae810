//! Cairn standard library: the object model of a content-addressed
//! repository, its binary wire codecs, the storage contract, and the
//! trust seams shared by the tools built on top of it.

pub mod checksum;
pub mod commit;
pub mod content;
pub mod delta;
pub mod keyfile;
pub mod refname;
pub mod remote;
pub mod sign;
pub mod store;
pub mod summary;
pub mod tree;
pub mod wire;

pub use checksum::{Checksum, ObjectId, ObjectType};
pub use commit::Commit;
pub use content::ContentObject;
pub use refname::RefName;
pub use remote::Remote;
pub use store::{RepoMode, Store};
pub use summary::Summary;

/// Upper bound on the size of any non-detached metadata artifact
/// fetched over the wire.
pub const MAX_METADATA_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum depth of the commit/tree graph traversal.
pub const MAX_RECURSION: u32 = 64;
