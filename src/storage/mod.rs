pub mod directory;
pub mod hash;

pub use directory::{FileDirectory, FileEntry, FileRecord, LocalHolding};
pub use hash::HashUtils;
