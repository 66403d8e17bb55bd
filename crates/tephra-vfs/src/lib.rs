//! Virtual filesystem layer.
//!
//! All file I/O in the engine goes through the [`Vfs`]/[`VfsFile`] traits so
//! the WAL, catalog, and index readers can run against real files in
//! production and an in-memory filesystem in tests.

pub mod memory;
pub mod traits;
pub mod unix;

pub use memory::MemoryVfs;
pub use traits::{Vfs, VfsFile};
pub use unix::UnixVfs;
