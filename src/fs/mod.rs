//! The indexed-inode filesystem: on-disk layout, free-space accounting,
//! inodes, directories, and the [`Filesystem`] facade that ties them
//! together behind a single global lock.

pub mod directory;
pub mod filesystem;
pub mod free_map;
pub mod inode;
pub mod layout;

pub use filesystem::Filesystem;
pub use inode::Inode;
