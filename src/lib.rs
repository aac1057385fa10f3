//! A host-testable kernel core for an indexed-inode filesystem, a
//! demand-paged virtual memory layer, and the syscall surface that
//! mediates user-space access to both.
//!
//! The crate never touches real hardware: every external collaborator — the
//! raw block device, the physical page allocator, the page table, the
//! process loader, the CPU trap path — is an injected trait, each with a
//! `#[cfg(test)]` mock backed by plain `Vec<u8>` memory. An embedder wires
//! real implementations of those traits into a [`kernel::Kernel`] at boot
//! and constructs a [`process::Process`] per running task.
//!
//! ## Layout
//! - [`disk`]: the sector-granular block device contract.
//! - [`fs`]: the indexed inode filesystem and its directory layer.
//! - [`vm`]: the supplemental page table, frame table, swap, and fault
//!   resolver.
//! - [`syscall`]: the file-descriptor table, user-pointer validation, and
//!   the numbered syscall dispatch table.
//! - [`kernel`]: the boot-time bundle of the above, handed to every
//!   process.
//! - [`process`]: per-process kernel-visible state.
//! - [`sync`]: the spinlock/rwlock primitives everything above is built on.

pub mod disk;
pub mod error;
pub mod fs;
pub mod kernel;
pub mod process;
pub mod sync;
pub mod syscall;
pub mod vm;

pub use error::{KernelError, Result};
pub use kernel::Kernel;
pub use process::Process;
