//! Crate-wide error taxonomy.
//!
//! Mirrors the shape of `keos::KernelError`: one exhaustively-matched enum,
//! with a conversion to the syscall-visible `isize` result instead of a
//! `Display`/`std::error::Error` chain built from `thiserror`. The teacher
//! never reaches for an error-derive crate, so neither do we.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Path component not found, or fd refers to nothing.
    NotFound,
    /// `create`/`mkdir` target already exists.
    AlreadyExists,
    /// Malformed argument: empty name, name too long, etc.
    InvalidArgument,
    /// Operation requires a regular file but the target is a directory.
    IsADirectory,
    /// Operation requires a directory but the target is a regular file.
    NotADirectory,
    /// `rmdir`/`remove` on a directory that still has live entries.
    DirectoryNotEmpty,
    /// fd does not name an open file in the process's table.
    BadFileDescriptor,
    /// The process's file-descriptor table has no free slot.
    TooManyOpenFiles,
    /// The free-sector map could not satisfy an allocation.
    NoSpace,
    /// The swap bitmap has no free slot for an evicted dirty page.
    NoSwapSpace,
    /// A user-space pointer failed validation (null, kernel range, unmapped
    /// and not stack growth).
    BadAddress,
    /// Write to a read-only mapping, or otherwise-illegal memory access.
    InvalidAccess,
    /// Target inode/directory is busy (e.g. `remove` on the root).
    Busy,
    /// Path component longer than the on-disk name field.
    NameTooLong,
    /// Block-device I/O failed. The caller nearly always escalates this to
    /// a panic per the crash-is-fatal policy in the error design.
    IoError,
    /// On-disk structure failed a sanity check (bad magic, index out of
    /// range, ...).
    FilesystemCorrupted(&'static str),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::NotFound => write!(f, "no such file or directory"),
            KernelError::AlreadyExists => write!(f, "file exists"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
            KernelError::IsADirectory => write!(f, "is a directory"),
            KernelError::NotADirectory => write!(f, "not a directory"),
            KernelError::DirectoryNotEmpty => write!(f, "directory not empty"),
            KernelError::BadFileDescriptor => write!(f, "bad file descriptor"),
            KernelError::TooManyOpenFiles => write!(f, "too many open files"),
            KernelError::NoSpace => write!(f, "no space left on device"),
            KernelError::NoSwapSpace => write!(f, "no swap space left"),
            KernelError::BadAddress => write!(f, "bad address"),
            KernelError::InvalidAccess => write!(f, "invalid memory access"),
            KernelError::Busy => write!(f, "resource busy"),
            KernelError::NameTooLong => write!(f, "name too long"),
            KernelError::IoError => write!(f, "i/o error"),
            KernelError::FilesystemCorrupted(why) => write!(f, "filesystem corrupted: {why}"),
        }
    }
}

impl std::error::Error for KernelError {}

impl KernelError {
    /// Maps an error to the negative, POSIX-flavoured result a syscall
    /// returns to user space. User-fault variants are never expected to
    /// reach here: the syscall layer kills the process for those before a
    /// return value would be produced (see `syscall::dispatch`).
    pub fn into_syscall_result(self) -> isize {
        match self {
            KernelError::NotFound => -2,
            KernelError::BadFileDescriptor => -9,
            KernelError::TooManyOpenFiles => -24,
            KernelError::NoSpace => -28,
            KernelError::AlreadyExists => -17,
            KernelError::NotADirectory => -20,
            KernelError::IsADirectory => -21,
            KernelError::InvalidArgument => -22,
            KernelError::DirectoryNotEmpty => -39,
            KernelError::NameTooLong => -36,
            KernelError::Busy => -16,
            KernelError::BadAddress | KernelError::InvalidAccess => -14,
            KernelError::NoSwapSpace | KernelError::IoError | KernelError::FilesystemCorrupted(_) => -1,
        }
    }

    /// True for the subset of errors which §7 of the design classifies as
    /// "user fault": the calling process is killed rather than getting a
    /// return value.
    pub fn is_user_fault(self) -> bool {
        matches!(self, KernelError::BadAddress | KernelError::InvalidAccess)
    }
}

pub type Result<T> = core::result::Result<T, KernelError>;
