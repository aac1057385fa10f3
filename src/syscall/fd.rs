//! The per-process file-descriptor table.
//!
//! Grounded on `keos-project1::file_struct::FileStruct` (the `FileKind`
//! tagged-variant split between regular files and directories, a fixed
//! reservation for the console descriptors) — reworked from that crate's
//! `BTreeMap<FileDescriptor, File>` into a fixed-size array sized by
//! `VmConfig`/`FilesystemConfig`'s embedder-chosen `max_open_files`, since
//! §3 specifies "fixed-size array indexed by small integer file
//! descriptor" rather than an unbounded map.

use crate::error::{KernelError, Result};
use crate::fs::Inode;
use crate::sync::SpinLock;
use std::sync::Arc;

pub const STDIN_FD: usize = 0;
pub const STDOUT_FD: usize = 1;
/// The lowest fd ever handed out by `open` (§6 syscall table).
pub const FIRST_OPEN_FD: usize = 2;

/// What a file descriptor slot refers to. Every fd-taking operation
/// dispatches on this (§9 "polymorphism over file handles").
pub enum FileKind {
    Stdin,
    Stdout,
    Regular { inode: Arc<Inode>, position: SpinLock<usize> },
    Directory { inode: Arc<Inode>, position: SpinLock<usize> },
}

impl FileKind {
    pub fn is_directory(&self) -> bool {
        matches!(self, FileKind::Directory { .. })
    }

    pub fn inode(&self) -> Option<&Arc<Inode>> {
        match self {
            FileKind::Regular { inode, .. } | FileKind::Directory { inode, .. } => Some(inode),
            FileKind::Stdin | FileKind::Stdout => None,
        }
    }

    pub fn position(&self) -> usize {
        match self {
            FileKind::Regular { position, .. } | FileKind::Directory { position, .. } => {
                let g = position.lock();
                let p = *g;
                g.unlock();
                p
            }
            FileKind::Stdin | FileKind::Stdout => 0,
        }
    }

    pub fn set_position(&self, pos: usize) {
        if let FileKind::Regular { position, .. } | FileKind::Directory { position, .. } = self {
            let mut g = position.lock();
            *g = pos;
            g.unlock();
        }
    }
}

/// Fixed-size descriptor table. Slots `0` and `1` are reserved for
/// stdin/stdout at construction and never reassigned.
pub struct FdTable {
    slots: Vec<Option<FileKind>>,
    /// Hint for the next likely-free slot; must be advanced past occupied
    /// slots rather than trusted blindly (§9 resolved open question 1).
    next_fd: usize,
}

impl FdTable {
    pub fn new(max_files: usize) -> Self {
        let mut slots = (0..max_files).map(|_| None).collect::<Vec<_>>();
        slots[STDIN_FD] = Some(FileKind::Stdin);
        slots[STDOUT_FD] = Some(FileKind::Stdout);
        Self {
            slots,
            next_fd: FIRST_OPEN_FD,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Installs `file` in the first free slot at or after `next_fd`,
    /// wrapping around to scan the whole table before giving up. This is
    /// the resolved behaviour for open question 1: the naive
    /// "stop at MAX_FILES-1" scan in the distilled source missed the slot
    /// at index 0 of a second wrap-around pass, so this scans the full
    /// `FIRST_OPEN_FD..capacity` range unconditionally.
    pub fn install(&mut self, file: FileKind) -> Result<usize> {
        let cap = self.slots.len();
        for offset in 0..(cap - FIRST_OPEN_FD) {
            let fd = FIRST_OPEN_FD + (self.next_fd - FIRST_OPEN_FD + offset) % (cap - FIRST_OPEN_FD);
            if self.slots[fd].is_none() {
                self.slots[fd] = Some(file);
                self.next_fd = if fd + 1 < cap { fd + 1 } else { FIRST_OPEN_FD };
                return Ok(fd);
            }
        }
        Err(KernelError::TooManyOpenFiles)
    }

    pub fn get(&self, fd: usize) -> Result<&FileKind> {
        self.slots
            .get(fd)
            .and_then(|s| s.as_ref())
            .ok_or(KernelError::BadFileDescriptor)
    }

    /// Clears `fd`'s slot, returning the file that was there, and moves
    /// `next_fd` back to it if that makes it the lowest known-free slot.
    pub fn close(&mut self, fd: usize) -> Result<FileKind> {
        if fd < FIRST_OPEN_FD || fd >= self.slots.len() {
            return Err(KernelError::BadFileDescriptor);
        }
        let file = self.slots[fd].take().ok_or(KernelError::BadFileDescriptor)?;
        if fd < self.next_fd {
            self.next_fd = fd;
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserves_stdio_and_assigns_from_two() {
        let mut t = FdTable::new(8);
        assert!(t.get(STDIN_FD).is_ok());
        assert!(t.get(STDOUT_FD).is_ok());
        let fd = t.install(FileKind::Stdin).unwrap(); // placeholder payload
        assert_eq!(fd, 2);
    }

    #[test]
    fn full_table_reports_too_many_open_files() {
        let mut t = FdTable::new(4); // slots 0,1 reserved; 2,3 available
        t.install(FileKind::Stdin).unwrap();
        t.install(FileKind::Stdin).unwrap();
        assert!(matches!(
            t.install(FileKind::Stdin),
            Err(KernelError::TooManyOpenFiles)
        ));
    }

    #[test]
    fn close_frees_slot_for_reuse_and_rewinds_next_fd_hint() {
        let mut t = FdTable::new(8);
        let a = t.install(FileKind::Stdin).unwrap();
        let _b = t.install(FileKind::Stdin).unwrap();
        t.close(a).unwrap();
        let c = t.install(FileKind::Stdin).unwrap();
        assert_eq!(c, a);
    }
}
