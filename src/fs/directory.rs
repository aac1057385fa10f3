//! Directory entries and the path parser.
//!
//! Grounded on `keos-project5::ffs::fs_objects::Directory` (slot reuse on
//! `add`, the root-protection and non-empty checks on `unlink_entry`) and
//! the path-walking contract in §4.3 of the design. Directory contents are
//! just the byte payload of a regular inode, read/written with
//! `inode::read_at`/`write_at` — directories get no separate on-disk
//! representation.

use crate::error::{KernelError, Result};
use crate::fs::filesystem::Filesystem;
use crate::fs::inode::{self, Inode};
use crate::fs::layout::{DirEntry, DIR_ENTRY_SIZE, ROOT_DIR_SECTOR};
use std::sync::Arc;

fn entry_at(fs: &Filesystem, dir: &Inode, slot: usize) -> Option<DirEntry> {
    let mut raw = [0u8; DIR_ENTRY_SIZE];
    let n = inode::read_at(fs, dir, &mut raw, slot * DIR_ENTRY_SIZE);
    if n < DIR_ENTRY_SIZE {
        return None;
    }
    Some(DirEntry::from_bytes(&raw))
}

fn entry_count(dir: &Inode) -> usize {
    dir.length() / DIR_ENTRY_SIZE
}

fn write_entry_at(fs: &Filesystem, dir: &Inode, slot: usize, entry: &DirEntry) -> Result<()> {
    let bytes = entry.to_bytes();
    let n = inode::write_at(fs, dir, &bytes, slot * DIR_ENTRY_SIZE)?;
    if n != DIR_ENTRY_SIZE {
        return Err(KernelError::NoSpace);
    }
    Ok(())
}

/// Linear scan for an `in_use` entry named `name`.
pub fn lookup(fs: &Filesystem, dir: &Inode, name: &[u8]) -> Option<u32> {
    for slot in 0..entry_count(dir) {
        if let Some(e) = entry_at(fs, dir, slot) {
            if e.in_use && e.name() == name {
                return Some(e.inode_sector);
            }
        }
    }
    None
}

/// Adds `name -> inode_sector`, reusing the first free slot. Rejects empty
/// or over-length names and duplicates. Takes `dir.dir_lock` for the
/// duration of the scan-then-mutate.
pub fn add_entry(fs: &Filesystem, dir: &Inode, name: &[u8], inode_sector: u32) -> Result<()> {
    if name.is_empty() || name.len() > crate::fs::layout::NAME_MAX {
        return Err(KernelError::NameTooLong);
    }
    let entry = DirEntry::new(inode_sector, name).ok_or(KernelError::NameTooLong)?;
    let g = dir.dir_lock.lock();
    let result = (|| -> Result<()> {
        let count = entry_count(dir);
        for slot in 0..count {
            if let Some(e) = entry_at(fs, dir, slot) {
                if e.in_use && e.name() == name {
                    return Err(KernelError::AlreadyExists);
                }
            }
        }
        for slot in 0..count {
            if let Some(e) = entry_at(fs, dir, slot) {
                if !e.in_use {
                    return write_entry_at(fs, dir, slot, &entry);
                }
            }
        }
        write_entry_at(fs, dir, count, &entry)
    })();
    g.unlock();
    result
}

/// Removes `name` from `dir`. If the target is itself a directory, it must
/// be non-root, empty (no live entries besides `.`/`..` bookkeeping — this
/// design keeps no such bookkeeping entries, so "empty" means zero `in_use`
/// records), and not open anywhere else. `name == "."` removes the
/// directory the handle itself refers to (see DESIGN.md for how the
/// `open_cnt` check is resolved for that case).
pub fn remove_entry(fs: &Filesystem, dir: &Arc<Inode>, name: &[u8]) -> Result<()> {
    if name == b"." {
        return remove_self(fs, dir);
    }
    let g = dir.dir_lock.lock();
    let count = entry_count(dir);
    let mut found_slot = None;
    let mut target_sector = 0u32;
    for slot in 0..count {
        if let Some(e) = entry_at(fs, dir, slot) {
            if e.in_use && e.name() == name {
                found_slot = Some(slot);
                target_sector = e.inode_sector;
                break;
            }
        }
    }
    let slot = match found_slot {
        Some(s) => s,
        None => {
            g.unlock();
            return Err(KernelError::NotFound);
        }
    };
    if target_sector == ROOT_DIR_SECTOR {
        g.unlock();
        return Err(KernelError::Busy);
    }
    let target = match fs.open_inode_locked(target_sector) {
        Ok(t) => t,
        Err(e) => {
            g.unlock();
            return Err(e);
        }
    };
    let result = (|| -> Result<()> {
        if target.is_directory() {
            if entry_count(&target) > 0 && has_live_entries(fs, &target) {
                return Err(KernelError::DirectoryNotEmpty);
            }
            if target.open_count() > 1 {
                return Err(KernelError::Busy);
            }
        }
        let mut empty = DirEntry::empty();
        empty.in_use = false;
        write_entry_at(fs, dir, slot, &empty)?;
        target.mark_removed();
        Ok(())
    })();
    fs.close_inode_locked(target);
    g.unlock();
    result
}

fn has_live_entries(fs: &Filesystem, dir: &Inode) -> bool {
    (0..entry_count(dir)).any(|slot| entry_at(fs, dir, slot).map(|e| e.in_use).unwrap_or(false))
}

/// `rmdir(".")`: the handle removes the directory it itself refers to, by
/// finding the matching back-reference in its parent.
fn remove_self(fs: &Filesystem, dir: &Arc<Inode>) -> Result<()> {
    if dir.sector == ROOT_DIR_SECTOR {
        return Err(KernelError::Busy);
    }
    if has_live_entries(fs, dir) {
        return Err(KernelError::DirectoryNotEmpty);
    }
    // Resolved open question #2 (see DESIGN.md / SPEC_FULL.md §9): the
    // busy-check is against this directory's own open count, not the
    // parent's, since "." names the handle's own inode.
    if dir.open_count() > 1 {
        return Err(KernelError::Busy);
    }
    let parent_sector = dir.parent_directory();
    let parent = fs.open_inode_locked(parent_sector)?;
    let g = parent.dir_lock.lock();
    let count = entry_count(&parent);
    let mut slot_to_clear = None;
    for slot in 0..count {
        if let Some(e) = entry_at(fs, &parent, slot) {
            if e.in_use && e.inode_sector == dir.sector {
                slot_to_clear = Some(slot);
                break;
            }
        }
    }
    let result = match slot_to_clear {
        Some(slot) => {
            let mut empty = DirEntry::empty();
            empty.in_use = false;
            write_entry_at(fs, &parent, slot, &empty)
        }
        None => Err(KernelError::FilesystemCorrupted(
            "directory missing back-reference in parent",
        )),
    };
    g.unlock();
    fs.close_inode_locked(parent);
    if result.is_ok() {
        dir.mark_removed();
    }
    result
}

/// `readdir`: advances `pos` past the next `in_use` entry, writing its name
/// into `out`. Returns `None` at end of directory.
pub fn readdir(fs: &Filesystem, dir: &Inode, pos: &mut usize) -> Option<Vec<u8>> {
    loop {
        let e = entry_at(fs, dir, *pos)?;
        *pos += 1;
        if e.in_use {
            return Some(e.name().to_vec());
        }
    }
}

/// Parsed path: the resolved parent directory and the final path
/// component's raw bytes (not yet looked up in that parent).
pub struct ParsedPath {
    pub parent: Arc<Inode>,
    pub name: Vec<u8>,
}

/// Walks `path`, opening (and closing, on every intermediate hop) each
/// directory component. `.` is a no-op; `..` follows `parent_directory`;
/// any other component must resolve to a directory via `lookup`. Leading
/// `/` starts from the root; otherwise from `cwd`.
pub fn parse_path(fs: &Filesystem, cwd: &Arc<Inode>, path: &[u8]) -> Result<ParsedPath> {
    if path == b"/" {
        let root = fs.open_inode_locked(ROOT_DIR_SECTOR)?;
        return Ok(ParsedPath {
            parent: root,
            name: b"/".to_vec(),
        });
    }
    let absolute = path.first() == Some(&b'/');
    let mut components: Vec<&[u8]> = path.split(|&b| b == b'/').filter(|c| !c.is_empty()).collect();
    if components.is_empty() {
        return Err(KernelError::InvalidArgument);
    }
    let last = components.pop().unwrap().to_vec();

    let mut current = if absolute {
        fs.open_inode_locked(ROOT_DIR_SECTOR)?
    } else {
        fs.open_inode_locked(cwd.sector)?
    };

    for comp in components {
        let next = if comp == b"." {
            fs.open_inode_locked(current.sector)?
        } else if comp == b".." {
            fs.open_inode_locked(current.parent_directory())?
        } else {
            let g = current.dir_lock.lock();
            let found = lookup(fs, &current, comp);
            g.unlock();
            let sector = match found {
                Some(s) => s,
                None => {
                    fs.close_inode_locked(current);
                    return Err(KernelError::NotFound);
                }
            };
            let next = fs.open_inode_locked(sector)?;
            if !next.is_directory() {
                fs.close_inode_locked(current);
                fs.close_inode_locked(next);
                return Err(KernelError::NotADirectory);
            }
            next
        };
        fs.close_inode_locked(current);
        current = next;
    }

    Ok(ParsedPath {
        parent: current,
        name: last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DeviceRole, MemDisk};
    use crate::fs::filesystem::Filesystem;
    use std::sync::Arc;

    fn test_fs(sectors: u32) -> Filesystem {
        let disk = Arc::new(MemDisk::new(DeviceRole::FileSys, sectors));
        Filesystem::format(disk, sectors)
    }

    #[test]
    fn add_lookup_remove_round_trip() {
        let fs = test_fs(4096);
        let root = fs.open_inode(ROOT_DIR_SECTOR).unwrap();
        let file_sector = inode::inode_create(&fs, 0, ROOT_DIR_SECTOR, false).unwrap();
        add_entry(&fs, &root, b"a.txt", file_sector).unwrap();
        assert_eq!(lookup(&fs, &root, b"a.txt"), Some(file_sector));
        assert!(add_entry(&fs, &root, b"a.txt", file_sector).is_err());
        remove_entry(&fs, &root, b"a.txt").unwrap();
        assert_eq!(lookup(&fs, &root, b"a.txt"), None);
    }

    #[test]
    fn remove_nonempty_directory_is_blocked() {
        let fs = test_fs(4096);
        let root = fs.open_inode(ROOT_DIR_SECTOR).unwrap();
        let sub_sector = inode::inode_create(&fs, 0, ROOT_DIR_SECTOR, true).unwrap();
        add_entry(&fs, &root, b"sub", sub_sector).unwrap();
        let sub = fs.open_inode(sub_sector).unwrap();
        let f_sector = inode::inode_create(&fs, 0, sub_sector, false).unwrap();
        add_entry(&fs, &sub, b"f", f_sector).unwrap();
        fs.close_inode(sub);
        assert!(matches!(
            remove_entry(&fs, &root, b"sub"),
            Err(KernelError::DirectoryNotEmpty)
        ));
    }
}
