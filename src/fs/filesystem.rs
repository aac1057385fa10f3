//! The filesystem facade: boot-time formatting, create/open/remove, and the
//! open-inode cache.
//!
//! Grounded on `keos-project5::ffs::FastFileSystemInner` (the open-inode
//! `BTreeMap` cache keyed by sector, `allocate_inode`/`allocate_block`
//! scanning the free bitmap) and `keos::fs::FileSystem` (the facade
//! surface: `root()`, create/open/remove), generalised away from a global
//! `static FS` toward an explicit, dependency-injected value per §9 of the
//! design.

use crate::disk::{BlockDevice, Sector, SECTOR_SIZE};
use crate::error::{KernelError, Result};
use crate::fs::directory::{self, ParsedPath};
use crate::fs::free_map::FreeMap;
use crate::fs::inode::{self, Inode};
use crate::fs::layout::{DiskInode, ROOT_DIR_SECTOR};
use crate::sync::SpinLock;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Filesystem {
    disk: Arc<dyn BlockDevice>,
    free_map: SpinLock<FreeMap>,
    /// Shared-singleton-per-sector cache (§3 "in-memory inode"); the single
    /// source of truth that makes the inode/directory back-reference cycle
    /// resolvable (§9 design note).
    open_inodes: SpinLock<HashMap<u32, Arc<Inode>>>,
    /// `filesys_lock`: held for the duration of every facade call and every
    /// inode read/write that reaches this type.
    filesys_lock: SpinLock<()>,
}

impl Filesystem {
    /// Formats a fresh filesystem on `disk`: reserves the root directory's
    /// inode sector and marks sectors `0` (partition metadata) and
    /// `ROOT_DIR_SECTOR` used in the free map.
    pub fn format(disk: Arc<dyn BlockDevice>, num_sectors: u32) -> Self {
        let mut free_map = FreeMap::new(num_sectors as usize);
        // Sector 0 (partition metadata) and the root inode's own sector
        // are reserved up front; `inode_create` below will see them
        // already marked.
        let _ = free_map.allocate(1); // sector 0
        let fs = Self {
            disk,
            free_map: SpinLock::new(free_map),
            open_inodes: SpinLock::new(HashMap::new()),
            filesys_lock: SpinLock::new(()),
        };
        // The root directory is its own parent, so `..` at `/` stays at `/`.
        let root_sector =
            inode::inode_create(&fs, 0, ROOT_DIR_SECTOR, true).expect("format: no space for root");
        assert_eq!(
            root_sector, ROOT_DIR_SECTOR,
            "root directory must land on the well-known sector"
        );
        fs
    }

    pub(crate) fn disk(&self) -> &dyn BlockDevice {
        &*self.disk
    }

    pub(crate) fn alloc_sector(&self) -> Result<u32> {
        let mut g = self.free_map.lock();
        let r = g.allocate(1).map(|v| v[0]);
        g.unlock();
        r
    }

    pub(crate) fn free_sector(&self, sector: u32, n: usize) {
        let mut g = self.free_map.lock();
        g.release(sector, n);
        g.unlock();
    }

    pub(crate) fn free_sectors(&self) -> usize {
        let g = self.free_map.lock();
        let n = g.count_free();
        g.unlock();
        n
    }

    /// `root()`: the directory handle every process starts its cwd at.
    pub fn root(&self) -> Result<Arc<Inode>> {
        self.open_inode(ROOT_DIR_SECTOR)
    }

    /// Opens (or returns, bumping the open count of) the in-memory inode
    /// singleton for `sector`.
    pub fn open_inode(&self, sector: u32) -> Result<Arc<Inode>> {
        let _l = self.filesys_lock.lock();
        let result = self.open_inode_locked(sector);
        _l.unlock();
        result
    }

    /// Same as [`Self::open_inode`], for call sites that already hold
    /// `filesys_lock`.
    pub(crate) fn open_inode_locked(&self, sector: u32) -> Result<Arc<Inode>> {
        let mut cache = self.open_inodes.lock();
        if let Some(existing) = cache.get(&sector) {
            existing.bump_open_count();
            let out = existing.clone();
            cache.unlock();
            return Ok(out);
        }
        cache.unlock();
        // `load_from_disk` hands back a freshly built inode with an open
        // count of one, already accounting for this call's own open.
        let loaded = inode::load_from_disk(self, sector)?;
        let mut cache = self.open_inodes.lock();
        let out = match cache.get(&sector) {
            // Another thread raced us to load the same sector; defer to
            // whichever already won and let our own load be dropped, so
            // there is only ever one live object per sector.
            Some(existing) => {
                existing.bump_open_count();
                existing.clone()
            }
            None => {
                cache.insert(sector, loaded.clone());
                loaded
            }
        };
        cache.unlock();
        Ok(out)
    }

    /// Close: decrements the open count; on the last closer of a `removed`
    /// inode, releases every sector the inode owns (§4.2 Close).
    pub fn close_inode(&self, inode: Arc<Inode>) {
        let _l = self.filesys_lock.lock();
        self.close_inode_locked(inode);
        _l.unlock();
    }

    /// Same as [`Self::close_inode`], for call sites that already hold
    /// `filesys_lock` (e.g. path resolution and the facade ops below) —
    /// `filesys_lock` is not reentrant, so re-acquiring it here would spin
    /// forever against ourselves.
    pub(crate) fn close_inode_locked(&self, inode: Arc<Inode>) {
        let last = inode.drop_open_count();
        if last {
            let mut cache = self.open_inodes.lock();
            cache.remove(&inode.sector);
            cache.unlock();
            if inode.is_removed() {
                let mut buf = [0u8; SECTOR_SIZE];
                self.disk().read(Sector(inode.sector), &mut buf);
                let disk_inode = DiskInode::from_bytes(&buf);
                inode::release_all_sectors(self, inode.sector, &disk_inode);
            }
        }
    }

    pub fn read_at(&self, inode: &Inode, buf: &mut [u8], offset: usize) -> usize {
        let _l = self.filesys_lock.lock();
        let n = inode::read_at(self, inode, buf, offset);
        _l.unlock();
        n
    }

    pub fn write_at(&self, inode: &Inode, buf: &[u8], offset: usize) -> Result<usize> {
        let _l = self.filesys_lock.lock();
        let r = inode::write_at(self, inode, buf, offset);
        _l.unlock();
        r
    }

    fn resolve(&self, cwd: &Arc<Inode>, path: &[u8]) -> Result<ParsedPath> {
        directory::parse_path(self, cwd, path)
    }

    /// `create(name, size)`. Rejects a last component of `/`, `.`, `..`, or
    /// empty. Reverses the inode allocation if linking the directory entry
    /// fails.
    pub fn create(&self, cwd: &Arc<Inode>, path: &[u8], size: usize) -> Result<()> {
        let _l = self.filesys_lock.lock();
        let result = (|| -> Result<()> {
            let parsed = self.resolve(cwd, path)?;
            if matches!(parsed.name.as_slice(), b"/" | b"." | b"..") || parsed.name.is_empty() {
                self.close_inode_locked(parsed.parent);
                return Err(KernelError::InvalidArgument);
            }
            let new_sector = inode::inode_create(self, size, parsed.parent.sector, false)?;
            if let Err(e) = directory::add_entry(self, &parsed.parent, &parsed.name, new_sector) {
                let mut buf = [0u8; SECTOR_SIZE];
                self.disk().read(Sector(new_sector), &mut buf);
                let disk_inode = DiskInode::from_bytes(&buf);
                inode::release_all_sectors(self, new_sector, &disk_inode);
                self.close_inode_locked(parsed.parent);
                return Err(e);
            }
            self.close_inode_locked(parsed.parent);
            Ok(())
        })();
        _l.unlock();
        result
    }

    /// `mkdir(path)`: as `create`, but allocates a directory inode.
    pub fn mkdir(&self, cwd: &Arc<Inode>, path: &[u8]) -> Result<()> {
        let _l = self.filesys_lock.lock();
        let result = (|| -> Result<()> {
            let parsed = self.resolve(cwd, path)?;
            if matches!(parsed.name.as_slice(), b"/" | b"." | b"..") || parsed.name.is_empty() {
                self.close_inode_locked(parsed.parent);
                return Err(KernelError::InvalidArgument);
            }
            let new_sector = inode::inode_create(self, 0, parsed.parent.sector, true)?;
            if let Err(e) = directory::add_entry(self, &parsed.parent, &parsed.name, new_sector) {
                let mut buf = [0u8; SECTOR_SIZE];
                self.disk().read(Sector(new_sector), &mut buf);
                let disk_inode = DiskInode::from_bytes(&buf);
                inode::release_all_sectors(self, new_sector, &disk_inode);
                self.close_inode_locked(parsed.parent);
                return Err(e);
            }
            self.close_inode_locked(parsed.parent);
            Ok(())
        })();
        _l.unlock();
        result
    }

    /// `open(path)`: resolves the last component, special-casing `.`/`..`/`/`
    /// to return the directory itself rather than looking it up as a name.
    pub fn open(&self, cwd: &Arc<Inode>, path: &[u8]) -> Result<Arc<Inode>> {
        let _l = self.filesys_lock.lock();
        let result = (|| -> Result<Arc<Inode>> {
            let parsed = self.resolve(cwd, path)?;
            let target_sector = match parsed.name.as_slice() {
                b"/" => ROOT_DIR_SECTOR,
                b"." => parsed.parent.sector,
                b".." => parsed.parent.parent_directory(),
                name => {
                    let g = parsed.parent.dir_lock.lock();
                    let found = directory::lookup(self, &parsed.parent, name);
                    g.unlock();
                    found.ok_or(KernelError::NotFound)?
                }
            };
            let opened = self.open_inode_locked(target_sector);
            self.close_inode_locked(parsed.parent);
            opened
        })();
        _l.unlock();
        result
    }

    pub fn remove(&self, cwd: &Arc<Inode>, path: &[u8]) -> Result<()> {
        let _l = self.filesys_lock.lock();
        let result = (|| -> Result<()> {
            let parsed = self.resolve(cwd, path)?;
            let r = directory::remove_entry(self, &parsed.parent, &parsed.name);
            self.close_inode_locked(parsed.parent);
            r
        })();
        _l.unlock();
        result
    }

    /// `readdir(fd, ...)`: advances `pos` past the next live entry of
    /// `dir`, under `filesys_lock` like every other directory-structural
    /// operation (§5).
    pub fn readdir(&self, dir: &Inode, pos: &mut usize) -> Option<Vec<u8>> {
        let _l = self.filesys_lock.lock();
        let r = directory::readdir(self, dir, pos);
        _l.unlock();
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DeviceRole, MemDisk};

    fn test_fs(sectors: u32) -> Filesystem {
        Filesystem::format(Arc::new(MemDisk::new(DeviceRole::FileSys, sectors)), sectors)
    }

    #[test]
    fn scenario_small_file_create_read_write_remove() {
        let fs = test_fs(4096);
        let root = fs.root().unwrap();
        fs.create(&root, b"a", 0).unwrap();
        let a = fs.open(&root, b"a").unwrap();
        assert_eq!(fs.write_at(&a, b"hello", 0).unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(fs.read_at(&a, &mut buf, 0), 5);
        assert_eq!(&buf, b"hello");
        fs.close_inode(a);
        fs.remove(&root, b"a").unwrap();
        assert!(fs.open(&root, b"a").is_err());
        fs.close_inode(root);
    }

    #[test]
    fn scenario_directory_lifecycle() {
        let fs = test_fs(4096);
        let root = fs.root().unwrap();
        fs.mkdir(&root, b"/d").unwrap();
        let d = fs.open(&root, b"/d").unwrap();
        fs.mkdir(&d, b"sub").unwrap();
        fs.close_inode(d);
        fs.remove(&root, b"/d/sub").unwrap();
        fs.remove(&root, b"/d").unwrap();
        fs.close_inode(root);
    }

    #[test]
    fn scenario_nonempty_remove_blocked() {
        let fs = test_fs(4096);
        let root = fs.root().unwrap();
        fs.mkdir(&root, b"/e").unwrap();
        fs.create(&root, b"/e/f", 0).unwrap();
        assert!(matches!(
            fs.remove(&root, b"/e"),
            Err(KernelError::DirectoryNotEmpty)
        ));
        fs.close_inode(root);
    }

    /// Scatters random-length writes at random offsets across a shadow
    /// buffer and the real file, growing both as needed, then checks every
    /// byte still matches. Exercises the direct/indirect/double-indirect
    /// index walk's growth path far past what a handful of fixed-offset
    /// cases would reach.
    #[test]
    fn scenario_random_scattered_writes_match_a_shadow_buffer() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xF11E_5EED);

        let fs = test_fs(8192);
        let root = fs.root().unwrap();
        fs.create(&root, b"scratch", 0).unwrap();
        let file = fs.open(&root, b"scratch").unwrap();

        let mut shadow: Vec<u8> = Vec::new();
        for _ in 0..200 {
            let offset = rng.gen_range(0..20_000usize);
            let len = rng.gen_range(1..600usize);
            let byte = rng.gen::<u8>();
            let data = vec![byte; len];

            fs.write_at(&file, &data, offset).unwrap();

            let end = offset + len;
            if shadow.len() < end {
                shadow.resize(end, 0);
            }
            shadow[offset..end].copy_from_slice(&data);
        }

        let mut actual = vec![0u8; shadow.len()];
        let n = fs.read_at(&file, &mut actual, 0);
        assert_eq!(n, shadow.len());
        assert_eq!(actual, shadow);

        fs.close_inode(file);
        fs.close_inode(root);
    }
}
