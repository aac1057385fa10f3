//! The kernel context: the single value that bundles every subsystem a
//! `Process` needs a reference to.
//!
//! Grounded on `keos::fs::FileSystem::register`'s global singleton and
//! `keos-project4`'s boot-time `init_mm` (frame table sized by exhausting
//! the allocator, swap table built over a dedicated disk), generalised into
//! an explicit value per §4.8 of the design rather than a `static` so the
//! crate stays host-testable without process isolation.

use crate::disk::BlockDevice;
use crate::fs::Filesystem;
use crate::sync::SpinLock;
use crate::vm::page_alloc::PhysicalPageAllocator;
use crate::vm::{FrameTable, PhysAddr, PhysicalMemory, SwapTable};
use std::sync::Arc;

/// Embedder-chosen sizing, passed once at boot (§1.1 "Configuration").
pub struct FilesystemConfig {
    pub num_sectors: u32,
    pub max_open_files: usize,
}

pub struct VmConfig {
    pub frame_base: PhysAddr,
    pub frame_count: usize,
}

/// Bundles the filesystem facade (which owns the open-inode cache and
/// `filesys_lock` internally), the frame table, the swap table, and the
/// physical-memory collaborators every fault resolution needs. One of
/// these is constructed at boot and handed by reference to every
/// [`crate::process::Process`] the embedder creates (§4.8).
pub struct Kernel {
    pub fs: Filesystem,
    pub frames: FrameTable,
    pub swap: SwapTable,
    pub alloc: Arc<dyn PhysicalPageAllocator>,
    pub phys_mem: Arc<dyn PhysicalMemory>,
    /// Serialises fault resolution and eviction (§5 `vm_lock`).
    pub vm_lock: SpinLock<()>,
    /// Carried so every `Process::new` the embedder calls sizes its fd
    /// table consistently, without re-threading the boot config around.
    pub max_open_files: usize,
}

impl Kernel {
    /// Formats a fresh filesystem on `fs_disk` and builds empty frame and
    /// swap tables over `swap_disk`, per `fs_config`/`vm_config`.
    pub fn boot(
        fs_disk: Arc<dyn BlockDevice>,
        swap_disk: Arc<dyn BlockDevice>,
        alloc: Arc<dyn PhysicalPageAllocator>,
        phys_mem: Arc<dyn PhysicalMemory>,
        fs_config: FilesystemConfig,
        vm_config: VmConfig,
    ) -> Self {
        let fs = Filesystem::format(fs_disk, fs_config.num_sectors);
        let frames = FrameTable::new(vm_config.frame_base, vm_config.frame_count);
        let swap = SwapTable::new(swap_disk);
        Self {
            fs,
            frames,
            swap,
            alloc,
            phys_mem,
            vm_lock: SpinLock::new(()),
            max_open_files: fs_config.max_open_files,
        }
    }
}
