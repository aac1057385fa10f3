//! The page-fault resolver.
//!
//! Grounded on `keos::task::Task::page_fault`'s default kill-on-violation
//! behaviour and `keos-project4`'s fault dispatch (stack growth vs.
//! file-backed vs. swap-backed), reworked to take an explicit
//! `PageFaultInfo` value instead of `abyss::interrupt::Registers` (§1 —
//! the CPU trap mechanism is an external collaborator).

use crate::fs::filesystem::Filesystem;
use crate::process::Process;
use crate::sync::SpinLock;
use crate::vm::frame::FrameTable;
use crate::vm::memory::PhysicalMemory;
use crate::vm::page_alloc::PhysicalPageAllocator;
use crate::vm::spt::{Location, SptEntry};
use crate::vm::swap::SwapTable;
use crate::vm::types::{PhysAddr, VirtAddr, PAGE_SIZE};

/// The maximum distance below the top of user virtual memory that an
/// implicit stack-growth fault may occur at (§4.6 step 5).
pub const STACK_LIMIT: usize = 8 * 1024 * 1024;

/// The only data a fault handler needs from the trap path: the faulting
/// address, the three error-code bits, and the stack pointer snapshot.
/// Never a raw register file (§1).
pub struct PageFaultInfo {
    pub fault_addr: VirtAddr,
    pub present: bool,
    pub write: bool,
    pub user: bool,
    pub user_esp: VirtAddr,
    pub user_va_top: VirtAddr,
}

/// Why a faulting process must be killed. The syscall/process layer maps
/// this to "terminate with exit status -1" (§7); this crate itself never
/// terminates a process, it only reports the verdict.
#[derive(Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    Resolved,
    Kill,
}

/// Resolves one page fault against `process`'s SPT, acquiring a frame
/// (evicting if necessary), installing the mapping, and registering the new
/// owner in the frame table so a later eviction pass can find it. Must run
/// with the VM lock held (serialises with eviction, §5).
pub fn resolve_fault(
    process: &Process,
    info: &PageFaultInfo,
    frames: &FrameTable,
    swap: &SwapTable,
    alloc: &dyn PhysicalPageAllocator,
    fs: &Filesystem,
    phys_mem: &dyn PhysicalMemory,
) -> FaultOutcome {
    let upage = info.fault_addr.page();

    if !process.address_space.is_user_address(info.fault_addr) {
        return FaultOutcome::Kill;
    }

    let spt = process.spt.lock();
    let existing = spt.get(upage).cloned();
    spt.unlock();

    if info.write {
        if let Some(e) = &existing {
            if !e.writable {
                return FaultOutcome::Kill;
            }
        }
    }

    let is_stack_growth = existing.is_none() && info.fault_addr.0 + 32 >= info.user_esp.0;

    if existing.is_none() && !is_stack_growth {
        return FaultOutcome::Kill;
    }

    if is_stack_growth {
        let top = info.user_va_top.0;
        if top.saturating_sub(upage.0) > STACK_LIMIT {
            return FaultOutcome::Kill;
        }
        // `process.spt` must be released before `acquire_frame`: eviction
        // may pick this very process's own resident frame and re-lock
        // `process.spt` from inside `FrameTable::evict_one`, which would
        // spin forever against the lock held right here.
        let frame = acquire_frame(frames, swap, alloc, phys_mem);
        phys_mem.zero_page(frame);
        process.address_space.install_page(upage, frame, true);
        process.address_space.set_dirty(upage, true);
        frames.install(frame, process, upage);
        let mut spt = process.spt.lock();
        spt.insert(SptEntry {
            upage,
            location: Location::InFrame(frame),
            writable: true,
            file_backing: None,
        });
        spt.unlock();
        return FaultOutcome::Resolved;
    }

    let entry = existing.unwrap();
    let frame = acquire_frame(frames, swap, alloc, phys_mem);
    match &entry.location {
        Location::InFrame(_) => {
            // Already resident; a fault here means the mapping was
            // cleared without updating the SPT, which should not happen.
            return FaultOutcome::Kill;
        }
        Location::InFile => {
            let backing = entry
                .file_backing
                .clone()
                .expect("InFile location always carries file_backing");
            let mut page = [0u8; PAGE_SIZE];
            let read_bytes = backing.read_bytes.min(PAGE_SIZE);
            fs.read_at(&backing.file, &mut page[..read_bytes], backing.file_offset);
            phys_mem.write_page(frame, &page);
        }
        Location::InSwap(slot) => {
            let page = {
                let mut buf = [0u8; PAGE_SIZE];
                swap.read_page(*slot, &mut buf);
                buf
            };
            phys_mem.write_page(frame, &page);
            process.address_space.set_dirty(upage, true);
        }
    }
    process.address_space.install_page(upage, frame, entry.writable);
    frames.install(frame, process, upage);
    let mut spt = process.spt.lock();
    spt.insert(SptEntry {
        upage,
        location: Location::InFrame(frame),
        writable: entry.writable,
        file_backing: entry.file_backing,
    });
    spt.unlock();
    FaultOutcome::Resolved
}

fn acquire_frame(
    frames: &FrameTable,
    swap: &SwapTable,
    alloc: &dyn PhysicalPageAllocator,
    phys_mem: &dyn PhysicalMemory,
) -> PhysAddr {
    match alloc.acquire_user_page() {
        Some(addr) => addr,
        None => frames.evict_one(swap, phys_mem),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::filesystem::Filesystem;
    use crate::vm::address_space::AddressSpace;
    use crate::vm::page_alloc::MockPageAllocator;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct FakeAddressSpace {
        present: SpinLock<HashMap<VirtAddr, bool>>,
        dirty: SpinLock<HashMap<VirtAddr, bool>>,
    }

    impl FakeAddressSpace {
        fn new() -> Self {
            Self {
                present: SpinLock::new(HashMap::new()),
                dirty: SpinLock::new(HashMap::new()),
            }
        }
    }

    impl AddressSpace for FakeAddressSpace {
        fn is_present(&self, upage: VirtAddr) -> bool {
            let g = self.present.lock();
            let r = *g.get(&upage).unwrap_or(&false);
            g.unlock();
            r
        }
        fn is_accessed(&self, _upage: VirtAddr) -> bool {
            false
        }
        fn clear_accessed(&self, _upage: VirtAddr) {}
        fn is_dirty(&self, upage: VirtAddr) -> bool {
            let g = self.dirty.lock();
            let r = *g.get(&upage).unwrap_or(&false);
            g.unlock();
            r
        }
        fn set_dirty(&self, upage: VirtAddr, dirty: bool) {
            let mut g = self.dirty.lock();
            g.insert(upage, dirty);
            g.unlock();
        }
        fn install_page(&self, upage: VirtAddr, _frame: PhysAddr, _writable: bool) {
            let mut g = self.present.lock();
            g.insert(upage, true);
            g.unlock();
        }
        fn clear_mapping(&self, upage: VirtAddr) {
            let mut g = self.present.lock();
            g.insert(upage, false);
            g.unlock();
        }
        fn is_user_address(&self, addr: VirtAddr) -> bool {
            addr.0 < 0xC000_0000
        }
        fn translate(&self, upage: VirtAddr) -> Option<PhysAddr> {
            let g = self.present.lock();
            let r = *g.get(&upage).unwrap_or(&false);
            g.unlock();
            r.then_some(PhysAddr(upage.0))
        }
    }

    fn setup() -> (
        Arc<Process>,
        FrameTable,
        SwapTable,
        MockPageAllocator,
        Filesystem,
        crate::vm::memory::MockPhysicalMemory,
    ) {
        use crate::disk::{DeviceRole, MemDisk};
        let disk = Arc::new(MemDisk::new(DeviceRole::FileSys, 4096));
        let fs = Filesystem::format(disk, 4096);
        let root = fs.root().unwrap();
        let process = Arc::new(Process::new(0, Arc::new(FakeAddressSpace::new()), root, 16));
        let frames = FrameTable::new(PhysAddr(0), 2);
        let swap_disk = Arc::new(MemDisk::new(
            DeviceRole::Swap,
            (crate::vm::swap::SECTORS_PER_PAGE * 4) as u32,
        ));
        let swap = SwapTable::new(swap_disk);
        let alloc = MockPageAllocator::new(2);
        let phys_mem = crate::vm::memory::MockPhysicalMemory::new(PhysAddr(0), 2);
        (process, frames, swap, alloc, fs, phys_mem)
    }

    #[test]
    fn stack_growth_installs_a_fresh_writable_page() {
        let (process, frames, swap, alloc, fs, phys_mem) = setup();
        process.set_user_esp(VirtAddr(0x8000_0000));
        let info = PageFaultInfo {
            fault_addr: VirtAddr(0x8000_0000 - 4),
            present: false,
            write: true,
            user: true,
            user_esp: VirtAddr(0x8000_0000),
            user_va_top: VirtAddr(0x8000_0000),
        };
        let outcome = resolve_fault(&process, &info, &frames, &swap, &alloc, &fs, &phys_mem);
        assert_eq!(outcome, FaultOutcome::Resolved);
        let spt = process.spt.lock();
        assert!(spt.get(info.fault_addr.page()).is_some());
        spt.unlock();
    }

    #[test]
    fn write_beyond_stack_limit_kills() {
        let (process, frames, swap, alloc, fs, phys_mem) = setup();
        process.set_user_esp(VirtAddr(0x8000_0000));
        let info = PageFaultInfo {
            fault_addr: VirtAddr(0x8000_0000 - STACK_LIMIT - PAGE_SIZE),
            present: false,
            write: true,
            user: true,
            user_esp: VirtAddr(0x8000_0000),
            user_va_top: VirtAddr(0x8000_0000),
        };
        let outcome = resolve_fault(&process, &info, &frames, &swap, &alloc, &fs, &phys_mem);
        assert_eq!(outcome, FaultOutcome::Kill);
    }

    #[test]
    fn fault_with_no_spt_entry_and_no_stack_growth_kills() {
        let (process, frames, swap, alloc, fs, phys_mem) = setup();
        process.set_user_esp(VirtAddr(0x8000_0000));
        let info = PageFaultInfo {
            fault_addr: VirtAddr(0x1000),
            present: false,
            write: false,
            user: true,
            user_esp: VirtAddr(0x8000_0000),
            user_va_top: VirtAddr(0x8000_0000),
        };
        let outcome = resolve_fault(&process, &info, &frames, &swap, &alloc, &fs, &phys_mem);
        assert_eq!(outcome, FaultOutcome::Kill);
    }

    #[test]
    fn writing_a_read_only_page_kills() {
        let (process, frames, swap, alloc, fs, phys_mem) = setup();
        {
            let mut spt = process.spt.lock();
            spt.insert(SptEntry {
                upage: VirtAddr(0x1000),
                location: Location::InFile,
                writable: false,
                file_backing: None,
            });
            spt.unlock();
        }
        let info = PageFaultInfo {
            fault_addr: VirtAddr(0x1000),
            present: true,
            write: true,
            user: true,
            user_esp: VirtAddr(0x8000_0000),
            user_va_top: VirtAddr(0x8000_0000),
        };
        let outcome = resolve_fault(&process, &info, &frames, &swap, &alloc, &fs, &phys_mem);
        assert_eq!(outcome, FaultOutcome::Kill);
    }

    #[test]
    fn file_backed_fault_reads_bytes_off_disk_into_the_frame() {
        let (process, frames, swap, alloc, fs, phys_mem) = setup();
        let root = fs.root().unwrap();
        fs.create(&root, b"exe", 0).unwrap();
        let file = fs.open(&root, b"exe").unwrap();
        fs.write_at(&file, b"hello, world", 0).unwrap();

        let upage = VirtAddr(0x4000_0000);
        {
            let mut spt = process.spt.lock();
            spt.insert(SptEntry {
                upage,
                location: Location::InFile,
                writable: false,
                file_backing: Some(crate::vm::spt::FileBacking {
                    file: file.clone(),
                    file_offset: 0,
                    read_bytes: 12,
                }),
            });
            spt.unlock();
        }
        let info = PageFaultInfo {
            fault_addr: upage,
            present: false,
            write: false,
            user: true,
            user_esp: VirtAddr(0x8000_0000),
            user_va_top: VirtAddr(0x8000_0000),
        };
        let outcome = resolve_fault(&process, &info, &frames, &swap, &alloc, &fs, &phys_mem);
        assert_eq!(outcome, FaultOutcome::Resolved);
        let frame_addr = {
            let spt = process.spt.lock();
            let loc = match spt.get(upage).unwrap().location {
                Location::InFrame(a) => a,
                _ => panic!("expected InFrame after resolution"),
            };
            spt.unlock();
            loc
        };
        let page = phys_mem.read_page(frame_addr);
        assert_eq!(&page[..12], b"hello, world");
        assert!(page[12..].iter().all(|&b| b == 0), "tail of a file-backed page must be zero");
        fs.close_inode(file);
        fs.close_inode(root);
    }

    #[test]
    fn swap_backed_fault_round_trips_the_original_bytes() {
        let (process, frames, swap, alloc, fs, phys_mem) = setup();
        let upage = VirtAddr(0x5000_0000);
        let mut pattern = [0u8; PAGE_SIZE];
        for (i, b) in pattern.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let slot = swap.write_page(&pattern).unwrap();
        {
            let mut spt = process.spt.lock();
            spt.insert(SptEntry {
                upage,
                location: Location::InSwap(slot),
                writable: true,
                file_backing: None,
            });
            spt.unlock();
        }
        let info = PageFaultInfo {
            fault_addr: upage,
            present: false,
            write: false,
            user: true,
            user_esp: VirtAddr(0x8000_0000),
            user_va_top: VirtAddr(0x8000_0000),
        };
        let outcome = resolve_fault(&process, &info, &frames, &swap, &alloc, &fs, &phys_mem);
        assert_eq!(outcome, FaultOutcome::Resolved);
        assert!(!swap.is_occupied(slot), "the slot must be freed once read in");
        let frame_addr = {
            let spt = process.spt.lock();
            let loc = match spt.get(upage).unwrap().location {
                Location::InFrame(a) => a,
                _ => panic!("expected InFrame after resolution"),
            };
            spt.unlock();
            loc
        };
        assert_eq!(phys_mem.read_page(frame_addr), pattern);
    }

    #[test]
    fn second_fault_evicting_the_process_own_only_frame_resolves_instead_of_hanging() {
        let disk = Arc::new(crate::disk::MemDisk::new(crate::disk::DeviceRole::FileSys, 4096));
        let fs = Filesystem::format(disk, 4096);
        let root = fs.root().unwrap();
        fs.create(&root, b"exe", 0).unwrap();
        let file = fs.open(&root, b"exe").unwrap();
        fs.write_at(&file, b"hello, world", 0).unwrap();

        let process = Arc::new(Process::new(0, Arc::new(FakeAddressSpace::new()), root.clone(), 16));
        // Exactly one frame and one free physical page: the second fault
        // below can only be satisfied by evicting the first page, and that
        // page belongs to this same process.
        let frames = FrameTable::new(PhysAddr(0), 1);
        let swap_disk = Arc::new(crate::disk::MemDisk::new(
            crate::disk::DeviceRole::Swap,
            (crate::vm::swap::SECTORS_PER_PAGE * 4) as u32,
        ));
        let swap = SwapTable::new(swap_disk);
        let alloc = MockPageAllocator::new(1);
        let phys_mem = crate::vm::memory::MockPhysicalMemory::new(PhysAddr(0), 1);

        let page_a = VirtAddr(0x4000_0000);
        let page_b = VirtAddr(0x4000_1000);
        for upage in [page_a, page_b] {
            let mut spt = process.spt.lock();
            spt.insert(SptEntry {
                upage,
                location: Location::InFile,
                writable: false,
                file_backing: Some(crate::vm::spt::FileBacking {
                    file: file.clone(),
                    file_offset: 0,
                    read_bytes: 12,
                }),
            });
            spt.unlock();
        }

        let fault = |addr: VirtAddr| PageFaultInfo {
            fault_addr: addr,
            present: false,
            write: false,
            user: true,
            user_esp: VirtAddr(0x8000_0000),
            user_va_top: VirtAddr(0x8000_0000),
        };

        let first = resolve_fault(&process, &fault(page_a), &frames, &swap, &alloc, &fs, &phys_mem);
        assert_eq!(first, FaultOutcome::Resolved);

        // Evicting `page_a`'s frame locks `process.spt` from inside
        // `FrameTable::evict_one` while this very call is resolving a fault
        // for the same process; this must not self-deadlock.
        let second = resolve_fault(&process, &fault(page_b), &frames, &swap, &alloc, &fs, &phys_mem);
        assert_eq!(second, FaultOutcome::Resolved);

        let spt = process.spt.lock();
        assert!(matches!(spt.get(page_a).unwrap().location, Location::InFile));
        assert!(matches!(spt.get(page_b).unwrap().location, Location::InFrame(_)));
        spt.unlock();

        fs.close_inode(file);
        fs.close_inode(root);
    }
}
