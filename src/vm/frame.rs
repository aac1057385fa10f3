//! The frame table and clock-hand eviction.
//!
//! Grounded on `keos-project4`'s frame table (`Vec<FrameSlot>` with a
//! circular clock hand, accessed-bit probing via the page table) — the
//! victim-selection loop and the dirty/clean fork into swap-vs-file are
//! lifted directly from that design (§4.5).

use crate::process::Process;
use crate::sync::SpinLock;
use crate::vm::address_space::AddressSpace;
use crate::vm::memory::PhysicalMemory;
use crate::vm::spt::{Location, SupplementalPageTable};
use crate::vm::swap::SwapTable;
use crate::vm::types::{PhysAddr, VirtAddr, PAGE_SIZE};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The handles a frame table slot needs to reach back into its owning
/// process's address space and SPT, without holding an `Arc<Process>` —
/// taken from `&Process` at `install` time (§4.5).
#[derive(Clone)]
struct FrameOwner {
    address_space: Arc<dyn AddressSpace>,
    spt: Arc<SpinLock<SupplementalPageTable>>,
}

struct FrameSlot {
    owner: Option<FrameOwner>,
    upage: Option<VirtAddr>,
}

/// `base + i * PAGE_SIZE` is the physical address of frame `i`, fixed at
/// construction (§4.5 "sized at boot by exhausting the allocator").
pub struct FrameTable {
    base: PhysAddr,
    slots: Vec<SpinLock<FrameSlot>>,
    hand: AtomicUsize,
}

impl FrameTable {
    pub fn new(base: PhysAddr, count: usize) -> Self {
        let slots = (0..count)
            .map(|_| {
                SpinLock::new(FrameSlot {
                    owner: None,
                    upage: None,
                })
            })
            .collect();
        Self {
            base,
            slots,
            hand: AtomicUsize::new(0),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.slots.len()
    }

    fn index_of(&self, addr: PhysAddr) -> usize {
        (addr.0 - self.base.0) / PAGE_SIZE
    }

    pub fn addr_of(&self, index: usize) -> PhysAddr {
        PhysAddr(self.base.0 + index * PAGE_SIZE)
    }

    /// Records that frame `addr` is now owned by `(owner, upage)`. Must be
    /// called after every successful fault resolution (fresh or evicted),
    /// or the clock hand will never find this frame a candidate victim.
    pub fn install(&self, addr: PhysAddr, owner: &Process, upage: VirtAddr) {
        let idx = self.index_of(addr);
        let mut g = self.slots[idx].lock();
        g.owner = Some(FrameOwner {
            address_space: owner.address_space.clone(),
            spt: owner.spt.clone(),
        });
        g.upage = Some(upage);
        g.unlock();
    }

    /// Clears the slot for `addr` without consulting its owner (used once
    /// a page has been explicitly freed by its owner, e.g. process exit).
    pub fn clear(&self, addr: PhysAddr) {
        let idx = self.index_of(addr);
        let mut g = self.slots[idx].lock();
        g.owner = None;
        g.upage = None;
        g.unlock();
    }

    /// Runs one pass of the clock algorithm, evicting exactly one frame
    /// and returning its physical address, now free. Must be called under
    /// the VM lock (§4.5 invariant: at most one evictor at a time).
    pub fn evict_one(&self, swap: &SwapTable, phys_mem: &dyn PhysicalMemory) -> PhysAddr {
        let n = self.slots.len();
        loop {
            let idx = self.hand.fetch_add(1, Ordering::Relaxed) % n;
            let mut g = self.slots[idx].lock();
            let (owner, upage) = match (&g.owner, g.upage) {
                (Some(owner), Some(upage)) => (owner.clone(), upage),
                _ => {
                    g.unlock();
                    continue;
                }
            };
            if owner.address_space.is_accessed(upage) {
                owner.address_space.clear_accessed(upage);
                g.unlock();
                continue;
            }

            // Victim found: `owner`'s mapping for `upage` is frame `idx`.
            let dirty = owner.address_space.is_dirty(upage);
            let mut spt = owner.spt.lock();
            let file_backing = spt.get(upage).and_then(|e| e.file_backing.clone());
            let addr = self.addr_of(idx);
            let new_location = if !dirty && file_backing.is_some() {
                Location::InFile
            } else {
                Location::InSwap(write_victim_to_swap(addr, swap, phys_mem))
            };
            spt.set_location(upage, new_location);
            spt.unlock();

            owner.address_space.clear_mapping(upage);
            g.owner = None;
            g.upage = None;
            g.unlock();
            phys_mem.zero_page(addr);
            return addr;
        }
    }
}

fn write_victim_to_swap(addr: PhysAddr, swap: &SwapTable, phys_mem: &dyn PhysicalMemory) -> usize {
    let page = phys_mem.read_page(addr);
    swap.write_page(&page)
        .expect("out of swap space while evicting a dirty page")
}
