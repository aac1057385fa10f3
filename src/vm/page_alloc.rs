//! The physical user-page allocator contract.
//!
//! Grounded on `keos::mm`'s `PhysicalAllocator`/`ContigPages` surface,
//! trimmed to the two operations the frame table actually calls (§1): a
//! real embedder backs this with the machine's physical memory map, tests
//! back it with a bump allocator over a plain `Vec`.

use crate::vm::types::PhysAddr;

pub trait PhysicalPageAllocator: Send + Sync {
    fn acquire_user_page(&self) -> Option<PhysAddr>;
    fn release_user_page(&self, addr: PhysAddr);
}

/// A fixed-capacity pool of page-aligned addresses, handed out and taken
/// back on a free list. Used by every VM unit test in place of a real
/// physical memory map.
#[cfg(test)]
pub struct MockPageAllocator {
    free: crate::sync::SpinLock<Vec<PhysAddr>>,
}

#[cfg(test)]
impl MockPageAllocator {
    pub fn new(capacity: usize) -> Self {
        let free = (0..capacity)
            .map(|i| PhysAddr(i * crate::vm::types::PAGE_SIZE))
            .collect();
        Self {
            free: crate::sync::SpinLock::new(free),
        }
    }
}

#[cfg(test)]
impl PhysicalPageAllocator for MockPageAllocator {
    fn acquire_user_page(&self) -> Option<PhysAddr> {
        let mut g = self.free.lock();
        let addr = g.pop();
        g.unlock();
        addr
    }

    fn release_user_page(&self, addr: PhysAddr) {
        let mut g = self.free.lock();
        g.push(addr);
        g.unlock();
    }
}
