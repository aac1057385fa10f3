//! The swap partition: a page-sized-slot bitmap over a dedicated block
//! device.
//!
//! Grounded on `keos-project4`'s swap disk handling (page-sized slots as a
//! fixed run of sectors) generalised to this crate's 512-byte `Sector`/
//! `BlockDevice` types, with `SECTORS_PER_PAGE` derived from `PAGE_SIZE`
//! rather than hardcoded.

use crate::disk::{BlockDevice, Sector, SECTOR_SIZE};
use crate::error::{KernelError, Result};
use crate::sync::SpinLock;
use crate::vm::types::PAGE_SIZE;
use std::sync::Arc;

pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

pub struct SwapTable {
    disk: Arc<dyn BlockDevice>,
    /// Bit `i` set iff slot `i` holds valid page data.
    bits: SpinLock<Vec<u64>>,
    slot_count: usize,
}

impl SwapTable {
    pub fn new(disk: Arc<dyn BlockDevice>) -> Self {
        let slot_count = disk.num_sectors() as usize / SECTORS_PER_PAGE;
        Self {
            disk,
            bits: SpinLock::new(vec![0u64; slot_count.div_ceil(64)]),
            slot_count,
        }
    }

    fn is_set(bits: &[u64], slot: usize) -> bool {
        (bits[slot / 64] >> (slot % 64)) & 1 != 0
    }

    fn set(bits: &mut [u64], slot: usize, value: bool) {
        if value {
            bits[slot / 64] |= 1 << (slot % 64);
        } else {
            bits[slot / 64] &= !(1u64 << (slot % 64));
        }
    }

    /// Finds a free slot, marks it used, and writes `page` (exactly
    /// `PAGE_SIZE` bytes) into it. No free slot is a fatal condition per
    /// §7 ("out-of-swap is fatal to the kernel"); the caller is expected
    /// to propagate this as a panic rather than a recoverable `Result`
    /// path, but it is surfaced here as `NoSwapSpace` so callers can
    /// choose where exactly to panic.
    pub fn write_page(&self, page: &[u8; PAGE_SIZE]) -> Result<usize> {
        let mut bits = self.bits.lock();
        let slot = (0..self.slot_count).find(|&s| !Self::is_set(&bits, s));
        let slot = match slot {
            Some(s) => s,
            None => {
                bits.unlock();
                return Err(KernelError::NoSwapSpace);
            }
        };
        Self::set(&mut bits, slot, true);
        bits.unlock();
        for i in 0..SECTORS_PER_PAGE {
            let mut sector_buf = [0u8; SECTOR_SIZE];
            sector_buf.copy_from_slice(&page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
            self.disk.write(Sector((slot * SECTORS_PER_PAGE + i) as u32), &sector_buf);
        }
        Ok(slot)
    }

    /// Reads slot `slot` into `page` and clears its bit.
    pub fn read_page(&self, slot: usize, page: &mut [u8; PAGE_SIZE]) {
        for i in 0..SECTORS_PER_PAGE {
            let mut sector_buf = [0u8; SECTOR_SIZE];
            self.disk.read(Sector((slot * SECTORS_PER_PAGE + i) as u32), &mut sector_buf);
            page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE].copy_from_slice(&sector_buf);
        }
        let mut bits = self.bits.lock();
        Self::set(&mut bits, slot, false);
        bits.unlock();
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        let bits = self.bits.lock();
        let r = Self::is_set(&bits, slot);
        bits.unlock();
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DeviceRole, MemDisk};

    #[test]
    fn write_then_read_round_trips_and_frees_slot() {
        let disk = Arc::new(MemDisk::new(DeviceRole::Swap, (SECTORS_PER_PAGE * 4) as u32));
        let swap = SwapTable::new(disk);
        let mut page = [0u8; PAGE_SIZE];
        for (i, b) in page.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let slot = swap.write_page(&page).unwrap();
        assert!(swap.is_occupied(slot));
        let mut out = [0u8; PAGE_SIZE];
        swap.read_page(slot, &mut out);
        assert_eq!(&out[..], &page[..]);
        assert!(!swap.is_occupied(slot));
    }

    #[test]
    fn exhausted_swap_reports_no_swap_space() {
        let disk = Arc::new(MemDisk::new(DeviceRole::Swap, SECTORS_PER_PAGE as u32));
        let swap = SwapTable::new(disk);
        let page = [0u8; PAGE_SIZE];
        swap.write_page(&page).unwrap();
        assert!(matches!(swap.write_page(&page), Err(KernelError::NoSwapSpace)));
    }
}
