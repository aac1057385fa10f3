//! The per-process supplemental page table: where a user page's data
//! actually lives right now.
//!
//! Grounded on `keos-project4`'s per-process SPT (`HashMap<Va,
//! SptEntry>`-shaped) generalised to the crate's own `VirtAddr`/`PhysAddr`
//! newtypes and three-way location enum from §3.

use crate::vm::types::{PhysAddr, VirtAddr};
use std::collections::HashMap;
use std::sync::Arc;

/// Where an SPT entry's bytes currently live. Exactly one variant is valid
/// at a time (§3 invariant).
#[derive(Clone)]
pub enum Location {
    InFrame(PhysAddr),
    InFile,
    InSwap(usize),
}

/// Retained alongside the current `Location` for a file-backed page even
/// while it sits `InFrame`, so a later clean eviction can fall back to
/// `InFile` without re-deriving where the page came from.
#[derive(Clone)]
pub struct FileBacking {
    pub file: Arc<crate::fs::Inode>,
    pub file_offset: usize,
    pub read_bytes: usize,
}

#[derive(Clone)]
pub struct SptEntry {
    pub upage: VirtAddr,
    pub location: Location,
    pub writable: bool,
    /// `Some` for a page that originated from a file mapping; `None` for
    /// purely anonymous (stack) pages, which can only ever round-trip
    /// through swap.
    pub file_backing: Option<FileBacking>,
}

/// Keyed by page-aligned virtual address. One of these lives per process.
#[derive(Default)]
pub struct SupplementalPageTable {
    entries: HashMap<VirtAddr, SptEntry>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, upage: VirtAddr) -> Option<&SptEntry> {
        self.entries.get(&upage)
    }

    pub fn insert(&mut self, entry: SptEntry) {
        self.entries.insert(entry.upage, entry);
    }

    pub fn remove(&mut self, upage: VirtAddr) -> Option<SptEntry> {
        self.entries.remove(&upage)
    }

    pub fn set_location(&mut self, upage: VirtAddr, location: Location) {
        if let Some(e) = self.entries.get_mut(&upage) {
            e.location = location;
        }
    }
}
