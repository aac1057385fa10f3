//! Per-process kernel-visible state.
//!
//! Grounded on `keos-project1::file_struct::FileStruct` (fd table + cwd
//! bundled per task) and `keos-project4`'s per-process SPT, brought
//! together into one value the syscall and fault-resolution layers both
//! take a reference to (§3 "process-local state").

use crate::fs::Inode;
use crate::sync::SpinLock;
use crate::syscall::fd::FdTable;
use crate::vm::address_space::AddressSpace;
use crate::vm::spt::SupplementalPageTable;
use crate::vm::types::VirtAddr;
use std::sync::Arc;

pub struct Process {
    pub id: u64,
    pub address_space: Arc<dyn AddressSpace>,
    /// Shared (not embedded) so the frame table can hold its own handle to
    /// the same SPT a process owns, without holding an `Arc<Process>` (§4.5
    /// "the frame table records owner + page, not a whole process").
    pub spt: Arc<SpinLock<SupplementalPageTable>>,
    pub cwd: SpinLock<Arc<Inode>>,
    pub fd_table: SpinLock<FdTable>,
    /// The user stack pointer at the most recent trap into the kernel,
    /// used by the fault resolver's stack-growth heuristic (§4.6).
    pub user_esp: SpinLock<VirtAddr>,
    /// Set once by `exit`/a user-fault kill; `None` while still running.
    exit_status: SpinLock<Option<i32>>,
}

impl Process {
    pub fn new(
        id: u64,
        address_space: Arc<dyn AddressSpace>,
        cwd: Arc<Inode>,
        max_open_files: usize,
    ) -> Self {
        Self {
            id,
            address_space,
            spt: Arc::new(SpinLock::new(SupplementalPageTable::new())),
            cwd: SpinLock::new(cwd),
            fd_table: SpinLock::new(FdTable::new(max_open_files)),
            user_esp: SpinLock::new(VirtAddr(0)),
            exit_status: SpinLock::new(None),
        }
    }

    pub fn cwd(&self) -> Arc<Inode> {
        let g = self.cwd.lock();
        let cwd = g.clone();
        g.unlock();
        cwd
    }

    pub fn set_cwd(&self, dir: Arc<Inode>) {
        let mut g = self.cwd.lock();
        *g = dir;
        g.unlock();
    }

    pub fn set_user_esp(&self, esp: VirtAddr) {
        let mut g = self.user_esp.lock();
        *g = esp;
        g.unlock();
    }

    pub fn user_esp(&self) -> VirtAddr {
        let g = self.user_esp.lock();
        let esp = *g;
        g.unlock();
        esp
    }

    /// Records the process's exit status. Idempotent: a kill that races an
    /// explicit `exit` keeps whichever status landed first.
    pub fn set_exit_status(&self, status: i32) {
        let mut g = self.exit_status.lock();
        if g.is_none() {
            *g = Some(status);
        }
        g.unlock();
    }

    pub fn exit_status(&self) -> Option<i32> {
        let g = self.exit_status.lock();
        let s = *g;
        g.unlock();
        s
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }
}
