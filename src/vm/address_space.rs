//! The page-table contract delegated to the embedder.
//!
//! Grounded on `keos::task::Task::access_ok` and `abyss::addressing`'s
//! present/dirty/accessed bit access, generalised into a trait so this
//! crate never links against a real page-table walker. The *policy* of
//! what counts as user-accessible lives here; the core only asks yes/no
//! questions of it (§1).

use crate::vm::types::{PhysAddr, VirtAddr};

pub trait AddressSpace: Send + Sync {
    /// Whether `upage` currently has a present mapping in this address
    /// space.
    fn is_present(&self, upage: VirtAddr) -> bool;

    /// Hardware accessed bit for `upage`. Only meaningful if present.
    fn is_accessed(&self, upage: VirtAddr) -> bool;
    fn clear_accessed(&self, upage: VirtAddr);

    /// Hardware dirty bit for `upage`. Only meaningful if present.
    fn is_dirty(&self, upage: VirtAddr) -> bool;
    fn set_dirty(&self, upage: VirtAddr, dirty: bool);

    /// Installs a present mapping `upage -> frame`, user-accessible, with
    /// the given writability.
    fn install_page(&self, upage: VirtAddr, frame: PhysAddr, writable: bool);

    /// Clears any mapping for `upage`.
    fn clear_mapping(&self, upage: VirtAddr);

    /// Whether `addr` lies below the user/kernel virtual boundary.
    fn is_user_address(&self, addr: VirtAddr) -> bool;

    /// The physical frame currently backing `upage`, if present. Used by
    /// `uaccess` to turn a validated user pointer into a physical address
    /// without a raw page-table walk living in this crate.
    fn translate(&self, upage: VirtAddr) -> Option<PhysAddr>;
}
