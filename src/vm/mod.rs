//! The demand-paged virtual memory layer: supplemental page tables, the
//! frame table and its clock eviction, swap, and page-fault resolution.

pub mod address_space;
pub mod fault;
pub mod frame;
pub mod memory;
pub mod page_alloc;
pub mod spt;
pub mod swap;
pub mod types;

pub use address_space::AddressSpace;
pub use fault::{resolve_fault, FaultOutcome, PageFaultInfo, STACK_LIMIT};
pub use frame::FrameTable;
pub use memory::PhysicalMemory;
pub use page_alloc::PhysicalPageAllocator;
pub use swap::SwapTable;
pub use types::{PhysAddr, VirtAddr, PAGE_SIZE};
