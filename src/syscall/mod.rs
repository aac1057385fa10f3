//! The kernel-side syscall surface: the fixed-size file-descriptor table,
//! user-pointer validation, and the numbered dispatch table.

pub mod dispatch;
pub mod fd;
pub mod uaccess;

pub use dispatch::{dispatch, ProcessLoader};
pub use fd::{FdTable, FileKind};
