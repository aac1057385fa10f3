//! User-space pointer and buffer validation.
//!
//! Grounded on `keos::syscall::uaccess::{UserPtrRO, UserPtrWO,
//! UserU8SliceRO, UserU8SliceWO, UserCString}` — the same one-time,
//! ownership-consuming pointer types, adapted to validate against the
//! crate's injected `AddressSpace`/`PhysicalMemory` traits instead of a raw
//! page-table walk, and to lazily page in stack growth by handing the
//! touched range to [`crate::vm::resolve_fault`] rather than requiring the
//! page already be present (§6 "present in the current process's address
//! space OR qualify as stack growth").

use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use crate::process::Process;
use crate::vm::{FaultOutcome, PageFaultInfo, VirtAddr, PAGE_SIZE};

/// Validates that every byte in `[addr, addr+len)` is accessible to
/// `process` for `write`, paging in stack growth as needed, and returns
/// the physical address each touched page resolved to (`None` entries
/// never occur; physical addresses are looked up fresh after any fault so
/// a reader never races an eviction that moved the page).
fn ensure_range_mapped(kernel: &Kernel, process: &Process, addr: usize, len: usize, write: bool) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    if addr == 0 || !process.address_space.is_user_address(VirtAddr(addr)) {
        return Err(KernelError::BadAddress);
    }
    let end = addr.checked_add(len).ok_or(KernelError::BadAddress)?;
    if !process.address_space.is_user_address(VirtAddr(end.saturating_sub(1))) {
        return Err(KernelError::BadAddress);
    }

    let first_page = addr - (addr % PAGE_SIZE);
    let mut page = first_page;
    while page < end {
        if !process.address_space.is_present(VirtAddr(page)) {
            let _g = kernel.vm_lock.lock();
            let info = PageFaultInfo {
                fault_addr: VirtAddr(page),
                present: false,
                write,
                user: true,
                user_esp: process.user_esp(),
                user_va_top: VirtAddr(0xC000_0000),
            };
            let outcome = crate::vm::resolve_fault(
                process,
                &info,
                &kernel.frames,
                &kernel.swap,
                &*kernel.alloc,
                &kernel.fs,
                &*kernel.phys_mem,
            );
            _g.unlock();
            if outcome == FaultOutcome::Kill {
                return Err(KernelError::BadAddress);
            }
        } else if write {
            let spt = process.spt.lock();
            let writable = spt.get(VirtAddr(page)).map(|e| e.writable).unwrap_or(false);
            spt.unlock();
            if !writable {
                return Err(KernelError::InvalidAccess);
            }
        }
        page += PAGE_SIZE;
    }
    Ok(())
}

/// A one-time, read-only handle on a user-space object of type `T`.
pub struct UserPtrRO<T: Copy> {
    addr: usize,
    _ty: std::marker::PhantomData<T>,
}

impl<T: Copy> UserPtrRO<T> {
    pub fn new(addr: usize) -> Self {
        Self {
            addr,
            _ty: std::marker::PhantomData,
        }
    }

    pub fn get(self, kernel: &Kernel, process: &Process) -> Result<T> {
        let size = std::mem::size_of::<T>();
        ensure_range_mapped(kernel, process, self.addr, size, false)?;
        let mut buf = vec![0u8; size];
        let mut done = 0;
        while done < size {
            let page = (self.addr + done) - ((self.addr + done) % PAGE_SIZE);
            let page_off = (self.addr + done) - page;
            let frame = process
                .address_space
                .translate(VirtAddr(page))
                .ok_or(KernelError::BadAddress)?;
            let chunk = (PAGE_SIZE - page_off).min(size - done);
            let mut frame_buf = [0u8; PAGE_SIZE];
            kernel.phys_mem.read(frame, &mut frame_buf);
            buf[done..done + chunk].copy_from_slice(&frame_buf[page_off..page_off + chunk]);
            done += chunk;
        }
        Ok(unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const T) })
    }
}

/// A one-time, write-only handle on a user-space object of type `T`.
pub struct UserPtrWO<T: Copy> {
    addr: usize,
    _ty: std::marker::PhantomData<T>,
}

impl<T: Copy> UserPtrWO<T> {
    pub fn new(addr: usize) -> Self {
        Self {
            addr,
            _ty: std::marker::PhantomData,
        }
    }

    pub fn put(self, kernel: &Kernel, process: &Process, value: T) -> Result<usize> {
        let size = std::mem::size_of::<T>();
        ensure_range_mapped(kernel, process, self.addr, size, true)?;
        let bytes = unsafe { std::slice::from_raw_parts(&value as *const T as *const u8, size) };
        write_bytes_to_user(kernel, process, self.addr, bytes)
    }
}

/// A one-time, read-only handle on a user-space `u8` slice.
pub struct UserU8SliceRO {
    addr: usize,
    len: usize,
}

impl UserU8SliceRO {
    pub fn new(addr: usize, len: usize) -> Self {
        Self { addr, len }
    }

    pub fn get(self, kernel: &Kernel, process: &Process) -> Result<Vec<u8>> {
        ensure_range_mapped(kernel, process, self.addr, self.len, false)?;
        let mut out = vec![0u8; self.len];
        let mut done = 0;
        while done < self.len {
            let cur = self.addr + done;
            let page = cur - (cur % PAGE_SIZE);
            let page_off = cur - page;
            let frame = process
                .address_space
                .translate(VirtAddr(page))
                .ok_or(KernelError::BadAddress)?;
            let chunk = (PAGE_SIZE - page_off).min(self.len - done);
            let mut frame_buf = [0u8; PAGE_SIZE];
            kernel.phys_mem.read(frame, &mut frame_buf);
            out[done..done + chunk].copy_from_slice(&frame_buf[page_off..page_off + chunk]);
            done += chunk;
        }
        Ok(out)
    }
}

/// A one-time, write-only handle on a user-space `u8` slice.
pub struct UserU8SliceWO {
    addr: usize,
    len: usize,
}

impl UserU8SliceWO {
    pub fn new(addr: usize, len: usize) -> Self {
        Self { addr, len }
    }

    pub fn put(self, kernel: &Kernel, process: &Process, data: &[u8]) -> Result<usize> {
        let size = self.len.min(data.len());
        ensure_range_mapped(kernel, process, self.addr, size, true)?;
        write_bytes_to_user(kernel, process, self.addr, &data[..size])
    }
}

fn write_bytes_to_user(kernel: &Kernel, process: &Process, addr: usize, data: &[u8]) -> Result<usize> {
    let mut done = 0;
    while done < data.len() {
        let cur = addr + done;
        let page = cur - (cur % PAGE_SIZE);
        let page_off = cur - page;
        let frame = process
            .address_space
            .translate(VirtAddr(page))
            .ok_or(KernelError::BadAddress)?;
        let chunk = (PAGE_SIZE - page_off).min(data.len() - done);
        let mut frame_buf = [0u8; PAGE_SIZE];
        kernel.phys_mem.read(frame, &mut frame_buf);
        frame_buf[page_off..page_off + chunk].copy_from_slice(&data[done..done + chunk]);
        kernel.phys_mem.write(frame, &frame_buf);
        process.address_space.set_dirty(VirtAddr(page), true);
        done += chunk;
    }
    Ok(data.len())
}

/// A pointer to a null-terminated string in user-space, read one byte at a
/// time so it never over-reads past the terminator.
pub struct UserCString {
    addr: usize,
}

impl UserCString {
    pub fn new(addr: usize) -> Self {
        Self { addr }
    }

    pub fn read(self, kernel: &Kernel, process: &Process) -> Result<String> {
        let mut out = Vec::new();
        let mut ptr = self.addr;
        loop {
            let byte: u8 = UserPtrRO::new(ptr).get(kernel, process)?;
            if byte == 0 {
                return String::from_utf8(out).map_err(|_| KernelError::InvalidArgument);
            }
            out.push(byte);
            ptr += 1;
        }
    }
}
