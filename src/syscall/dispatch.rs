//! The numbered syscall table.
//!
//! Grounded on `keos-project1::syscall`'s per-number dispatch (one function
//! per syscall, arguments pulled off the user stack via `uaccess`, a
//! `FileStruct`-shaped fd table) and `keos-project5`'s filesystem syscalls
//! (`create`/`remove`/`open`/`read`/`write`/`seek`/`tell`/`close`/`chdir`/
//! `mkdir`/`readdir`/`isdir`/`inumber`), reworked onto this crate's
//! `Filesystem`/`FdTable`/`Kernel` types. `exec`/`wait`/`halt`/`pipe` are
//! out of scope (§1) and modeled as thin stubs over an injected
//! `ProcessLoader`.

use crate::error::KernelError;
use crate::fs::Inode;
use crate::kernel::Kernel;
use crate::process::Process;
use crate::syscall::fd::{FileKind, STDIN_FD, STDOUT_FD};
use crate::syscall::uaccess::{UserCString, UserU8SliceRO, UserU8SliceWO};
use std::sync::Arc;

/// The external collaborator for syscalls 0/2/3 (§1: "the user-process
/// loader ... and thread scheduler" is out of scope). The dispatcher only
/// needs to route the syscall to *something*; process creation, teardown
/// and scheduling live entirely on the embedder's side of this trait.
pub trait ProcessLoader: Send + Sync {
    /// Starts a new process running `cmd`, returning its tid.
    fn exec(&self, cmd: &str) -> i64;
    /// Blocks until `tid` exits, returning its exit status, or -1 if `tid`
    /// does not refer to a child.
    fn wait(&self, tid: i64) -> i64;
    /// Powers off the machine. Never returns.
    fn halt(&self) -> !;
}

/// Longest name `readdir` will hand back (matches the on-disk `NAME_MAX`
/// used by `DirEntry`, plus a null terminator).
const NAME_BUF_MAX: usize = crate::fs::layout::NAME_MAX + 1;

fn read_cstring(kernel: &Kernel, process: &Process, addr: usize) -> crate::error::Result<String> {
    UserCString::new(addr).read(kernel, process)
}

/// Dispatches syscall `num` with raw argument words `args`, returning the
/// syscall result word (already POSIX-sign-flipped for errors). A user
/// fault anywhere in argument validation marks `process` exited with
/// status -1 and returns -1, mirroring the syscall ABI's single `isize`
/// result channel; the caller is expected to check `process.has_exited()`
/// afterward and tear the process down if so (§7).
pub fn dispatch(
    kernel: &Kernel,
    process: &Arc<Process>,
    loader: &dyn ProcessLoader,
    num: usize,
    args: [usize; 3],
) -> isize {
    match handle(kernel, process, loader, num, args) {
        Ok(v) => v,
        Err(e) if e.is_user_fault() => {
            process.set_exit_status(-1);
            -1
        }
        Err(e) => e.into_syscall_result(),
    }
}

fn handle(
    kernel: &Kernel,
    process: &Arc<Process>,
    loader: &dyn ProcessLoader,
    num: usize,
    args: [usize; 3],
) -> crate::error::Result<isize> {
    match num {
        0 => loader.halt(),
        1 => {
            process.set_exit_status(args[0] as i32);
            Ok(0)
        }
        2 => {
            let cmd = read_cstring(kernel, process, args[0])?;
            Ok(loader.exec(&cmd) as isize)
        }
        3 => Ok(loader.wait(args[0] as i64) as isize),
        4 => sys_create(kernel, process, args),
        5 => sys_remove(kernel, process, args),
        6 => sys_open(kernel, process, args),
        7 => sys_filesize(process, args),
        8 => sys_read(kernel, process, args),
        9 => sys_write(kernel, process, args),
        10 => sys_seek(process, args),
        11 => sys_tell(process, args),
        12 => sys_close(kernel, process, args),
        15 => sys_chdir(kernel, process, args),
        16 => sys_mkdir(kernel, process, args),
        17 => sys_readdir(kernel, process, args),
        18 => sys_isdir(process, args),
        19 => sys_inumber(process, args),
        _ => Err(KernelError::InvalidArgument),
    }
}

fn sys_create(kernel: &Kernel, process: &Process, args: [usize; 3]) -> crate::error::Result<isize> {
    let name = read_cstring(kernel, process, args[0])?;
    let cwd = process.cwd();
    Ok(kernel.fs.create(&cwd, name.as_bytes(), args[1]).is_ok() as isize)
}

fn sys_remove(kernel: &Kernel, process: &Process, args: [usize; 3]) -> crate::error::Result<isize> {
    let name = read_cstring(kernel, process, args[0])?;
    let cwd = process.cwd();
    Ok(kernel.fs.remove(&cwd, name.as_bytes()).is_ok() as isize)
}

fn sys_open(kernel: &Kernel, process: &Process, args: [usize; 3]) -> crate::error::Result<isize> {
    let name = read_cstring(kernel, process, args[0])?;
    let cwd = process.cwd();
    let inode = match kernel.fs.open(&cwd, name.as_bytes()) {
        Ok(i) => i,
        Err(_) => return Ok(-1),
    };
    let kind = if inode.is_directory() {
        FileKind::Directory {
            inode,
            position: crate::sync::SpinLock::new(0),
        }
    } else {
        FileKind::Regular {
            inode,
            position: crate::sync::SpinLock::new(0),
        }
    };
    let mut table = process.fd_table.lock();
    let result = table.install(kind);
    table.unlock();
    Ok(result.map(|fd| fd as isize).unwrap_or(-1))
}

/// Looks up `fd` and hands back its backing inode, failing if it names
/// stdin/stdout or (when `want_dir` is `Some`) the wrong kind of inode.
fn regular_file(process: &Process, fd: usize) -> crate::error::Result<Arc<Inode>> {
    let table = process.fd_table.lock();
    let result = match table.get(fd) {
        Ok(FileKind::Regular { inode, .. }) => Ok(inode.clone()),
        Ok(FileKind::Directory { .. }) => Err(KernelError::IsADirectory),
        Ok(_) => Err(KernelError::BadFileDescriptor),
        Err(e) => Err(e),
    };
    table.unlock();
    result
}

fn position_of(process: &Process, fd: usize) -> crate::error::Result<usize> {
    let table = process.fd_table.lock();
    let result = table.get(fd).map(|k| k.position());
    table.unlock();
    result
}

fn set_position(process: &Process, fd: usize, pos: usize) {
    let table = process.fd_table.lock();
    if let Ok(k) = table.get(fd) {
        k.set_position(pos);
    }
    table.unlock();
}

fn sys_filesize(process: &Process, args: [usize; 3]) -> crate::error::Result<isize> {
    Ok(regular_file(process, args[0])?.length() as isize)
}

fn sys_read(kernel: &Kernel, process: &Process, args: [usize; 3]) -> crate::error::Result<isize> {
    let fd = args[0];
    let len = args[2];
    if fd == STDIN_FD {
        // No keyboard collaborator in this crate (§1); reads 0 bytes.
        return Ok(0);
    }
    let inode = regular_file(process, fd)?;
    let pos = position_of(process, fd)?;

    let mut buf = vec![0u8; len];
    let n = kernel.fs.read_at(&inode, &mut buf, pos);
    UserU8SliceWO::new(args[1], n).put(kernel, process, &buf[..n])?;
    set_position(process, fd, pos + n);
    Ok(n as isize)
}

fn sys_write(kernel: &Kernel, process: &Process, args: [usize; 3]) -> crate::error::Result<isize> {
    let fd = args[0];
    let len = args[2];
    let data = UserU8SliceRO::new(args[1], len).get(kernel, process)?;

    if fd == STDOUT_FD {
        // §6: terminal writes happen in 256-byte chunks.
        for chunk in data.chunks(256) {
            print!("{}", String::from_utf8_lossy(chunk));
        }
        return Ok(data.len() as isize);
    }

    let inode = regular_file(process, fd)?;
    let pos = position_of(process, fd)?;
    let n = kernel.fs.write_at(&inode, &data, pos)?;
    set_position(process, fd, pos + n);
    Ok(n as isize)
}

fn sys_seek(process: &Process, args: [usize; 3]) -> crate::error::Result<isize> {
    let table = process.fd_table.lock();
    let result = match table.get(args[0]) {
        Ok(FileKind::Stdin) | Ok(FileKind::Stdout) => Err(KernelError::BadFileDescriptor),
        Ok(k) => {
            k.set_position(args[1]);
            Ok(0)
        }
        Err(e) => Err(e),
    };
    table.unlock();
    result
}

fn sys_tell(process: &Process, args: [usize; 3]) -> crate::error::Result<isize> {
    let table = process.fd_table.lock();
    let result = match table.get(args[0]) {
        Ok(FileKind::Stdin) | Ok(FileKind::Stdout) => Err(KernelError::BadFileDescriptor),
        Ok(k) => Ok(k.position() as isize),
        Err(e) => Err(e),
    };
    table.unlock();
    result
}

fn sys_close(kernel: &Kernel, process: &Process, args: [usize; 3]) -> crate::error::Result<isize> {
    let mut table = process.fd_table.lock();
    let result = table.close(args[0]);
    table.unlock();
    let file = result?;
    if let Some(inode) = file.inode() {
        kernel.fs.close_inode(inode.clone());
    }
    Ok(0)
}

fn sys_chdir(kernel: &Kernel, process: &Process, args: [usize; 3]) -> crate::error::Result<isize> {
    let name = read_cstring(kernel, process, args[0])?;
    let cwd = process.cwd();
    match kernel.fs.open(&cwd, name.as_bytes()) {
        Ok(dir) if dir.is_directory() => {
            process.set_cwd(dir);
            Ok(1)
        }
        Ok(dir) => {
            kernel.fs.close_inode(dir);
            Ok(0)
        }
        Err(_) => Ok(0),
    }
}

fn sys_mkdir(kernel: &Kernel, process: &Process, args: [usize; 3]) -> crate::error::Result<isize> {
    let name = read_cstring(kernel, process, args[0])?;
    let cwd = process.cwd();
    Ok(kernel.fs.mkdir(&cwd, name.as_bytes()).is_ok() as isize)
}

fn sys_readdir(kernel: &Kernel, process: &Process, args: [usize; 3]) -> crate::error::Result<isize> {
    let fd = args[0];
    let table = process.fd_table.lock();
    let inode = match table.get(fd) {
        Ok(FileKind::Directory { inode, .. }) => inode.clone(),
        Ok(_) => {
            table.unlock();
            return Err(KernelError::NotADirectory);
        }
        Err(e) => {
            table.unlock();
            return Err(e);
        }
    };
    table.unlock();
    let pos = position_of(process, fd)?;

    let mut cursor = pos;
    let name = kernel.fs.readdir(&inode, &mut cursor);
    set_position(process, fd, cursor);

    match name {
        Some(name) if name.len() < NAME_BUF_MAX => {
            let mut bytes = name;
            bytes.push(0);
            UserU8SliceWO::new(args[1], bytes.len()).put(kernel, process, &bytes)?;
            Ok(1)
        }
        _ => Ok(0),
    }
}

fn sys_isdir(process: &Process, args: [usize; 3]) -> crate::error::Result<isize> {
    let table = process.fd_table.lock();
    let result = table.get(args[0]).map(|k| k.is_directory() as isize);
    table.unlock();
    result
}

fn sys_inumber(process: &Process, args: [usize; 3]) -> crate::error::Result<isize> {
    let table = process.fd_table.lock();
    let result = table
        .get(args[0])
        .and_then(|k| k.inode().map(|i| i.sector as isize).ok_or(KernelError::BadFileDescriptor));
    table.unlock();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DeviceRole, MemDisk};
    use crate::kernel::{FilesystemConfig, VmConfig};
    use crate::sync::SpinLock;
    use crate::vm::address_space::AddressSpace;
    use crate::vm::memory::MockPhysicalMemory;
    use crate::vm::page_alloc::MockPageAllocator;
    use crate::vm::types::{PhysAddr, VirtAddr};

    /// Never consulted by this module's tests: nothing here touches a page
    /// table, only the fd table and the filesystem facade.
    struct NullAddressSpace;

    impl AddressSpace for NullAddressSpace {
        fn is_present(&self, _upage: VirtAddr) -> bool {
            false
        }
        fn is_accessed(&self, _upage: VirtAddr) -> bool {
            false
        }
        fn clear_accessed(&self, _upage: VirtAddr) {}
        fn is_dirty(&self, _upage: VirtAddr) -> bool {
            false
        }
        fn set_dirty(&self, _upage: VirtAddr, _dirty: bool) {}
        fn install_page(&self, _upage: VirtAddr, _frame: PhysAddr, _writable: bool) {}
        fn clear_mapping(&self, _upage: VirtAddr) {}
        fn is_user_address(&self, _addr: VirtAddr) -> bool {
            true
        }
        fn translate(&self, _upage: VirtAddr) -> Option<PhysAddr> {
            None
        }
    }

    fn test_kernel() -> Kernel {
        let fs_disk = Arc::new(MemDisk::new(DeviceRole::FileSys, 4096));
        let swap_disk = Arc::new(MemDisk::new(DeviceRole::Swap, 64));
        Kernel::boot(
            fs_disk,
            swap_disk,
            Arc::new(MockPageAllocator::new(4)),
            Arc::new(MockPhysicalMemory::new(PhysAddr(0), 4)),
            FilesystemConfig {
                num_sectors: 4096,
                max_open_files: 16,
            },
            VmConfig {
                frame_base: PhysAddr(0),
                frame_count: 4,
            },
        )
    }

    /// §8 scenario 1: `open` then `close` then `remove` must bring the
    /// free-sector count back to baseline. This only holds if `sys_close`
    /// actually releases the fd's inode handle instead of just dropping the
    /// `FileKind` — a leaked open count pins the inode in its removed-but-
    /// not-reclaimed state forever.
    #[test]
    fn close_releases_the_backing_inode_so_remove_reclaims_its_sectors() {
        let kernel = test_kernel();
        let root = kernel.fs.root().unwrap();
        let process = Arc::new(Process::new(0, Arc::new(NullAddressSpace), root.clone(), 16));

        let baseline = kernel.fs.free_sectors();
        kernel.fs.create(&root, b"a", 0).unwrap();
        let inode = kernel.fs.open(&root, b"a").unwrap();
        let fd = {
            let mut table = process.fd_table.lock();
            let fd = table
                .install(FileKind::Regular {
                    inode,
                    position: SpinLock::new(0),
                })
                .unwrap();
            table.unlock();
            fd
        };

        assert_eq!(sys_close(&kernel, &process, [fd, 0, 0]).unwrap(), 0);
        kernel.fs.remove(&root, b"a").unwrap();
        assert_eq!(kernel.fs.free_sectors(), baseline);

        kernel.fs.close_inode(root);
    }

    /// A directory fd closed without ever being removed must also give up
    /// its open count, or the open-inode cache never shrinks back down.
    #[test]
    fn closing_a_directory_fd_drops_its_open_count_too() {
        let kernel = test_kernel();
        let root = kernel.fs.root().unwrap();
        let process = Arc::new(Process::new(0, Arc::new(NullAddressSpace), root.clone(), 16));

        kernel.fs.mkdir(&root, b"d").unwrap();
        let dir = kernel.fs.open(&root, b"d").unwrap();
        let fd = {
            let mut table = process.fd_table.lock();
            let fd = table
                .install(FileKind::Directory {
                    inode: dir,
                    position: SpinLock::new(0),
                })
                .unwrap();
            table.unlock();
            fd
        };

        assert_eq!(sys_close(&kernel, &process, [fd, 0, 0]).unwrap(), 0);
        // With the fd's handle released, `remove` finds the directory with
        // no other opener and is free to reclaim it immediately.
        kernel.fs.remove(&root, b"d").unwrap();

        kernel.fs.close_inode(root);
    }
}
