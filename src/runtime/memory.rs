//! Executable memory for compiled units.
//!
//! Pages are mapped read+write, filled, then flipped to read+execute. Write
//! and execute permission are never granted at the same time, and a mapping
//! is owned by a guard from the moment it exists, so every failure path
//! unmaps it.

use indexmap::IndexMap;
use std::ptr;

use crate::codegen::{CompiledUnit, FunctionOffset};
use crate::error::MemoryMapError;
use crate::ir::IntType;

/// Filler for the unused tail of the last page (`int3`)
const TRAP_FILL: u8 = 0xCC;

/// Host page size
pub fn page_size() -> Result<usize, MemoryMapError> {
    sys::page_size()
}

/// An anonymous page-aligned mapping, unmapped exactly once
#[derive(Debug)]
pub(crate) struct Mapping {
    ptr: *mut u8,
    len: usize,
}

// The mapping is exclusively owned; moving it to another thread is fine.
unsafe impl Send for Mapping {}

impl Mapping {
    /// Map `len` bytes of read+write memory
    pub(crate) fn read_write(len: usize) -> Result<Self, MemoryMapError> {
        let ptr = sys::map_read_write(len)?;
        log::trace!("mapped {} bytes at {:p}", len, ptr);
        Ok(Self { ptr, len })
    }

    /// Drop write permission and grant execute permission
    pub(crate) fn make_executable(&mut self) -> Result<(), MemoryMapError> {
        sys::protect_read_exec(self.ptr, self.len)
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_mapped(&self) -> bool {
        !self.ptr.is_null()
    }

    /// Unmap the region. Calling this again is a no-op.
    pub(crate) fn unmap(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        if let Err(message) = sys::unmap(self.ptr, self.len) {
            log::warn!("unmap of {} bytes at {:p} failed: {}", self.len, self.ptr, message);
        } else {
            log::trace!("unmapped {} bytes at {:p}", self.len, self.ptr);
            #[cfg(all(test, any(unix, windows), target_arch = "x86_64"))]
            tests::UNMAPS.with(|n| n.set(n.get() + 1));
        }
        self.ptr = ptr::null_mut();
        self.len = 0;
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        self.unmap();
    }
}

/// A loaded, runnable copy of a [`CompiledUnit`].
///
/// Owns its mapping exclusively and unmaps it when dropped or released. The
/// image is `Send` but not `Sync`: it may be handed to the thread that runs
/// the game loop, but never invoked from two threads at once.
#[derive(Debug)]
pub struct ExecutableImage {
    mapping: Mapping,
    code_len: usize,
    functions: IndexMap<String, FunctionOffset>,
    entry: String,
}

impl ExecutableImage {
    /// Map the smallest number of pages that hold `unit`
    pub fn load(unit: &CompiledUnit) -> Result<Self, MemoryMapError> {
        Self::load_with_pages(unit, 0)
    }

    /// Map at least `min_pages` pages (more if the unit needs them)
    pub fn load_with_pages(unit: &CompiledUnit, min_pages: usize) -> Result<Self, MemoryMapError> {
        Self::load_with(unit, min_pages, Mapping::make_executable)
    }

    /// Load with a custom permission switch for the filled mapping
    pub(crate) fn load_with<F>(unit: &CompiledUnit, min_pages: usize, protect: F) -> Result<Self, MemoryMapError>
    where
        F: FnOnce(&mut Mapping) -> Result<(), MemoryMapError>,
    {
        if unit.is_empty() {
            return Err(MemoryMapError::EmptyUnit);
        }

        let page = page_size()?;
        let pages = unit.len().div_ceil(page).max(min_pages);
        let size = pages
            .checked_mul(page)
            .ok_or(MemoryMapError::SizeOverflow { pages })?;

        let mut mapping = Mapping::read_write(size)?;
        // SAFETY: the mapping is `size >= unit.len()` bytes of fresh writable
        // memory that nothing else references.
        unsafe {
            ptr::copy_nonoverlapping(unit.code().as_ptr(), mapping.ptr, unit.len());
            ptr::write_bytes(mapping.ptr.add(unit.len()), TRAP_FILL, size - unit.len());
        }
        protect(&mut mapping)?;

        log::debug!(
            "loaded {} bytes into {} page(s) at {:p}",
            unit.len(),
            pages,
            mapping.as_ptr()
        );

        Ok(Self {
            mapping,
            code_len: unit.len(),
            functions: unit.functions().map(|(path, f)| (path.to_string(), *f)).collect(),
            entry: unit.entry_path().to_string(),
        })
    }

    /// Unmap the image. Consuming `self` guarantees it is never invoked again.
    pub fn release(mut self) {
        log::debug!("releasing image at {:p}", self.mapping.as_ptr());
        self.mapping.unmap();
    }

    pub fn base(&self) -> *const u8 {
        self.mapping.as_ptr()
    }

    /// Bytes mapped (a whole number of pages)
    pub fn mapped_len(&self) -> usize {
        self.mapping.len()
    }

    /// Bytes of machine code
    pub fn code_len(&self) -> usize {
        self.code_len
    }

    pub fn entry_path(&self) -> &str {
        &self.entry
    }

    pub fn entry_return_type(&self) -> Option<IntType> {
        self.entry_function().return_type
    }

    pub(crate) fn entry_function(&self) -> FunctionOffset {
        self.functions[self.entry.as_str()]
    }

    pub(crate) fn function(&self, path: &str) -> Option<FunctionOffset> {
        self.functions.get(path).copied()
    }

    /// Read back the loaded code (the pages stay readable)
    pub fn code(&self) -> &[u8] {
        // SAFETY: the first `code_len` bytes were initialised from the unit
        // and the mapping is read-only from here on.
        unsafe { std::slice::from_raw_parts(self.mapping.as_ptr(), self.code_len) }
    }
}

#[cfg(all(unix, target_arch = "x86_64"))]
mod sys {
    use crate::error::MemoryMapError;
    use std::io;
    use std::ptr;

    pub(super) fn page_size() -> Result<usize, MemoryMapError> {
        // SAFETY: sysconf has no memory-safety preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 {
            return Err(MemoryMapError::PageSize {
                message: io::Error::last_os_error().to_string(),
            });
        }
        Ok(size as usize)
    }

    pub(super) fn map_read_write(len: usize) -> Result<*mut u8, MemoryMapError> {
        // SAFETY: anonymous private mapping at a kernel-chosen address.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(MemoryMapError::Map {
                size: len,
                message: io::Error::last_os_error().to_string(),
            });
        }
        Ok(ptr.cast())
    }

    pub(super) fn protect_read_exec(ptr: *mut u8, len: usize) -> Result<(), MemoryMapError> {
        // SAFETY: `ptr..ptr + len` is a mapping we own.
        let result = unsafe { libc::mprotect(ptr.cast(), len, libc::PROT_READ | libc::PROT_EXEC) };
        if result != 0 {
            return Err(MemoryMapError::Protect {
                size: len,
                message: io::Error::last_os_error().to_string(),
            });
        }
        Ok(())
    }

    pub(super) fn unmap(ptr: *mut u8, len: usize) -> Result<(), String> {
        // SAFETY: `ptr..ptr + len` is a mapping we own and nobody uses anymore.
        let result = unsafe { libc::munmap(ptr.cast(), len) };
        if result != 0 {
            return Err(io::Error::last_os_error().to_string());
        }
        Ok(())
    }
}

#[cfg(all(windows, target_arch = "x86_64"))]
mod sys {
    use crate::error::MemoryMapError;
    use std::io;
    use std::ptr;
    use winapi::um::memoryapi::{VirtualAlloc, VirtualFree, VirtualProtect};
    use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
    use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READ, PAGE_READWRITE};

    pub(super) fn page_size() -> Result<usize, MemoryMapError> {
        // SAFETY: GetSystemInfo only fills the struct it is given.
        let info = unsafe {
            let mut info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut info);
            info
        };
        if info.dwPageSize == 0 {
            return Err(MemoryMapError::PageSize {
                message: "GetSystemInfo reported a zero page size".to_string(),
            });
        }
        Ok(info.dwPageSize as usize)
    }

    pub(super) fn map_read_write(len: usize) -> Result<*mut u8, MemoryMapError> {
        // SAFETY: fresh reservation at a system-chosen address.
        let ptr = unsafe { VirtualAlloc(ptr::null_mut(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };
        if ptr.is_null() {
            return Err(MemoryMapError::Map {
                size: len,
                message: io::Error::last_os_error().to_string(),
            });
        }
        Ok(ptr.cast())
    }

    pub(super) fn protect_read_exec(ptr: *mut u8, len: usize) -> Result<(), MemoryMapError> {
        let mut old = 0;
        // SAFETY: `ptr..ptr + len` is an allocation we own.
        let ok = unsafe { VirtualProtect(ptr.cast(), len, PAGE_EXECUTE_READ, &mut old) };
        if ok == 0 {
            return Err(MemoryMapError::Protect {
                size: len,
                message: io::Error::last_os_error().to_string(),
            });
        }
        Ok(())
    }

    pub(super) fn unmap(ptr: *mut u8, _len: usize) -> Result<(), String> {
        // SAFETY: `ptr` is the base of an allocation we own; MEM_RELEASE requires size 0.
        let ok = unsafe { VirtualFree(ptr.cast(), 0, MEM_RELEASE) };
        if ok == 0 {
            return Err(io::Error::last_os_error().to_string());
        }
        Ok(())
    }
}

#[cfg(not(all(any(unix, windows), target_arch = "x86_64")))]
mod sys {
    use crate::error::MemoryMapError;

    pub(super) fn page_size() -> Result<usize, MemoryMapError> {
        Err(MemoryMapError::UnsupportedHost)
    }

    pub(super) fn map_read_write(_len: usize) -> Result<*mut u8, MemoryMapError> {
        Err(MemoryMapError::UnsupportedHost)
    }

    pub(super) fn protect_read_exec(_ptr: *mut u8, _len: usize) -> Result<(), MemoryMapError> {
        Err(MemoryMapError::UnsupportedHost)
    }

    pub(super) fn unmap(_ptr: *mut u8, _len: usize) -> Result<(), String> {
        Ok(())
    }
}
