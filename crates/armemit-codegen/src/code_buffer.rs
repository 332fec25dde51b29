use std::ptr;

use tracing::debug;

/// Default reservation: 128MB virtual address space.
pub const DEFAULT_RESERVE: usize = 128 * 1024 * 1024;

/// Initial committed region: 64KB.
pub const INITIAL_COMMIT: usize = 64 * 1024;

/// Executable memory for generated code.
///
/// Uses a reservation model: reserves a large virtual address range via
/// mmap with PROT_NONE (no physical pages), then commits pages on demand as
/// words are appended.
///
/// Lifecycle:
/// 1. `new(size)` / `with_reserve(..)`: reserve address space, commit initial pages
/// 2. `emit_u32(word)` / `emit_words(..)`: append words (grows the committed region)
/// 3. `finalize()`: flip committed pages to execute, invalidate the icache
/// 4. `entry()`: pointer to the start of the code
/// 5. `reopen()`: flip back to read+write to patch or append
///
/// A guard page at the end of the reservation catches overruns. The mapping
/// is released on drop.
pub struct CodeBuffer {
    base: *mut u8,
    /// Total mmap'd size (reserved + guard page).
    reserved: usize,
    /// Bytes currently committed (RW). Always page-aligned.
    committed: usize,
    /// Bytes emitted so far.
    len: usize,
    finalized: bool,
}

// The mapping is owned exclusively and never aliased. After `finalize()`
// it is only executed, never written.
unsafe impl Send for CodeBuffer {}
unsafe impl Sync for CodeBuffer {}

impl CodeBuffer {
    /// Allocate a code buffer with at least `min_size` bytes initially
    /// committed inside the default 128MB reservation.
    pub fn new(min_size: usize) -> Result<Self, anyhow::Error> {
        Self::with_reserve(DEFAULT_RESERVE, min_size)
    }

    /// Reserve `reserve` bytes of address space (rounded up to whole pages,
    /// never less than the initial commit) and commit enough pages for
    /// `min_size` bytes.
    pub fn with_reserve(reserve: usize, min_size: usize) -> Result<Self, anyhow::Error> {
        let page_size = page_size();
        let initial_commit = align_up(min_size.max(INITIAL_COMMIT), page_size);
        let reserve = align_up(reserve.max(initial_commit), page_size);
        let total = reserve + page_size; // + guard page

        // Reserve entire range as PROT_NONE (no physical pages).
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        anyhow::ensure!(base != libc::MAP_FAILED, "code buffer mmap of {total} bytes failed");

        let ret = unsafe { libc::mprotect(base, initial_commit, libc::PROT_READ | libc::PROT_WRITE) };
        if ret != 0 {
            unsafe { libc::munmap(base, total) };
            anyhow::bail!("code buffer mprotect (RW) failed");
        }

        debug!(reserve, initial_commit, "reserve code buffer");
        Ok(CodeBuffer {
            base: base as *mut u8,
            reserved: total,
            committed: initial_commit,
            len: 0,
            finalized: false,
        })
    }

    /// Append one little-endian instruction word.
    pub fn emit_u32(&mut self, word: u32) -> Result<(), anyhow::Error> {
        anyhow::ensure!(!self.finalized, "cannot emit into a finalized code buffer");
        self.ensure_capacity(4)?;
        unsafe {
            let dst = self.base.add(self.len) as *mut u32;
            ptr::write(dst, word.to_le());
        }
        self.len += 4;
        Ok(())
    }

    /// Append a run of words.
    pub fn emit_words(&mut self, words: &[u32]) -> Result<(), anyhow::Error> {
        anyhow::ensure!(!self.finalized, "cannot emit into a finalized code buffer");
        self.ensure_capacity(words.len() * 4)?;
        for &word in words {
            self.emit_u32(word)?;
        }
        Ok(())
    }

    /// Overwrite a previously emitted word at byte offset `offset`.
    pub fn patch_u32(&mut self, offset: usize, word: u32) -> Result<(), anyhow::Error> {
        anyhow::ensure!(!self.finalized, "cannot patch a finalized code buffer");
        anyhow::ensure!(
            offset % 4 == 0 && offset + 4 <= self.len,
            "patch offset {offset:#x} outside emitted code ({} bytes)",
            self.len
        );
        unsafe {
            let dst = self.base.add(offset) as *mut u32;
            ptr::write(dst, word.to_le());
        }
        Ok(())
    }

    /// Read back a word at byte offset `offset`.
    ///
    /// Only valid before `finalize()`: finalized pages are execute-only.
    pub fn read_u32(&self, offset: usize) -> Result<u32, anyhow::Error> {
        anyhow::ensure!(!self.finalized, "cannot read a finalized (execute-only) code buffer");
        anyhow::ensure!(
            offset % 4 == 0 && offset + 4 <= self.len,
            "read offset {offset:#x} outside emitted code ({} bytes)",
            self.len
        );
        let word = unsafe {
            let src = self.base.add(offset) as *const u32;
            ptr::read(src)
        };
        Ok(u32::from_le(word))
    }

    /// Flip the buffer to execute-only and invalidate the instruction cache
    /// for the emitted range. Must happen before the first call into the
    /// code.
    pub fn finalize(&mut self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(!self.finalized, "code buffer already finalized");

        let ret = unsafe {
            libc::mprotect(self.base as *mut libc::c_void, self.committed, libc::PROT_EXEC)
        };
        anyhow::ensure!(ret == 0, "code buffer mprotect (X) failed");

        unsafe {
            flush_icache(self.base, self.len);
        }

        debug!(bytes = self.len, "finalize code buffer");
        self.finalized = true;
        Ok(())
    }

    /// Flip a finalized buffer back to read+write for patching or appending.
    pub fn reopen(&mut self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(self.finalized, "code buffer is not finalized");

        let ret = unsafe {
            libc::mprotect(
                self.base as *mut libc::c_void,
                self.committed,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        anyhow::ensure!(ret == 0, "code buffer mprotect (RW reopen) failed");

        self.finalized = false;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Pointer to the start of the code. Only meaningful after `finalize()`.
    pub fn entry(&self) -> *const u8 {
        debug_assert!(self.finalized, "must finalize before calling entry()");
        self.base as *const u8
    }

    /// Number of bytes emitted so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Usable bytes (reservation minus the guard page).
    pub fn capacity(&self) -> usize {
        self.reserved - page_size()
    }

    /// Commit more pages if `additional` bytes would exceed the committed region.
    fn ensure_capacity(&mut self, additional: usize) -> Result<(), anyhow::Error> {
        let needed = self.len + additional;
        if needed <= self.committed {
            return Ok(());
        }

        let page_size = page_size();
        // Guard page sits at reserved - page_size.
        let max_commit = self.reserved - page_size;

        // Double committed size until it covers the need.
        let mut new_committed = self.committed;
        while new_committed < needed {
            new_committed = new_committed.saturating_mul(2);
        }
        new_committed = align_up(new_committed, page_size).min(max_commit);

        anyhow::ensure!(
            needed <= new_committed,
            "code buffer exhausted: need {needed} bytes, max {max_commit}"
        );

        let ret = unsafe {
            libc::mprotect(
                self.base.add(self.committed) as *mut libc::c_void,
                new_committed - self.committed,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        anyhow::ensure!(ret == 0, "code buffer grow mprotect failed");

        debug!(from = self.committed, to = new_committed, "grow code buffer");
        self.committed = new_committed;
        Ok(())
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.reserved);
        }
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Make freshly written code visible to instruction fetch.
///
/// ARM cores do not keep the instruction cache coherent with data writes.
/// x86 does, so there this is a no-op.
unsafe fn flush_icache(addr: *mut u8, len: usize) {
    #[cfg(target_os = "macos")]
    {
        unsafe extern "C" {
            fn sys_icache_invalidate(start: *mut libc::c_void, size: usize);
        }
        unsafe { sys_icache_invalidate(addr as *mut libc::c_void, len) };
    }

    #[cfg(all(
        not(target_os = "macos"),
        any(target_arch = "aarch64", target_arch = "arm")
    ))]
    {
        unsafe extern "C" {
            fn __clear_cache(start: *mut libc::c_void, end: *mut libc::c_void);
        }
        unsafe { __clear_cache(addr as *mut libc::c_void, addr.add(len) as *mut libc::c_void) };
    }

    #[cfg(not(any(target_os = "macos", target_arch = "aarch64", target_arch = "arm")))]
    {
        let _ = (addr, len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_finalize() {
        let mut buf = CodeBuffer::new(4096).unwrap();
        assert!(buf.is_empty());

        buf.emit_u32(0xd65f03c0).unwrap();
        assert_eq!(buf.len(), 4);

        buf.finalize().unwrap();
        assert!(!buf.entry().is_null());
        assert!(buf.emit_u32(0).is_err());
    }

    #[test]
    fn emit_and_read_back() {
        let mut buf = CodeBuffer::new(4096).unwrap();
        buf.emit_words(&[0xAABBCCDD, 0x11223344]).unwrap();
        assert_eq!(buf.read_u32(0).unwrap(), 0xAABBCCDD);
        assert_eq!(buf.read_u32(4).unwrap(), 0x11223344);
        assert!(buf.read_u32(8).is_err());
    }

    #[test]
    fn patch_instruction() {
        let mut buf = CodeBuffer::new(4096).unwrap();
        buf.emit_u32(0x00000000).unwrap();
        buf.emit_u32(0x11111111).unwrap();
        buf.patch_u32(0, 0xFFFFFFFF).unwrap();
        assert_eq!(buf.read_u32(0).unwrap(), 0xFFFFFFFF);
        assert_eq!(buf.read_u32(4).unwrap(), 0x11111111);
        assert!(buf.patch_u32(2, 0).is_err());
        assert!(buf.patch_u32(8, 0).is_err());
    }

    #[test]
    fn grows_past_initial_commit() {
        let mut buf = CodeBuffer::with_reserve(1024 * 1024, 0).unwrap();
        let words = vec![0xd503201f; INITIAL_COMMIT / 4 + 16];
        buf.emit_words(&words).unwrap();
        assert_eq!(buf.len(), words.len() * 4);
        assert_eq!(buf.read_u32(INITIAL_COMMIT).unwrap(), 0xd503201f);
    }

    #[test]
    fn exhausting_the_reservation_fails() {
        let mut buf = CodeBuffer::with_reserve(0, 0).unwrap();
        let words = vec![0u32; buf.capacity() / 4];
        buf.emit_words(&words).unwrap();
        assert!(buf.emit_u32(0).is_err());
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn execute_ret_instruction() {
        let mut buf = CodeBuffer::new(4096).unwrap();

        // mov w0, #42; ret
        buf.emit_u32(0x5280_0540).unwrap();
        buf.emit_u32(0xd65f_03c0).unwrap();
        buf.finalize().unwrap();

        let func: unsafe extern "C" fn() -> i32 = unsafe { std::mem::transmute(buf.entry()) };
        let result = unsafe { func() };
        assert_eq!(result, 42);
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn reopen_and_patch() {
        let mut buf = CodeBuffer::new(4096).unwrap();
        buf.emit_u32(0x5280_0540).unwrap(); // mov w0, #42
        buf.emit_u32(0xd65f_03c0).unwrap(); // ret
        buf.finalize().unwrap();

        buf.reopen().unwrap();
        buf.patch_u32(0, 0x5280_0580).unwrap(); // mov w0, #44
        buf.finalize().unwrap();

        let func: unsafe extern "C" fn() -> i32 = unsafe { std::mem::transmute(buf.entry()) };
        assert_eq!(unsafe { func() }, 44);
    }
}
