use std::collections::BTreeMap;
use std::io;
use std::ptr;

use tracing::debug;

use crate::error::{MemAccess, TbAbort};

/// Default guest address space size: 1 GiB.
pub const GUEST_SPACE_SIZE: usize = 1 << 30;

/// Guest-visible protection of a mapped range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prot(u8);

impl Prot {
    pub const NONE: Prot = Prot(0);
    pub const READ: Prot = Prot(1);
    pub const WRITE: Prot = Prot(2);
    pub const RW: Prot = Prot(3);

    pub const fn contains(self, other: Prot) -> bool {
        self.0 & other.0 == other.0
    }
}

/// mmap-based guest address space.
///
/// Reserves a contiguous region of host memory and maps guest addresses
/// as offsets from its base. Mapped ranges and their guest protection
/// are tracked here; an access outside them is a guest fault, not a
/// host one.
pub struct GuestSpace {
    base: *mut u8,
    size: usize,
    /// start -> (end, prot), non-overlapping.
    regions: BTreeMap<u64, (u64, Prot)>,
}

// SAFETY: GuestSpace owns its mmap'd memory exclusively.
unsafe impl Send for GuestSpace {}

impl GuestSpace {
    /// Reserve a 1 GiB guest address space.
    pub fn new() -> io::Result<Self> {
        Self::with_size(GUEST_SPACE_SIZE)
    }

    /// Reserve `size` bytes (rounded up to the page size).
    pub fn with_size(size: usize) -> io::Result<Self> {
        let size = page_align_up(size as u64) as usize;
        // SAFETY: PROT_NONE reservation, no file backing.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            base: ptr as *mut u8,
            size,
            regions: BTreeMap::new(),
        })
    }

    /// Size of the reservation in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Host base the guest addresses are offsets from.
    #[inline]
    pub fn guest_base(&self) -> *const u8 {
        self.base as *const u8
    }

    /// Map a fixed, zero-filled region within the guest space.
    pub fn mmap_fixed(
        &mut self,
        guest_addr: u64,
        size: usize,
        prot: Prot,
    ) -> io::Result<()> {
        self.check_range(guest_addr, size)?;
        // SAFETY: the range lies within our reserved region.
        let ret = unsafe {
            libc::mmap(
                self.base.add(guest_addr as usize) as *mut libc::c_void,
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED,
                -1,
                0,
            )
        };
        if ret == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        self.set_range(guest_addr, guest_addr + size as u64, Some(prot));
        debug!(addr = guest_addr, size, ?prot, "guest space: mapped");
        Ok(())
    }

    /// Change the guest protection of a mapped region.
    pub fn mprotect(
        &mut self,
        guest_addr: u64,
        size: usize,
        prot: Prot,
    ) -> io::Result<()> {
        self.check_range(guest_addr, size)?;
        let end = guest_addr + size as u64;
        if !self.covered(guest_addr, end, Prot::NONE) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "mprotect on unmapped guest range",
            ));
        }
        self.set_range(guest_addr, end, Some(prot));
        Ok(())
    }

    /// Unmap a region; later accesses to it fault.
    pub fn munmap(&mut self, guest_addr: u64, size: usize) -> io::Result<()> {
        self.check_range(guest_addr, size)?;
        // SAFETY: the range lies within our reserved region.
        let ret = unsafe {
            libc::mmap(
                self.base.add(guest_addr as usize) as *mut libc::c_void,
                size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE
                    | libc::MAP_ANONYMOUS
                    | libc::MAP_FIXED
                    | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if ret == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        self.set_range(guest_addr, guest_addr + size as u64, None);
        debug!(addr = guest_addr, size, "guest space: unmapped");
        Ok(())
    }

    /// Whether `[guest_addr, guest_addr + len)` is mapped with `prot`.
    pub fn is_mapped(&self, guest_addr: u64, len: usize, prot: Prot) -> bool {
        match guest_addr.checked_add(len as u64) {
            Some(end) => self.covered(guest_addr, end, prot),
            None => false,
        }
    }

    /// Copy guest memory into `buf`.
    pub fn read(&self, guest_addr: u64, buf: &mut [u8]) -> Result<(), TbAbort> {
        if !self.is_mapped(guest_addr, buf.len(), Prot::READ) {
            return Err(TbAbort::MemFault {
                addr: guest_addr,
                access: MemAccess::Read,
            });
        }
        // SAFETY: the range is mapped read/write on the host side.
        unsafe {
            ptr::copy_nonoverlapping(
                self.base.add(guest_addr as usize),
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        Ok(())
    }

    /// Copy `data` into guest memory.
    pub fn write(&mut self, guest_addr: u64, data: &[u8]) -> Result<(), TbAbort> {
        if !self.is_mapped(guest_addr, data.len(), Prot::WRITE) {
            return Err(TbAbort::MemFault {
                addr: guest_addr,
                access: MemAccess::Write,
            });
        }
        // SAFETY: the range is mapped read/write on the host side.
        unsafe {
            ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.base.add(guest_addr as usize),
                data.len(),
            );
        }
        Ok(())
    }

    fn check_range(&self, guest_addr: u64, size: usize) -> io::Result<()> {
        let ps = page_size() as u64;
        let end = guest_addr.checked_add(size as u64);
        if guest_addr % ps != 0 || size as u64 % ps != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "guest range is not page aligned",
            ));
        }
        match end {
            Some(end) if end <= self.size as u64 => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "guest range outside the guest space",
            )),
        }
    }

    /// Whether every byte of `[start, end)` lies in a region with `prot`.
    fn covered(&self, start: u64, end: u64, prot: Prot) -> bool {
        let mut cur = start;
        while cur < end {
            match self.regions.range(..=cur).next_back() {
                Some((_, &(r_end, r_prot))) if r_end > cur && r_prot.contains(prot) => {
                    cur = r_end;
                }
                _ => return false,
            }
        }
        true
    }

    /// Replace whatever covers `[start, end)` with `prot` (or nothing).
    fn set_range(&mut self, start: u64, end: u64, prot: Option<Prot>) {
        let overlapping: Vec<(u64, u64, Prot)> = self
            .regions
            .range(..end)
            .filter(|&(_, &(r_end, _))| r_end > start)
            .map(|(&s, &(e, p))| (s, e, p))
            .collect();
        for (s, e, p) in overlapping {
            self.regions.remove(&s);
            if s < start {
                self.regions.insert(s, (start, p));
            }
            if e > end {
                self.regions.insert(end, (e, p));
            }
        }
        if let Some(p) = prot {
            self.regions.insert(start, (end, p));
        }
    }
}

impl Drop for GuestSpace {
    fn drop(&mut self) {
        if !self.base.is_null() {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.size);
            }
        }
    }
}

pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

pub fn page_align_up(addr: u64) -> u64 {
    let ps = page_size() as u64;
    (addr + ps - 1) & !(ps - 1)
}

pub fn page_align_down(addr: u64) -> u64 {
    let ps = page_size() as u64;
    addr & !(ps - 1)
}
