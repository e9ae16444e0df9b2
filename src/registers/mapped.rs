use std::{
    fs::OpenOptions,
    num::NonZeroUsize,
    os::unix::fs::OpenOptionsExt,
    path::Path,
    ptr::NonNull,
    sync::atomic::{AtomicBool, Ordering},
};

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use super::{layout, RegisterIo};
use crate::errors::{Error, Result};

const BLOCK_LEN: NonZeroUsize = match NonZeroUsize::new(layout::BLOCK_SIZE) {
    Some(len) => len,
    None => unreachable!(),
};

/// Set while a device mapping is live anywhere in the process.
static DEVICE_OPEN: AtomicBool = AtomicBool::new(false);

/// The GPIO register page mapped from a memory device such as
/// `/dev/gpiomem`.
///
/// Only one mapping may be open per process. The memory stays mapped until
/// the value is dropped, even after [`release`](RegisterIo::release) has
/// allowed a new mapping to be opened.
#[derive(Debug)]
pub struct MappedRegisters {
    base: NonNull<u32>,
    released: AtomicBool,
}

// The mapping is plain device memory accessed with volatile single-word
// operations only.
unsafe impl Send for MappedRegisters {}
unsafe impl Sync for MappedRegisters {}

impl MappedRegisters {
    /// Map [`BLOCK_SIZE`](layout::BLOCK_SIZE) bytes of `path` starting at
    /// `offset`.
    ///
    /// `/dev/gpiomem` exposes the GPIO page at offset 0 and does not need
    /// root. `/dev/mem` needs the physical address of the peripheral.
    pub fn open(path: &Path, offset: libc::off_t) -> Result<Self> {
        if DEVICE_OPEN
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyOpen);
        }

        match Self::map(path, offset) {
            Ok(base) => {
                log::debug!("mapped gpio registers from {}", path.display());
                Ok(Self {
                    base,
                    released: AtomicBool::new(false),
                })
            }
            Err(source) => {
                DEVICE_OPEN.store(false, Ordering::Release);
                Err(Error::Map {
                    path: path.to_owned(),
                    source,
                })
            }
        }
    }

    fn map(path: &Path, offset: libc::off_t) -> std::io::Result<NonNull<u32>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC | libc::O_CLOEXEC)
            .open(path)?;

        // The mapping outlives the file descriptor, which is closed on return.
        let base = unsafe {
            mmap(
                None,
                BLOCK_LEN,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                offset,
            )?
        };
        Ok(base.cast())
    }

    #[inline(always)]
    fn word(&self, index: usize) -> *mut u32 {
        assert!(index < layout::BLOCK_WORDS, "register index {index} out of range");
        unsafe { self.base.as_ptr().add(index) }
    }
}

impl RegisterIo for MappedRegisters {
    #[inline]
    fn read(&self, index: usize) -> u32 {
        unsafe { std::ptr::read_volatile(self.word(index)) }
    }

    #[inline]
    fn write(&self, index: usize, value: u32) {
        unsafe { std::ptr::write_volatile(self.word(index), value) }
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            DEVICE_OPEN.store(false, Ordering::Release);
        }
    }
}

impl Drop for MappedRegisters {
    fn drop(&mut self) {
        self.release();
        if let Err(e) = unsafe { munmap(self.base.cast(), layout::BLOCK_SIZE) } {
            log::warn!("failed to unmap gpio registers: {e}");
        }
    }
}
