// AJA NTV2 Video I/O Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Memory-mapped register backend.
//!
//! The driver node exposes the board's register BAR through `mmap`.
//! Register `n` lives at byte offset `4 * n`.
//!
//! # Platform Support
//!
//! Only Linux is supported. On other platforms [`MappedRegisters::open`]
//! returns `Ntv2Error::PlatformNotSupported`.

use crate::error::{Ntv2Error, Ntv2Result};
use crate::register::RegisterIo;
use std::path::Path;

#[cfg(target_os = "linux")]
use crate::regs::{MAX_REGISTER, REGISTER_WINDOW_BYTES};
#[cfg(target_os = "linux")]
use std::fs::File;
#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;

// ============================================================================
// Linux Implementation
// ============================================================================

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;

    /// Handle to a mapped register window.
    pub struct MappedRegisters {
        /// Device node; keeps the mapping's file open.
        #[allow(dead_code)]
        file: File,
        /// Base of the register window.
        base: *mut u32,
        /// Mapping size in bytes.
        len: usize,
    }

    // SAFETY: the mapping is owned by this handle and valid until drop.
    // Register accesses are single aligned 32-bit volatile operations.
    unsafe impl Send for MappedRegisters {}

    // SAFETY: concurrent register accesses are individually atomic on PCIe;
    // read-modify-write sequences are not, which callers must serialize.
    unsafe impl Sync for MappedRegisters {}

    impl MappedRegisters {
        /// Open and map a driver node (e.g., `/dev/ajantv2_0`).
        ///
        /// # Errors
        ///
        /// Returns an error if:
        /// - The node cannot be opened (permissions, not found)
        /// - Memory mapping fails
        pub fn open(path: &Path) -> Ntv2Result<Self> {
            let file = File::options()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        Ntv2Error::PermissionDenied(path.display().to_string())
                    } else {
                        Ntv2Error::Io(e)
                    }
                })?;

            let base = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    REGISTER_WINDOW_BYTES,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    file.as_raw_fd(),
                    0,
                )
            };

            if base == libc::MAP_FAILED {
                return Err(Ntv2Error::MmapFailed(format!(
                    "mmap failed for {}: {}",
                    path.display(),
                    std::io::Error::last_os_error()
                )));
            }

            log::info!("Mapped NTV2 registers from {}", path.display());
            Ok(Self {
                file,
                base: base as *mut u32,
                len: REGISTER_WINDOW_BYTES,
            })
        }
    }

    impl RegisterIo for MappedRegisters {
        fn read_register(&self, reg: u32) -> Ntv2Result<u32> {
            self.check_register(reg)?;
            // SAFETY: reg is within the mapped window (checked above).
            Ok(unsafe { std::ptr::read_volatile(self.base.add(reg as usize)) })
        }

        fn write_register(&self, reg: u32, value: u32) -> Ntv2Result<()> {
            self.check_register(reg)?;
            // SAFETY: reg is within the mapped window (checked above).
            unsafe { std::ptr::write_volatile(self.base.add(reg as usize), value) };
            Ok(())
        }

        fn max_register(&self) -> u32 {
            MAX_REGISTER
        }
    }

    impl Drop for MappedRegisters {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.len);
            }
        }
    }
}

// ============================================================================
// Unsupported Platform Stub
// ============================================================================

#[cfg(not(target_os = "linux"))]
mod stub_impl {
    use super::*;

    /// Stub register window for non-Linux platforms.
    ///
    /// All operations return `Ntv2Error::PlatformNotSupported`.
    pub struct MappedRegisters {
        _private: (),
    }

    impl MappedRegisters {
        pub fn open(_path: &Path) -> Ntv2Result<Self> {
            Err(Ntv2Error::PlatformNotSupported)
        }
    }

    impl RegisterIo for MappedRegisters {
        fn read_register(&self, _reg: u32) -> Ntv2Result<u32> {
            Err(Ntv2Error::PlatformNotSupported)
        }

        fn write_register(&self, _reg: u32, _value: u32) -> Ntv2Result<()> {
            Err(Ntv2Error::PlatformNotSupported)
        }

        fn max_register(&self) -> u32 {
            0
        }
    }
}

// Re-export the appropriate implementation
#[cfg(target_os = "linux")]
pub use linux_impl::MappedRegisters;

#[cfg(not(target_os = "linux"))]
pub use stub_impl::MappedRegisters;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_open_missing_node_fails() {
        let result = MappedRegisters::open(&PathBuf::from("/nonexistent/ajantv2_9"));
        assert!(result.is_err());
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn test_stub_returns_platform_not_supported() {
        let result = MappedRegisters::open(&PathBuf::from("/dev/ajantv2_0"));
        assert!(matches!(result, Err(Ntv2Error::PlatformNotSupported)));
    }
}
