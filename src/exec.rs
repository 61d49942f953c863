//! A minimal executable-memory loader.
//!
//! Not part of THE CORE — the specification treats "the runtime loader
//! that allocates executable memory, copies the emitted bytes, and invokes
//! the resulting procedure" as an external collaborator. This module is
//! the thinnest implementation of that collaborator needed to exercise a
//! [`crate::subroutine::Subroutine`] end-to-end in this crate's own test
//! suite: one anonymous `mmap`, one `memcpy`-equivalent copy, one
//! function-pointer cast. No caching, no relocation, no linking of
//! multiple procedures.
//!
//! Grounded in `original_source/regexjit.cc` and
//! `original_source/example/runner.cc`, which allocate an anonymous
//! `PROT_EXEC|PROT_READ|PROT_WRITE` mapping, `memcpy` the emitted bytes
//! into it, and call through a function-pointer cast of the same shape.

use std::error::Error;
use std::ffi::CStr;
use std::fmt;
use std::os::raw::c_void;

use crate::subroutine::Subroutine;

/// Failure to allocate or protect the executable mapping.
#[derive(Debug)]
pub struct ExecError {
    what: &'static str,
    errno: i32,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed (errno {})", self.what, self.errno)
    }
}

impl Error for ExecError {}

/// Signature of the emitted procedure: System V AMD64, `const char*` in,
/// `uint8_t` out.
type EntryPoint = unsafe extern "C" fn(*const std::os::raw::c_char) -> u8;

/// An anonymous executable mapping holding one finalized [`Subroutine`]'s
/// bytes, with a safe call wrapper.
#[derive(Debug)]
pub struct CompiledMatcher {
    base: *mut c_void,
    len: usize,
}

// The mapping is read+exec only after construction; nothing mutates it
// for the lifetime of the `CompiledMatcher`, so sharing it across threads
// is sound as long as callers don't race the `munmap` in `Drop`.
unsafe impl Send for CompiledMatcher {}
unsafe impl Sync for CompiledMatcher {}

impl CompiledMatcher {
    /// Maps `subroutine`'s emitted bytes into an executable page.
    ///
    /// # Panics
    /// `subroutine` must already be finalized (`Subroutine::finalize`
    /// called); this is enforced by `Subroutine::write_code` itself.
    pub fn new(subroutine: &Subroutine) -> Result<Self, ExecError> {
        let code = subroutine.write_code();
        let len = code.len().max(1);

        // SAFETY: standard anonymous-mapping FFI call; arguments are
        // constants or locally owned values, and the result is checked
        // against MAP_FAILED before use.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ExecError {
                what: "mmap",
                errno: unsafe { *libc::__errno_location() },
            });
        }

        // SAFETY: `base` is a freshly mapped, writable region of at least
        // `code.len()` bytes; `code` is a disjoint, live `Vec<u8>`.
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), base as *mut u8, code.len());
        }

        // SAFETY: `base`/`len` describe the mapping created above.
        let protect = unsafe { libc::mprotect(base, len, libc::PROT_READ | libc::PROT_EXEC) };
        if protect != 0 {
            let errno = unsafe { *libc::__errno_location() };
            unsafe {
                libc::munmap(base, len);
            }
            return Err(ExecError {
                what: "mprotect",
                errno,
            });
        }

        Ok(CompiledMatcher { base, len })
    }

    /// Invokes the compiled procedure on a null-terminated `input`.
    pub fn is_match(&self, input: &CStr) -> bool {
        // SAFETY: `base` holds a finalized procedure matching `EntryPoint`'s
        // ABI (System V, one `const char*` argument, `uint8_t` return),
        // made executable in `new`. `input` is a valid, live `CStr`.
        let entry: EntryPoint = unsafe { std::mem::transmute(self.base) };
        let result = unsafe { entry(input.as_ptr()) };
        result != 0
    }
}

impl Drop for CompiledMatcher {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` were produced by a matching `mmap` in `new`
        // and are not otherwise in use once this value is dropped.
        unsafe {
            libc::munmap(self.base, self.len);
        }
    }
}
