//! Handles to the libc implementations the hooks shadow
//!
//! Each handle is resolved with `dlsym(RTLD_NEXT, ..)` and stored once in a
//! `OnceLock`. Racing first uses may both look the symbol up, but only one
//! pointer is kept and every reader sees an initialized value.

use crate::types::ShimError;
use libc::{c_char, c_void};
use std::ffi::CStr;
use std::sync::OnceLock;

pub struct Original<F> {
    name: &'static CStr,
    slot: OnceLock<F>,
}

impl<F: Copy> Original<F> {
    /// `F` must be an `extern "C"` function pointer type matching `name`
    pub const fn new(name: &'static CStr) -> Self {
        Self {
            name,
            slot: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &'static CStr {
        self.name
    }

    fn lookup(&self) -> Result<F, ShimError> {
        const { assert!(size_of::<F>() == size_of::<*mut c_void>()) };
        let mut ptr = unsafe {
            libc::dlerror();
            libc::dlsym(libc::RTLD_NEXT, self.name.as_ptr())
        };
        #[cfg(all(target_os = "linux", target_env = "gnu"))]
        if ptr.is_null() {
            ptr = compat_lookup(self.name);
        }
        if ptr.is_null() {
            return Err(ShimError::MissingSymbol {
                name: self.name.to_string_lossy().into_owned(),
                reason: last_dl_error(),
            });
        }
        Ok(unsafe { std::mem::transmute_copy::<*mut c_void, F>(&ptr) })
    }

    /// Resolve ahead of the first call
    pub fn preload(&self) -> Result<(), ShimError> {
        if self.slot.get().is_none() {
            let f = self.lookup()?;
            let _ = self.slot.set(f);
        }
        Ok(())
    }

    /// The original implementation; aborts the process if it cannot be found
    pub fn get(&self) -> F {
        if let Some(f) = self.slot.get() {
            return *f;
        }
        match self.lookup() {
            Ok(f) => *self.slot.get_or_init(|| f),
            Err(e) => fatal(e),
        }
    }
}

/// Base symbol versions of the glibc ports that shipped `__xstat` and friends
#[cfg(all(target_os = "linux", target_env = "gnu"))]
const COMPAT_VERSIONS: &[&CStr] = &[c"GLIBC_2.2.5", c"GLIBC_2.17", c"GLIBC_2.27", c"GLIBC_2.0"];

/// Symbols kept only for old binaries carry a hidden version that plain
/// `dlsym` skips; ask for them by version.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn compat_lookup(name: &CStr) -> *mut c_void {
    COMPAT_VERSIONS
        .iter()
        .map(|v| unsafe { libc::dlvsym(libc::RTLD_NEXT, name.as_ptr(), v.as_ptr()) })
        .find(|p| !p.is_null())
        .unwrap_or(std::ptr::null_mut())
}

fn last_dl_error() -> String {
    let msg: *const c_char = unsafe { libc::dlerror() };
    if msg.is_null() {
        "no definition after this object".to_string()
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

/// Calling through a missing original would jump to null; stop instead
///
/// Printed directly: the host may not have a subscriber installed.
#[cold]
fn fatal(err: ShimError) -> ! {
    eprintln!("{}", diagnostic(&err));
    std::process::abort()
}

fn diagnostic(err: &ShimError) -> String {
    format!("homeshift: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use libc::c_int;

    type GetpidFn = unsafe extern "C" fn() -> c_int;
    type StrlenFn = unsafe extern "C" fn(*const c_char) -> usize;

    #[test]
    fn resolves_next_definition() {
        let original: Original<GetpidFn> = Original::new(c"getpid");
        assert!(original.preload().is_ok());
        let pid = unsafe { original.get()() };
        assert_eq!(pid as u32, std::process::id());
    }

    #[test]
    fn resolved_handle_is_cached() {
        let original: Original<StrlenFn> = Original::new(c"strlen");
        let first = original.get();
        let second = original.get();
        assert_eq!(first as usize, second as usize);
        assert_eq!(unsafe { first(c"redirect".as_ptr()) }, 8);
    }

    #[test]
    fn missing_symbol_is_reported() {
        let original: Original<GetpidFn> = Original::new(c"homeshift_no_such_symbol");
        match original.preload() {
            Err(ShimError::MissingSymbol { name, .. }) => {
                assert_eq!(name, "homeshift_no_such_symbol")
            }
            Ok(()) => panic!("symbol unexpectedly resolved"),
        }
        assert_eq!(original.name(), c"homeshift_no_such_symbol");
    }

    #[test]
    fn fatal_diagnostic_is_one_line() {
        let err = ShimError::MissingSymbol {
            name: "open".into(),
            reason: "gone".into(),
        };
        assert_eq!(diagnostic(&err), "homeshift: original `open` not found: gone");
    }

    #[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
    #[test]
    fn versioned_stat_is_found_on_any_glibc() {
        type XstatFn = unsafe extern "C" fn(c_int, *const c_char, *mut libc::stat) -> c_int;
        let original: Original<XstatFn> = Original::new(c"__xstat");
        assert!(original.preload().is_ok());
    }
}
