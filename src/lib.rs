//! Redirect a fixed system path prefix into the user's home directory
//!
//! Built as a `cdylib`, this crate is an `LD_PRELOAD` shim: `open`, `stat`,
//! `realpath` and friends see `/opt/sslvpnclient/...` rewritten to
//! `$HOME/opt/sslvpnclient/...` before the real libc function runs.

pub mod config;
mod original;
#[cfg(target_os = "linux")]
pub mod redirect;
pub mod remap;
pub mod types;

use libc::c_char;
use remap::{PathSlot, Remapper};
use std::ffi::CStr;
use tracing_subscriber::{EnvFilter, prelude::*};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Version of the loaded shim, for launchers to check compatibility
#[unsafe(no_mangle)]
pub extern "C" fn homeshift_version() -> *const c_char {
    VERSION.as_ptr().cast()
}

/// Copy the compiled prefix into `out`
///
/// Writes at most `cap - 1` bytes and a terminating NUL, and returns the
/// number of bytes written before it. Returns 0 if `out` is null or `cap` is 0.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn homeshift_prefix(out: *mut c_char, cap: usize) -> usize {
    unsafe { write_c(config::PREFIX.as_bytes(), out, cap) }
}

/// Redirect `path` under the current `HOME` into `out`
///
/// Same output contract as [`homeshift_prefix`]. Unmatched paths are copied
/// unchanged. Returns 0 without writing if `path` is null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn homeshift_remap(path: *const c_char, out: *mut c_char, cap: usize) -> usize {
    if path.is_null() {
        return 0;
    }
    let path = unsafe { CStr::from_ptr(path) };
    let mut slot = PathSlot::new();
    match Remapper::from_env().remap(Some(path), &mut slot) {
        Some(target) => unsafe { write_c(target.to_bytes(), out, cap) },
        None => 0,
    }
}

unsafe fn write_c(src: &[u8], out: *mut c_char, cap: usize) -> usize {
    if out.is_null() || cap == 0 {
        return 0;
    }
    let len = src.len().min(cap - 1);
    unsafe {
        std::ptr::copy_nonoverlapping(src.as_ptr(), out.cast::<u8>(), len);
        out.add(len).write(0);
    }
    len
}

/// Install a stderr subscriber when `HOMESHIFT_LOG` is set
///
/// The host process stays silent otherwise.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn init_tracing() {
    if std::env::var_os(config::LOG_VAR).is_none() {
        return;
    }
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_filter(
            EnvFilter::builder()
                .with_env_var(config::LOG_VAR)
                .from_env_lossy(),
        );
    // the host may already own a global subscriber
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_a_c_string() {
        let v = unsafe { CStr::from_ptr(homeshift_version()) };
        assert_eq!(v.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn prefix_export_fills_and_truncates() {
        let mut buf = [0 as c_char; 64];
        let n = unsafe { homeshift_prefix(buf.as_mut_ptr(), buf.len()) };
        assert_eq!(n, config::PREFIX.len());
        let got = unsafe { CStr::from_ptr(buf.as_ptr()) };
        assert_eq!(got.to_bytes(), config::PREFIX.as_bytes());

        let mut small = [0x7f as c_char; 4];
        assert_eq!(unsafe { homeshift_prefix(small.as_mut_ptr(), small.len()) }, 3);
        let got = unsafe { CStr::from_ptr(small.as_ptr()) };
        assert_eq!(got.to_bytes(), &config::PREFIX.as_bytes()[..3]);

        assert_eq!(unsafe { homeshift_prefix(std::ptr::null_mut(), 16) }, 0);
        assert_eq!(unsafe { homeshift_prefix(small.as_mut_ptr(), 0) }, 0);
    }

    #[test]
    fn remap_export_copies_unmatched_paths() {
        let mut buf = [0 as c_char; 64];
        let n = unsafe { homeshift_remap(c"/etc/passwd".as_ptr(), buf.as_mut_ptr(), buf.len()) };
        assert_eq!(n, 11);
        assert_eq!(unsafe { CStr::from_ptr(buf.as_ptr()) }, c"/etc/passwd");
        assert_eq!(unsafe { homeshift_remap(std::ptr::null(), buf.as_mut_ptr(), buf.len()) }, 0);
    }
}
