//! Path redirect functions for LD_PRELOAD
//!
//! # Safety
//!
//! All functions in this module are FFI wrappers that intercept libc calls.
//! They require the same safety guarantees as the original libc functions:
//! - Pointers must be valid and point to properly initialized memory
//! - String pointers must be null-terminated C strings
//! - Output buffers must be as large as the original function expects
#![allow(clippy::missing_safety_doc)]
#![allow(unsafe_op_in_unsafe_fn)]

use crate::config::EnvHome;
use crate::original::Original;
use crate::remap::{PathSlot, Remapper};
use crate::types::OpenMode;
use ctor::ctor;
use libc::{FILE, c_char, c_int, mode_t};
use std::cell::Cell;
use std::ffi::CStr;

// Thread-local recursion guard to prevent infinite recursion in hooks
thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// RAII guard for recursion protection
struct RecursionGuard;

impl RecursionGuard {
    /// Try to enter hook. Returns Some(guard) if not already in hook, None otherwise.
    fn try_enter() -> Option<Self> {
        IN_HOOK.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(RecursionGuard)
            }
        })
    }
}

impl Drop for RecursionGuard {
    fn drop(&mut self) {
        IN_HOOK.with(|flag| flag.set(false));
    }
}

static REMAPPER: Remapper<'static, EnvHome> = Remapper::from_env();

/// Path to hand to the original function
///
/// Returns `path` itself unless it was redirected into `slot`.
unsafe fn redirect_path(path: *const c_char, slot: &mut PathSlot) -> *const c_char {
    if path.is_null() {
        return path;
    }
    let _guard = match RecursionGuard::try_enter() {
        Some(g) => g,
        None => return path,
    };

    let original = CStr::from_ptr(path);
    match REMAPPER.remap(Some(original), slot) {
        Some(redirected) if redirected.as_ptr() != path => {
            tracing::debug!(from = ?original, to = ?redirected, "redirect");
            redirected.as_ptr()
        }
        _ => path,
    }
}

// Type aliases for function pointers
type OpenFn = unsafe extern "C" fn(*const c_char, c_int, ...) -> c_int;
type OpenatFn = unsafe extern "C" fn(c_int, *const c_char, c_int, ...) -> c_int;
type FopenFn = unsafe extern "C" fn(*const c_char, *const c_char) -> *mut FILE;
type AccessFn = unsafe extern "C" fn(*const c_char, c_int) -> c_int;
type StatFn = unsafe extern "C" fn(*const c_char, *mut libc::stat) -> c_int;
type XstatFn = unsafe extern "C" fn(c_int, *const c_char, *mut libc::stat) -> c_int;
type RealpathFn = unsafe extern "C" fn(*const c_char, *mut c_char) -> *mut c_char;

/// Original function handles, resolved at load time or on first use
#[allow(non_snake_case)]
struct OriginalFunctions {
    open: Original<OpenFn>,
    open64: Original<OpenFn>,
    openat: Original<OpenatFn>,
    fopen: Original<FopenFn>,
    fopen64: Original<FopenFn>,
    access: Original<AccessFn>,
    stat: Original<StatFn>,
    lstat: Original<StatFn>,
    __xstat: Original<XstatFn>,
    __lxstat: Original<XstatFn>,
    realpath: Original<RealpathFn>,
}

static ORIGINAL: OriginalFunctions = OriginalFunctions {
    open: Original::new(c"open"),
    open64: Original::new(c"open64"),
    openat: Original::new(c"openat"),
    fopen: Original::new(c"fopen"),
    fopen64: Original::new(c"fopen64"),
    access: Original::new(c"access"),
    stat: Original::new(c"stat"),
    lstat: Original::new(c"lstat"),
    __xstat: Original::new(c"__xstat"),
    __lxstat: Original::new(c"__lxstat"),
    realpath: Original::new(c"realpath"),
};

impl OriginalFunctions {
    fn preload(&self) {
        let results = [
            self.open.preload(),
            self.open64.preload(),
            self.openat.preload(),
            self.fopen.preload(),
            self.fopen64.preload(),
            self.access.preload(),
            self.stat.preload(),
            self.lstat.preload(),
            self.__xstat.preload(),
            self.__lxstat.preload(),
            self.realpath.preload(),
        ];
        // legacy entry points may be absent; only calling one is fatal
        for e in results.into_iter().filter_map(Result::err) {
            tracing::debug!("{e}");
        }
    }
}

/// Library constructor - resolves original function pointers before main
#[ctor]
unsafe fn init() {
    crate::init_tracing();
    ORIGINAL.preload();
    tracing::debug!(prefix = crate::config::PREFIX, "homeshift loaded");
}

//
// File open functions
//

/// `mode` is only meaningful when `flags` requests creation
#[unsafe(no_mangle)]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    let f = ORIGINAL.open.get();
    let mut slot = PathSlot::new();
    let actual = redirect_path(path, &mut slot);
    match OpenMode::from_flags(flags, mode) {
        OpenMode::Absent => f(actual, flags),
        OpenMode::Create(mode) => f(actual, flags, mode),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    let f = ORIGINAL.open64.get();
    let mut slot = PathSlot::new();
    let actual = redirect_path(path, &mut slot);
    match OpenMode::from_flags(flags, mode) {
        OpenMode::Absent => f(actual, flags),
        OpenMode::Create(mode) => f(actual, flags, mode),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn openat(
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: mode_t,
) -> c_int {
    let f = ORIGINAL.openat.get();
    let mut slot = PathSlot::new();
    let actual = redirect_path(path, &mut slot);
    match OpenMode::from_flags(flags, mode) {
        OpenMode::Absent => f(dirfd, actual, flags),
        OpenMode::Create(mode) => f(dirfd, actual, flags, mode),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fopen(path: *const c_char, mode: *const c_char) -> *mut FILE {
    let f = ORIGINAL.fopen.get();
    let mut slot = PathSlot::new();
    f(redirect_path(path, &mut slot), mode)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fopen64(path: *const c_char, mode: *const c_char) -> *mut FILE {
    let f = ORIGINAL.fopen64.get();
    let mut slot = PathSlot::new();
    f(redirect_path(path, &mut slot), mode)
}

//
// Access and stat functions
//

#[unsafe(no_mangle)]
pub unsafe extern "C" fn access(path: *const c_char, mode: c_int) -> c_int {
    let f = ORIGINAL.access.get();
    let mut slot = PathSlot::new();
    f(redirect_path(path, &mut slot), mode)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    let f = ORIGINAL.stat.get();
    let mut slot = PathSlot::new();
    f(redirect_path(path, &mut slot), buf)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn lstat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    let f = ORIGINAL.lstat.get();
    let mut slot = PathSlot::new();
    f(redirect_path(path, &mut slot), buf)
}

// glibc before 2.33 routes stat/lstat through these versioned symbols
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __xstat(ver: c_int, path: *const c_char, buf: *mut libc::stat) -> c_int {
    let f = ORIGINAL.__xstat.get();
    let mut slot = PathSlot::new();
    f(ver, redirect_path(path, &mut slot), buf)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __lxstat(ver: c_int, path: *const c_char, buf: *mut libc::stat) -> c_int {
    let f = ORIGINAL.__lxstat.get();
    let mut slot = PathSlot::new();
    f(ver, redirect_path(path, &mut slot), buf)
}

//
// Path resolution
//

#[unsafe(no_mangle)]
pub unsafe extern "C" fn realpath(path: *const c_char, resolved: *mut c_char) -> *mut c_char {
    let f = ORIGINAL.realpath.get();
    let mut slot = PathSlot::new();
    f(redirect_path(path, &mut slot), resolved)
}
