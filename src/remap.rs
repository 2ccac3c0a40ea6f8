//! Prefix remapping of C paths
//!
//! A path starting with the configured prefix is redirected to the home
//! directory followed by the whole original path, so `/opt/sslvpnclient/a`
//! with home `/home/alice` becomes `/home/alice/opt/sslvpnclient/a`. The
//! prefix is kept in the result.

use crate::config::{EnvHome, HomeDir, MAX_PATH_LEN, PREFIX};
use std::ffi::CStr;
use std::mem::MaybeUninit;
use std::{ptr, slice};

/// Stack storage for one remapped path
///
/// Holds at most `MAX_PATH_LEN - 1` bytes plus the terminator. Longer
/// results are cut silently, the way `snprintf` would. The buffer is left
/// uninitialized until a path is written into it.
pub struct PathSlot {
    buf: [MaybeUninit<u8>; MAX_PATH_LEN],
}

impl PathSlot {
    pub const fn new() -> Self {
        Self {
            buf: [const { MaybeUninit::uninit() }; MAX_PATH_LEN],
        }
    }

    /// Write `head` then `tail` and terminate
    ///
    /// `head` ends at its first NUL byte, if any.
    fn join(&mut self, head: &[u8], tail: &[u8]) -> &CStr {
        let head = head.split(|&b| b == 0).next().unwrap_or_default();
        let cap = self.buf.len() - 1;
        let head_len = head.len().min(cap);
        let tail_len = tail.len().min(cap - head_len);
        let end = head_len + tail_len;
        let dst = self.buf.as_mut_ptr().cast::<u8>();
        unsafe {
            ptr::copy_nonoverlapping(head.as_ptr(), dst, head_len);
            ptr::copy_nonoverlapping(tail.as_ptr(), dst.add(head_len), tail_len);
            dst.add(end).write(0);
            // bytes up to `end` are initialized and hold no NUL before it
            CStr::from_bytes_with_nul_unchecked(slice::from_raw_parts(dst, end + 1))
        }
    }
}

impl Default for PathSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefix redirect rule bound to a home directory source
#[derive(Clone, Debug)]
pub struct Remapper<'p, H> {
    prefix: &'p [u8],
    home: H,
}

impl Remapper<'static, EnvHome> {
    /// The rule compiled into this build, reading `HOME` per call
    pub const fn from_env() -> Self {
        Self {
            prefix: PREFIX.as_bytes(),
            home: EnvHome,
        }
    }
}

impl<'p, H: HomeDir> Remapper<'p, H> {
    pub fn new(prefix: &'p [u8], home: H) -> Self {
        Self { prefix, home }
    }

    pub fn prefix(&self) -> &'p [u8] {
        self.prefix
    }

    /// Byte-wise, case-sensitive leading comparison; no normalization
    pub fn matches(&self, path: &CStr) -> bool {
        path.to_bytes().starts_with(self.prefix)
    }

    /// Remap `path`, writing a redirected result into `slot`
    ///
    /// `None` stands for a null path and is returned as is. Paths outside the
    /// prefix come back unchanged and borrowed from the input.
    pub fn remap<'a>(&self, path: Option<&'a CStr>, slot: &'a mut PathSlot) -> Option<&'a CStr> {
        let path = path?;
        if !self.matches(path) {
            return Some(path);
        }
        let home = self.home.home();
        Some(slot.join(home.as_deref().unwrap_or_default(), path.to_bytes()))
    }
}
