use std::borrow::Cow;
use std::ffi::CStr;

/// Path subtree redirected into the user's home directory
///
/// Fixed when the library is built. Set `HOMESHIFT_PREFIX` at build time to
/// produce a shim for another subtree.
pub const PREFIX: &str = match option_env!("HOMESHIFT_PREFIX") {
    Some(prefix) => prefix,
    None => "/opt/sslvpnclient",
};

const _: () = assert!(!PREFIX.is_empty(), "HOMESHIFT_PREFIX must not be empty");

/// Environment variable holding the home directory
pub const HOME_VAR: &CStr = c"HOME";

/// Environment variable holding the shim's tracing directives
pub const LOG_VAR: &str = "HOMESHIFT_LOG";

/// Capacity of a remapped path, terminator included
pub const MAX_PATH_LEN: usize = libc::PATH_MAX as usize;

/// Source of the home directory prepended to redirected paths
///
/// `None` means the home directory is unknown, which redirects into the
/// empty string.
pub trait HomeDir {
    fn home(&self) -> Option<Cow<'_, [u8]>>;
}

/// Reads the home directory from the process environment on every call
///
/// The value is borrowed from `environ` without copying; it stays valid until
/// the host changes `HOME`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvHome;

impl HomeDir for EnvHome {
    fn home(&self) -> Option<Cow<'_, [u8]>> {
        let value = unsafe { libc::getenv(HOME_VAR.as_ptr()) };
        if value.is_null() {
            return None;
        }
        Some(Cow::Borrowed(unsafe { CStr::from_ptr(value) }.to_bytes()))
    }
}

/// Fixed home directory, independent of the process environment
#[derive(Clone, Debug, Default)]
pub struct FixedHome(Option<Vec<u8>>);

impl FixedHome {
    pub fn new(home: impl Into<Vec<u8>>) -> Self {
        Self(Some(home.into()))
    }
    pub fn unset() -> Self {
        Self(None)
    }
}

impl HomeDir for FixedHome {
    fn home(&self) -> Option<Cow<'_, [u8]>> {
        self.0.as_deref().map(Cow::Borrowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_absolute() {
        assert!(PREFIX.starts_with('/'));
    }

    #[test]
    fn fixed_home_reports_injected_value() {
        let home = FixedHome::new("/home/alice");
        assert_eq!(home.home().as_deref(), Some(&b"/home/alice"[..]));
        assert_eq!(FixedHome::unset().home(), None);
    }

    #[test]
    fn env_home_follows_environment() {
        use std::os::unix::ffi::OsStringExt;
        let expected = std::env::var_os(HOME_VAR.to_str().unwrap()).map(|v| v.into_vec());
        assert_eq!(EnvHome.home().map(Cow::into_owned), expected);
    }

    #[test]
    fn env_home_borrows_environment() {
        if std::env::var_os("HOME").is_some() {
            assert!(matches!(EnvHome.home(), Some(Cow::Borrowed(_))));
        }
    }
}
