use libc::{c_int, mode_t};

/// Mode argument of an `open` family call
///
/// The C entry points take the permission bits as an optional variadic
/// argument that only exists when the flags request file creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    /// No mode argument; the call is forwarded in its two-argument form
    Absent,
    /// Permission bits for a newly created file
    Create(mode_t),
}

impl OpenMode {
    /// Decide from `flags` whether `mode` is a real argument
    ///
    /// `mode` is whatever the caller left in the argument slot and is
    /// discarded unless a create flag is set.
    pub fn from_flags(flags: c_int, mode: mode_t) -> Self {
        if Self::needs_mode(flags) {
            OpenMode::Create(mode)
        } else {
            OpenMode::Absent
        }
    }

    pub fn needs_mode(flags: c_int) -> bool {
        let create = flags & libc::O_CREAT != 0;
        #[cfg(target_os = "linux")]
        let create = create || flags & libc::O_TMPFILE == libc::O_TMPFILE;
        create
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    #[error("original `{name}` not found: {reason}")]
    MissingSymbol { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_flag_carries_mode() {
        assert_eq!(
            OpenMode::from_flags(libc::O_CREAT | libc::O_WRONLY, 0o640),
            OpenMode::Create(0o640)
        );
    }

    #[test]
    fn mode_is_dropped_without_create_flag() {
        // leftover register contents must not leak into the forwarded call
        assert_eq!(
            OpenMode::from_flags(libc::O_RDONLY, 0o777),
            OpenMode::Absent
        );
        assert_eq!(
            OpenMode::from_flags(libc::O_WRONLY | libc::O_TRUNC, 0xdead),
            OpenMode::Absent
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn tmpfile_needs_mode_but_directory_does_not() {
        assert!(OpenMode::needs_mode(libc::O_TMPFILE | libc::O_RDWR));
        assert!(!OpenMode::needs_mode(libc::O_DIRECTORY | libc::O_RDONLY));
    }

    #[test]
    fn missing_symbol_names_the_symbol() {
        let e = ShimError::MissingSymbol {
            name: "open64".to_string(),
            reason: "undefined symbol".to_string(),
        };
        assert_eq!(e.to_string(), "original `open64` not found: undefined symbol");
    }
}
