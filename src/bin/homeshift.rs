use anyhow::Context as _;
use clap::{Parser, Subcommand};
use libloading::{Library, Symbol};
use nix::unistd;
use std::env;
use std::ffi::{CStr, CString, OsStr, OsString, c_char};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::exit;
use tracing_subscriber::{
    Layer,
    filter::{EnvFilter, LevelFilter},
    prelude::*,
};

const DYLIB_PATH: &str = env!("DYLIB_PATH");
const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const PRELOAD_VAR: &str = "LD_PRELOAD";

#[cfg(target_os = "linux")]
const CDYLIB_EXT: &str = "so";
#[cfg(target_os = "macos")]
const CDYLIB_EXT: &str = "dylib";

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Shim library to load, instead of searching next to this binary
    #[arg(long, global = true)]
    library: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command with the redirect library preloaded
    Run {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<OsString>,
    },
    /// Show where paths are redirected under the current environment
    Remap {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print the prefix compiled into the shim
    Prefix,
}

fn main() {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        );
    let _ = tracing_subscriber::registry().with(layer).try_init();

    let cli = Cli::parse();
    if let Err(e) = dispatch(cli) {
        tracing::error!("{e:?}");
        exit(1);
    }
}

fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let exe_dir = env::current_exe()
        .context("failed to get executable path")?
        .parent()
        .map(Path::to_path_buf);
    let lib = locate_library(cli.library, exe_dir.as_deref())?;
    tracing::debug!("library path: {}", lib.path.display());
    match cli.command {
        Commands::Run { command } => run(&lib.path, &command),
        Commands::Remap { paths } => remap(&lib, &paths),
        Commands::Prefix => {
            println!("{}", Path::new(OsStr::from_bytes(&lib.prefix()?)).display());
            Ok(())
        }
    }
}

/// Load the shim named on the command line, or the first usable one found
fn locate_library(explicit: Option<PathBuf>, exe_dir: Option<&Path>) -> anyhow::Result<DyLib> {
    if let Some(path) = explicit {
        return DyLib::load_checked(&path)
            .with_context(|| format!("cannot use library {}", path.display()));
    }
    library_candidates(exe_dir)
        .into_iter()
        .find_map(|p| match DyLib::load_checked(&p) {
            Ok(lib) => Some(lib),
            Err(e) => {
                tracing::debug!("{}: {e:?}", p.display());
                None
            }
        })
        .context("no usable redirect library found; pass --library")
}

/// Preload the shim and replace this process with `command`
fn run(library: &Path, command: &[OsString]) -> anyhow::Result<()> {
    let library = library
        .canonicalize()
        .context("failed to resolve library path")?;
    let preload = preload_value(library.as_os_str(), env::var_os(PRELOAD_VAR));
    // single threaded until exec
    unsafe { env::set_var(PRELOAD_VAR, &preload) };

    let args = command
        .iter()
        .map(|v| CString::new(v.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to get C string")?;
    let program = args.first().context("no command!")?;
    tracing::info!("exec {program:?} with {PRELOAD_VAR}={}", Path::new(&preload).display());
    unistd::execvp(program, &args).context("failed to start command")?;
    unreachable!();
}

/// Print the redirect target of each path
fn remap(lib: &DyLib, paths: &[PathBuf]) -> anyhow::Result<()> {
    for path in paths {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .with_context(|| format!("path contains NUL: {}", path.display()))?;
        let target = lib.remap(&c_path)?;
        println!("{}", Path::new(OsStr::from_bytes(&target)).display());
    }
    Ok(())
}

/// Places to look for the shim, most specific first
fn library_candidates(exe_dir: Option<&Path>) -> Vec<PathBuf> {
    let file_name = format!("lib{}.{CDYLIB_EXT}", PKG_NAME.replace('-', "_"));
    let mut candidates: Vec<PathBuf> = exe_dir.map(|d| d.join(&file_name)).into_iter().collect();
    let built = PathBuf::from(DYLIB_PATH);
    if !candidates.contains(&built) {
        candidates.push(built);
    }
    candidates
}

/// Prepend `library` to an existing preload list
fn preload_value(library: &OsStr, existing: Option<OsString>) -> OsString {
    let mut value = library.to_os_string();
    if let Some(existing) = existing.filter(|v| !v.is_empty()) {
        value.push(":");
        value.push(existing);
    }
    value
}

/// The shim, opened locally so its hooks never bind the launcher's calls
struct DyLib {
    path: PathBuf,
    cdylib: Library,
}

type FillFn = unsafe extern "C" fn(*mut c_char, usize) -> usize;
type RemapFn = unsafe extern "C" fn(*const c_char, *mut c_char, usize) -> usize;

impl DyLib {
    fn load(library_path: &Path) -> anyhow::Result<Self> {
        let cdylib = unsafe { Library::new(library_path).context("failed to load library") }?;
        Ok(Self {
            path: library_path.to_path_buf(),
            cdylib,
        })
    }

    pub fn version(&self) -> anyhow::Result<String> {
        unsafe {
            let func: Symbol<unsafe extern "C" fn() -> *const c_char> = self
                .cdylib
                .get(b"homeshift_version")
                .context("failed to load version function")?;
            Ok(CStr::from_ptr(func()).to_string_lossy().into_owned())
        }
    }

    /// Load, refusing a shim built from another release
    fn load_checked(library_path: &Path) -> anyhow::Result<Self> {
        let lib = Self::load(library_path)?;
        let version = lib.version()?;
        if version != PKG_VERSION {
            anyhow::bail!("library version {version} does not match launcher {PKG_VERSION}");
        }
        Ok(lib)
    }

    pub fn prefix(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = vec![0u8; libc::PATH_MAX as usize];
        let len = unsafe {
            let func: Symbol<FillFn> = self
                .cdylib
                .get(b"homeshift_prefix")
                .context("failed to load prefix function")?;
            func(buf.as_mut_ptr().cast(), buf.len())
        };
        buf.truncate(len);
        Ok(buf)
    }

    pub fn remap(&self, path: &CStr) -> anyhow::Result<Vec<u8>> {
        let mut buf = vec![0u8; libc::PATH_MAX as usize];
        let len = unsafe {
            let func: Symbol<RemapFn> = self
                .cdylib
                .get(b"homeshift_remap")
                .context("failed to load remap function")?;
            func(path.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
        };
        buf.truncate(len);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_explicit_library_is_named() {
        let err = locate_library(Some(PathBuf::from("/nonexistent/libshim.so")), None)
            .err()
            .unwrap();
        let msg = format!("{err:#}");
        assert!(msg.contains("/nonexistent/libshim.so"), "{msg}");
        assert!(!msg.contains("pass --library"), "{msg}");
    }

    #[test]
    fn exe_dir_is_searched_before_build_dir() {
        let got = library_candidates(Some(Path::new("/usr/local/bin")));
        assert_eq!(
            got[0],
            PathBuf::from(format!("/usr/local/bin/libhomeshift.{CDYLIB_EXT}"))
        );
        assert_eq!(got.last(), Some(&PathBuf::from(DYLIB_PATH)));
    }

    #[test]
    fn preload_keeps_existing_entries() {
        assert_eq!(
            preload_value(OsStr::new("/lib/a.so"), Some("/lib/b.so".into())),
            OsString::from("/lib/a.so:/lib/b.so")
        );
        assert_eq!(
            preload_value(OsStr::new("/lib/a.so"), Some(OsString::new())),
            OsString::from("/lib/a.so")
        );
        assert_eq!(
            preload_value(OsStr::new("/lib/a.so"), None),
            OsString::from("/lib/a.so")
        );
    }

    #[test]
    fn cli_collects_trailing_command() {
        let cli = Cli::parse_from(["homeshift", "run", "--", "vpnclient", "-c", "x"]);
        assert_eq!(cli.library, None);
        match cli.command {
            Commands::Run { command } => assert_eq!(command, vec!["vpnclient", "-c", "x"]),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn library_flag_is_accepted_after_subcommand() {
        let cli = Cli::parse_from(["homeshift", "prefix", "--library", "/x/libshim.so"]);
        assert_eq!(cli.library, Some(PathBuf::from("/x/libshim.so")));
    }
}
