//! Supervisor configuration.
//!
//! Everything the supervisor needs to know about its environment is
//! collected here once and handed to [`PluginCompiler::start`]. Nothing is
//! read from process-wide globals after that point.
//!
//! [`PluginCompiler::start`]: crate::PluginCompiler::start

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default idle window before an unused worker is shut down.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default grace period between the Exit request and a forced kill.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for the compiler supervisor.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Directory the worker writes its log files to (passed as `/logPath:`).
    pub log_dir: PathBuf,

    /// Directory plugin sources live in. Stripped from diagnostic lines.
    pub plugin_dir: PathBuf,

    /// Directory holding the worker's native dependencies (`x64`/`x86` below it).
    pub extension_dir: PathBuf,

    /// Directories searched for `<name>.dll` reference assemblies.
    pub reference_dirs: Vec<PathBuf>,

    /// Extension appended to script names to form virtual file names.
    pub source_extension: String,

    /// Shut the worker down after `idle_timeout` without work.
    pub auto_shutdown: bool,

    /// Quiescence window for the idle shutdown scheduler.
    pub idle_timeout: Duration,

    /// Grace period before a worker that ignored Exit is killed.
    pub shutdown_grace: Duration,

    /// Native libraries the worker is expected to find in its dependency dir.
    /// Only used for crash diagnostics.
    pub native_dependencies: Vec<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            plugin_dir: PathBuf::from("plugins"),
            extension_dir: PathBuf::from("extensions"),
            reference_dirs: Vec::new(),
            source_extension: "cs".to_string(),
            auto_shutdown: true,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            native_dependencies: default_native_dependencies(),
        }
    }
}

impl CompilerConfig {
    /// Create a config rooted at a server directory.
    ///
    /// Uses `<root>/logs`, `<root>/plugins`, `<root>/extensions` and
    /// `<root>/extensions` as the only reference directory.
    pub fn for_root(root: &Path) -> Self {
        let extension_dir = root.join("extensions");
        Self {
            log_dir: root.join("logs"),
            plugin_dir: root.join("plugins"),
            reference_dirs: vec![extension_dir.clone()],
            extension_dir,
            ..Self::default()
        }
    }

    pub fn with_auto_shutdown(mut self, enabled: bool) -> Self {
        self.auto_shutdown = enabled;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_reference_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reference_dirs.push(dir.into());
        self
    }

    /// Directory containing the worker's native dependencies for this host.
    pub fn native_dependency_dir(&self) -> PathBuf {
        let arch = if cfg!(windows) || cfg!(target_pointer_width = "32") {
            "x86"
        } else {
            "x64"
        };
        self.extension_dir.join(arch)
    }

    /// Virtual file name the worker sees for a script.
    pub fn source_file_name(&self, script_name: &str) -> String {
        format!("{}.{}", script_name, self.source_extension)
    }
}

/// Environment variable the platform loader searches for shared libraries.
pub fn library_path_var() -> &'static str {
    if cfg!(windows) {
        "PATH"
    } else if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else {
        "LD_LIBRARY_PATH"
    }
}

/// Separator used between entries of [`library_path_var`].
pub fn library_path_separator() -> char {
    if cfg!(windows) { ';' } else { ':' }
}

fn default_native_dependencies() -> Vec<String> {
    let names: &[&str] = if cfg!(windows) {
        &["mono-2.0.dll", "msvcp140.dll", "msvcr120.dll"]
    } else {
        &["libmonoboehm-2.0.so.1", "libMonoPosixHelper.so"]
    };
    names.iter().map(|s| s.to_string()).collect()
}
