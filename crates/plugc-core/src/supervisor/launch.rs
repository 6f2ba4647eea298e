//! Spawning the compiler worker.
//!
//! [`WorkerLauncher`] is the seam between the supervisor and the operating
//! system. [`ProcessLauncher`] spawns the real binary; tests plug in workers
//! that live in memory.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::Stdio;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::config::{CompilerConfig, library_path_separator, library_path_var};

/// A running worker process.
pub trait WorkerProcess: Send {
    /// OS process id, if known.
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit. Resolves to the exit code, if any.
    fn wait(&mut self) -> BoxFuture<'_, Option<i32>>;

    /// Ask the OS to terminate the process without waiting.
    fn start_kill(&mut self) -> io::Result<()>;
}

impl WorkerProcess for Child {
    fn id(&self) -> Option<u32> {
        Child::id(self)
    }

    fn wait(&mut self) -> BoxFuture<'_, Option<i32>> {
        Box::pin(async move { Child::wait(self).await.ok().and_then(|status| status.code()) })
    }

    fn start_kill(&mut self) -> io::Result<()> {
        Child::start_kill(self)
    }
}

/// Streams and process handle of a freshly launched worker.
pub struct LaunchedWorker {
    /// Worker stdout.
    pub reader: Box<dyn AsyncRead + Unpin + Send>,
    /// Worker stdin.
    pub writer: Box<dyn AsyncWrite + Unpin + Send>,
    pub process: Box<dyn WorkerProcess>,
    /// Library search path the worker was started with.
    pub library_path: OsString,
}

/// Starts worker processes.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, binary: &Path, config: &CompilerConfig) -> io::Result<LaunchedWorker>;
}

/// Launches the compiler binary as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, binary: &Path, config: &CompilerConfig) -> io::Result<LaunchedWorker> {
        let library_path = library_search_path(config, std::env::var_os(library_path_var()));

        let mut child = Command::new(binary)
            .args(launch_args(config))
            .env(library_path_var(), &library_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Let worker stderr pass through for debugging
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("Failed to get worker stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("Failed to get worker stdout"))?;

        Ok(LaunchedWorker {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Box::new(child),
            library_path,
        })
    }
}

/// Command line for service mode.
pub fn launch_args(config: &CompilerConfig) -> Vec<OsString> {
    let mut log_path = OsString::from("/logPath:");
    log_path.push(config.log_dir.as_os_str());
    vec![OsString::from("/service"), log_path]
}

/// Library search path for the worker: the inherited value plus the native
/// dependency directory.
pub fn library_search_path(config: &CompilerConfig, inherited: Option<OsString>) -> OsString {
    let dep_dir = config.native_dependency_dir();
    match inherited {
        Some(existing) if !existing.is_empty() => {
            let mut value = existing;
            value.push(library_path_separator().to_string());
            value.push(dep_dir.as_os_str());
            value
        }
        _ => dep_dir.into_os_string(),
    }
}

/// Remove `compiler_*.txt` logs left by previous workers.
pub fn purge_old_logs(log_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("compiler_") && name.ends_with(".txt") {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

/// Likely causes of a failed spawn, for the log.
pub fn diagnose_launch_failure(binary: &Path, error: &io::Error) -> Vec<String> {
    let mut hints = Vec::new();

    if binary.to_string_lossy().contains('\'') {
        hints.push(
            "Server directory path contains an apostrophe, compiler will not work until path is renamed"
                .to_string(),
        );
    } else if cfg!(unix) && error.kind() == io::ErrorKind::PermissionDenied {
        hints.push("Compiler may not be set as executable; chmod +x or 0744/0755 required".to_string());
    } else if error.kind() == io::ErrorKind::NotFound && binary.exists() {
        // The binary is there, so the loader could not find its interpreter or libraries.
        hints.push(format!(
            "{} exists but could not be loaded; its shared library dependencies may be missing",
            binary.display()
        ));
    }

    if let Some(code) = error.raw_os_error() {
        hints.push(format!("OS error code: {}", code));
    }

    hints
}
