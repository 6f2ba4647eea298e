//! Locating a usable compiler binary.
//!
//! Downloading and updating the compiler is someone else's job. The
//! supervisor only asks a [`BinaryProvisioner`] for a validated executable
//! path and a version string to put in log messages.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Environment variable that overrides compiler discovery.
pub const COMPILER_PATH_ENV: &str = "PLUGC_COMPILER_PATH";

/// Supplies the compiler executable to the supervisor.
pub trait BinaryProvisioner: Send + Sync {
    /// Path to an executable compiler, or `None` if there is none.
    fn validated_executable_path(&self) -> Option<PathBuf>;

    /// Version of the installed compiler, for diagnostics.
    fn installed_version(&self) -> String;
}

/// Provisioner for a compiler that is already installed locally.
#[derive(Debug, Clone)]
pub struct LocalProvisioner {
    path: PathBuf,
    version: String,
}

impl LocalProvisioner {
    /// Use a known binary path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let version = probe_version(&path).unwrap_or_else(|| "Unknown".to_string());
        Self { path, version }
    }

    /// Use a known binary path with a known version.
    pub fn with_version(path: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }

    /// Find a compiler binary named `name`.
    ///
    /// Looks in the following order:
    /// 1. `PLUGC_COMPILER_PATH` environment variable
    /// 2. Same directory as the current executable
    /// 3. System PATH
    pub fn discover(name: &str) -> Option<Self> {
        if let Ok(path) = std::env::var(COMPILER_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(Self::new(path));
            }
        }

        let file_name = executable_name(name);

        if let Ok(exe_path) = std::env::current_exe()
            && let Some(exe_dir) = exe_path.parent()
        {
            let candidate = exe_dir.join(&file_name);
            if candidate.exists() {
                return Some(Self::new(candidate));
            }
        }

        which::which(&file_name).ok().map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BinaryProvisioner for LocalProvisioner {
    fn validated_executable_path(&self) -> Option<PathBuf> {
        if !self.path.is_file() {
            tracing::warn!("Compiler binary not found at {}", self.path.display());
            return None;
        }
        ensure_executable(&self.path);
        Some(self.path.clone())
    }

    fn installed_version(&self) -> String {
        self.version.clone()
    }
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) && !name.ends_with(".exe") {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

/// Run `<binary> --version` and take the first line of its output.
fn probe_version(path: &Path) -> Option<String> {
    let output = Command::new(path).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
}

/// Make sure the owner can execute the binary, fixing the mode if not.
#[cfg(unix)]
fn ensure_executable(path: &Path) {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::PermissionsExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return;
    };
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    if unsafe { libc::access(c_path.as_ptr(), libc::X_OK) } == 0 {
        return;
    }

    let result = std::fs::metadata(path).and_then(|meta| {
        let mut perms = meta.permissions();
        perms.set_mode(perms.mode() | 0o700);
        std::fs::set_permissions(path, perms)
    });
    if let Err(e) = result {
        tracing::error!(
            "Could not set {} as executable, please set manually: {}",
            path.display(),
            e
        );
    }
}

#[cfg(not(unix))]
fn ensure_executable(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_binary_is_not_validated() {
        let temp = TempDir::new().unwrap();
        let provisioner = LocalProvisioner::with_version(temp.path().join("nope"), "1.0");
        assert!(provisioner.validated_executable_path().is_none());
        assert_eq!(provisioner.installed_version(), "1.0");
    }

    #[cfg(unix)]
    #[test]
    fn test_sets_execute_bit() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Compiler.x86_x64");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        let provisioner = LocalProvisioner::with_version(&path, "1.0");
        assert_eq!(provisioner.validated_executable_path(), Some(path.clone()));
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o100, 0o100);
    }
}
