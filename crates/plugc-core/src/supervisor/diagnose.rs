//! Heuristics explaining why a worker died.
//!
//! None of this changes behaviour; it only produces log lines that point an
//! operator at the usual culprits: a library path that does not reach the
//! worker's native dependencies, missing dependency files, or ownership.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::{CompilerConfig, library_path_separator, library_path_var};

/// Upper bound on the dependency trace run.
const TRACE_TIMEOUT: Duration = Duration::from_secs(10);

/// Hints for a worker that exited unexpectedly.
pub fn crash_hints(config: &CompilerConfig, binary: Option<&Path>, library_path: &OsStr) -> Vec<String> {
    let mut hints = Vec::new();
    let dep_dir = config.native_dependency_dir();

    if !library_path_contains(library_path, &dep_dir) {
        hints.push(format!(
            "{} does not contain path to compiler dependencies: {}",
            library_path_var(),
            dep_dir.display()
        ));
        return hints;
    }

    if cfg!(windows) {
        hints.push(
            "Compiler may have been closed by interference from security software or install is missing files"
                .to_string(),
        );
    } else {
        hints.push(
            "User running server may not have the proper permissions or install is missing files"
                .to_string(),
        );
        hints.extend(ownership_hints(binary));
    }

    for file in &config.native_dependencies {
        let path = dep_dir.join(file);
        if !path.exists() {
            hints.push(format!("{} is missing", path.display()));
        }
    }

    hints
}

fn library_path_contains(library_path: &OsStr, dir: &Path) -> bool {
    library_path
        .to_string_lossy()
        .split(library_path_separator())
        .any(|entry| Path::new(entry) == dir)
}

#[cfg(unix)]
fn ownership_hints(binary: Option<&Path>) -> Vec<String> {
    use std::os::unix::fs::MetadataExt;

    let mut hints = Vec::new();
    let user = std::env::var("USER").unwrap_or_else(|_| {
        // SAFETY: geteuid has no preconditions and cannot fail.
        format!("uid {}", unsafe { libc::geteuid() })
    });
    hints.push(format!("User running server: {}", user));

    if let Some(binary) = binary
        && let Ok(meta) = std::fs::metadata(binary)
    {
        hints.push(format!(
            "Compiler under user/group: {}/{}",
            meta.uid(),
            meta.gid()
        ));
    }
    hints
}

#[cfg(not(unix))]
fn ownership_hints(_binary: Option<&Path>) -> Vec<String> {
    Vec::new()
}

/// Ask the dynamic loader which shared objects the binary resolves.
///
/// Returns the loader's output lines. Only meaningful on Linux.
pub async fn dependency_trace(binary: PathBuf, library_path: OsString) -> Vec<String> {
    let child = Command::new(&binary)
        .env("LD_TRACE_LOADED_OBJECTS", "1")
        .env(library_path_var(), library_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!("Couldn't run dependency trace for {}: {}", binary.display(), e);
            return Vec::new();
        }
    };

    match tokio::time::timeout(TRACE_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&output.stderr).lines())
            .map(|line| line.trim_start().to_string())
            .filter(|line| !line.is_empty())
            .collect(),
        Ok(Err(e)) => {
            tracing::debug!("Dependency trace failed: {}", e);
            Vec::new()
        }
        Err(_) => {
            tracing::debug!("Dependency trace timed out");
            Vec::new()
        }
    }
}
